use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lockwarden_core::{AppError, AppResult};
use lockwarden_domain::LockKey;

use crate::lock_ports::LockStorageNode;

use super::{DistributedLockClient, LockConfiguration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Grant,
    Refuse,
    Unreachable,
}

struct ScriptedNode {
    name: String,
    acquire: Behavior,
    extend: Behavior,
    release: Behavior,
    latency: Duration,
    extend_latency: Duration,
    set_calls: AtomicUsize,
    extend_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl ScriptedNode {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_owned(),
            acquire: behavior,
            extend: behavior,
            release: behavior,
            latency: Duration::ZERO,
            extend_latency: Duration::ZERO,
            set_calls: AtomicUsize::new(0),
            extend_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    fn extending(mut self, behavior: Behavior) -> Self {
        self.extend = behavior;
        self
    }

    fn releasing(mut self, behavior: Behavior) -> Self {
        self.release = behavior;
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with_extend_latency(mut self, latency: Duration) -> Self {
        self.extend_latency = latency;
        self
    }

    async fn answer(&self, behavior: Behavior) -> AppResult<bool> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match behavior {
            Behavior::Grant => Ok(true),
            Behavior::Refuse => Ok(false),
            Behavior::Unreachable => Err(AppError::StorageUnavailable(format!(
                "{} is down",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl LockStorageNode for ScriptedNode {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    async fn set_if_absent(
        &self,
        _keys: &[LockKey],
        _token: &str,
        _ttl: Duration,
    ) -> AppResult<bool> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(self.acquire).await
    }

    async fn extend_if_owned(
        &self,
        _keys: &[LockKey],
        _token: &str,
        _ttl: Duration,
    ) -> AppResult<bool> {
        self.extend_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.extend_latency).await;
        self.answer(self.extend).await
    }

    async fn delete_if_owned(&self, keys: &[LockKey], _token: &str) -> AppResult<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let deleted = self.answer(self.release).await?;
        Ok(if deleted { keys.len() as u64 } else { 0 })
    }
}

fn quorum(
    nodes: Vec<ScriptedNode>,
    configuration: LockConfiguration,
) -> (Vec<Arc<ScriptedNode>>, Arc<DistributedLockClient>) {
    let nodes: Vec<Arc<ScriptedNode>> = nodes.into_iter().map(Arc::new).collect();
    let storage = nodes
        .iter()
        .map(|node| Arc::clone(node) as Arc<dyn LockStorageNode>)
        .collect();
    let client = DistributedLockClient::new(storage, configuration)
        .unwrap_or_else(|_| unreachable!());
    (nodes, Arc::new(client))
}

fn nodes(behaviors: &[Behavior]) -> Vec<ScriptedNode> {
    behaviors
        .iter()
        .enumerate()
        .map(|(index, behavior)| ScriptedNode::new(&format!("node-{index}"), *behavior))
        .collect()
}

fn keys(value: &str) -> Vec<LockKey> {
    vec![LockKey::new(value).unwrap_or_else(|_| unreachable!())]
}

fn total(nodes: &[Arc<ScriptedNode>], counter: impl Fn(&ScriptedNode) -> usize) -> usize {
    nodes.iter().map(|node| counter(node.as_ref())).sum()
}

const TTL: Duration = Duration::from_secs(1);

#[tokio::test]
async fn acquires_when_majority_grants() {
    let (_, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Refuse]),
        LockConfiguration::default(),
    );

    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    assert_eq!(record.granted_by(), 2);
    assert_eq!(record.token().len(), 32);
    assert_eq!(record.describe_keys(), "/orders-42");
    assert!(record.remaining_validity() <= TTL);
    assert!(!record.is_expired());
}

#[tokio::test]
async fn minority_grant_is_contention_and_discards_partial_writes() {
    let (nodes, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Refuse, Behavior::Refuse]),
        LockConfiguration::default(),
    );

    let result = client.acquire(&keys("/orders-42"), TTL).await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
    assert_eq!(total(&nodes, |node| node.delete_calls.load(Ordering::SeqCst)), 3);
}

#[tokio::test]
async fn unreachable_majority_is_storage_unavailable() {
    let (_, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Unreachable, Behavior::Unreachable]),
        LockConfiguration::default(),
    );

    let result = client.acquire(&keys("/orders-42"), TTL).await;

    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
}

#[tokio::test]
async fn tolerates_minority_outage() {
    let (_, client) = quorum(
        nodes(&[
            Behavior::Grant,
            Behavior::Grant,
            Behavior::Grant,
            Behavior::Unreachable,
            Behavior::Unreachable,
        ]),
        LockConfiguration::default(),
    );

    assert_eq!(client.majority(), 3);
    let record = client.acquire(&keys("/orders-42"), TTL).await;
    assert!(record.is_ok());
}

#[tokio::test]
async fn contention_amid_outage_is_still_contention() {
    let (_, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Refuse, Behavior::Unreachable]),
        LockConfiguration::default(),
    );

    let result = client.acquire(&keys("/orders-42"), TTL).await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
}

#[tokio::test]
async fn zero_retry_count_fails_fast() {
    let (nodes, client) = quorum(nodes(&[Behavior::Refuse]), LockConfiguration::default());

    let result = client.acquire(&keys("/orders-42"), TTL).await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
    assert_eq!(nodes[0].set_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn contended_acquire_retries_configured_times() {
    let configuration = LockConfiguration {
        retry_count: 2,
        ..LockConfiguration::default()
    };
    let (nodes, client) = quorum(nodes(&[Behavior::Refuse]), configuration);

    let started = tokio::time::Instant::now();
    let result = client.acquire(&keys("/orders-42"), TTL).await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
    assert_eq!(nodes[0].set_calls.load(Ordering::SeqCst), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(400));
    assert!(waited <= Duration::from_millis(800));
}

#[tokio::test]
async fn storage_unavailable_is_not_retried() {
    let configuration = LockConfiguration {
        retry_count: 3,
        ..LockConfiguration::default()
    };
    let (nodes, client) = quorum(nodes(&[Behavior::Unreachable]), configuration);

    let result = client.acquire(&keys("/orders-42"), TTL).await;

    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
    assert_eq!(nodes[0].set_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_quorum_leaves_no_validity() {
    let slow = ScriptedNode::new("slow", Behavior::Grant).with_latency(Duration::from_millis(50));
    let (nodes, client) = quorum(vec![slow], LockConfiguration::default());

    let result = client
        .acquire(&keys("/orders-42"), Duration::from_millis(40))
        .await;

    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
    assert_eq!(nodes[0].delete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn extend_keeps_token_and_moves_expiry() {
    let (_, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Grant]),
        LockConfiguration::default(),
    );
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    tokio::time::advance(Duration::from_millis(300)).await;
    let extended = client
        .extend(&record, TTL)
        .await
        .unwrap_or_else(|error| panic!("extend failed: {error}"));

    assert_eq!(extended.token(), record.token());
    assert_eq!(extended.acquired_at(), record.acquired_at());
    assert!(extended.expires_at() > record.expires_at());
}

#[tokio::test(start_paused = true)]
async fn extend_of_expired_record_is_rejected() {
    let (nodes, client) = quorum(nodes(&[Behavior::Grant]), LockConfiguration::default());
    let record = client
        .acquire(&keys("/orders-42"), Duration::from_millis(100))
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    tokio::time::advance(Duration::from_millis(200)).await;
    let result = client.extend(&record, TTL).await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
    assert_eq!(nodes[0].extend_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn extend_refused_by_majority_reports_lost_lock() {
    let (_, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Grant])
            .into_iter()
            .map(|node| node.extending(Behavior::Refuse))
            .collect(),
        LockConfiguration::default(),
    );
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    let result = client.extend(&record, TTL).await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
}

#[tokio::test]
async fn release_needs_a_reachable_majority() {
    let (_, client) = quorum(
        vec![
            ScriptedNode::new("a", Behavior::Grant),
            ScriptedNode::new("b", Behavior::Grant).releasing(Behavior::Unreachable),
            ScriptedNode::new("c", Behavior::Grant).releasing(Behavior::Unreachable),
        ],
        LockConfiguration::default(),
    );
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    let result = client.release(&record).await;

    assert!(matches!(result, Err(AppError::ReleaseFailed(_))));
}

#[tokio::test]
async fn release_counts_nodes_that_no_longer_hold_the_lock() {
    let (nodes, client) = quorum(
        vec![
            ScriptedNode::new("a", Behavior::Grant),
            ScriptedNode::new("b", Behavior::Grant).releasing(Behavior::Refuse),
            ScriptedNode::new("c", Behavior::Grant).releasing(Behavior::Unreachable),
        ],
        LockConfiguration::default(),
    );
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    assert!(client.release(&record).await.is_ok());
    assert_eq!(total(&nodes, |node| node.delete_calls.load(Ordering::SeqCst)), 3);
}

#[tokio::test(start_paused = true)]
async fn hold_renews_long_running_body() {
    let (nodes, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Grant]),
        LockConfiguration::default(),
    );
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    let (output, latest) = client
        .hold(record.clone(), TTL, async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            "done"
        })
        .await;

    assert_eq!(output, "done");
    assert_eq!(latest.token(), record.token());
    assert!(latest.expires_at() > record.expires_at());
    assert!(nodes[0].extend_calls.load(Ordering::SeqCst) >= 4);
}

#[tokio::test(start_paused = true)]
async fn hold_stops_renewing_after_failed_extension() {
    let (nodes, client) = quorum(
        nodes(&[Behavior::Grant])
            .into_iter()
            .map(|node| node.extending(Behavior::Refuse))
            .collect(),
        LockConfiguration::default(),
    );
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    let (output, latest) = client
        .hold(record.clone(), TTL, async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            7
        })
        .await;

    assert_eq!(output, 7);
    assert_eq!(latest, record);
    assert_eq!(nodes[0].extend_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hold_keeps_polling_body_while_extension_is_in_flight() {
    let slow_extend = ScriptedNode::new("slow-extend", Behavior::Grant)
        .with_extend_latency(Duration::from_millis(300));
    let (nodes, client) = quorum(vec![slow_extend], LockConfiguration::default());
    let record = client
        .acquire(&keys("/orders-42"), TTL)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    let started = tokio::time::Instant::now();
    let (finished_at, latest) = client
        .hold(record.clone(), TTL, async {
            tokio::time::sleep(Duration::from_millis(600)).await;
            tokio::time::Instant::now()
        })
        .await;

    assert!(finished_at - started <= Duration::from_millis(610));
    assert_eq!(nodes[0].extend_calls.load(Ordering::SeqCst), 1);
    assert_eq!(latest, record);
}

#[tokio::test]
async fn hold_never_renews_when_ttl_is_below_threshold() {
    let (nodes, client) = quorum(nodes(&[Behavior::Grant]), LockConfiguration::default());
    let short = Duration::from_millis(300);
    let record = client
        .acquire(&keys("/orders-42"), short)
        .await
        .unwrap_or_else(|error| panic!("acquire failed: {error}"));

    let (output, _) = client.hold(record, short, async { "quick" }).await;

    assert_eq!(output, "quick");
    assert_eq!(nodes[0].extend_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_exclusive_releases_after_body() {
    let (nodes, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Grant]),
        LockConfiguration::default(),
    );

    let output = client
        .run_exclusive(&keys("/orders-42"), TTL, async { 42 })
        .await;

    assert_eq!(output, Ok(42));
    assert_eq!(total(&nodes, |node| node.delete_calls.load(Ordering::SeqCst)), 3);
}

#[tokio::test]
async fn run_exclusive_does_not_poll_body_without_lock() {
    let (_, client) = quorum(nodes(&[Behavior::Refuse]), LockConfiguration::default());
    let polled = Arc::new(AtomicUsize::new(0));
    let body_polled = Arc::clone(&polled);

    let result = client
        .run_exclusive(&keys("/orders-42"), TTL, async move {
            body_polled.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert!(matches!(result, Err(AppError::ResourceLocked(_))));
    assert_eq!(polled.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_acquisition_discards_grants_in_background() {
    let (nodes, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Grant])
            .into_iter()
            .map(|node| node.with_latency(Duration::from_millis(50)))
            .collect(),
        LockConfiguration::default(),
    );

    let cancelled =
        tokio::time::timeout(Duration::from_millis(10), client.acquire(&keys("/orders-42"), TTL))
            .await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(total(&nodes, |node| node.set_calls.load(Ordering::SeqCst)), 3);
    assert_eq!(total(&nodes, |node| node.delete_calls.load(Ordering::SeqCst)), 3);
}

#[tokio::test]
async fn completed_acquisition_leaves_grants_in_place() {
    let (nodes, client) = quorum(
        nodes(&[Behavior::Grant, Behavior::Grant, Behavior::Grant]),
        LockConfiguration::default(),
    );

    let record = client.acquire(&keys("/orders-42"), TTL).await;
    tokio::task::yield_now().await;

    assert!(record.is_ok());
    assert_eq!(total(&nodes, |node| node.delete_calls.load(Ordering::SeqCst)), 0);
}

#[tokio::test]
async fn fresh_token_per_acquisition() {
    let (_, client) = quorum(nodes(&[Behavior::Grant]), LockConfiguration::default());

    let first = client.acquire(&keys("/a"), TTL).await;
    let second = client.acquire(&keys("/b"), TTL).await;

    match (first, second) {
        (Ok(first), Ok(second)) => assert_ne!(first.token(), second.token()),
        _ => panic!("both acquisitions should succeed"),
    }
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let (_, client) = quorum(nodes(&[Behavior::Grant]), LockConfiguration::default());

    assert!(matches!(
        client.acquire(&[], TTL).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        client.acquire(&keys("/a"), Duration::ZERO).await,
        Err(AppError::Validation(_))
    ));
}

#[test]
fn empty_quorum_is_rejected() {
    let result = DistributedLockClient::new(Vec::new(), LockConfiguration::default());
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[test]
fn default_configuration_matches_fast_fail_posture() {
    let configuration = LockConfiguration::default();

    assert!(configuration.validate().is_ok());
    assert_eq!(configuration.retry_count, 0);
    assert_eq!(configuration.default_ttl, Duration::from_secs(20));
    assert_eq!(
        configuration.drift_for(Duration::from_secs(20)),
        Duration::from_millis(202)
    );
}

#[test]
fn configuration_rejects_inconsistent_values() {
    let drift = LockConfiguration {
        drift_factor: 1.0,
        ..LockConfiguration::default()
    };
    let threshold = LockConfiguration {
        automatic_extension_threshold: Duration::from_secs(20),
        ..LockConfiguration::default()
    };
    let ttl = LockConfiguration {
        default_ttl: Duration::ZERO,
        ..LockConfiguration::default()
    };

    assert!(drift.validate().is_err());
    assert!(threshold.validate().is_err());
    assert!(ttl.validate().is_err());
}

#[test]
fn retry_pause_stays_within_jitter_bounds() {
    let configuration = LockConfiguration::default();

    for _ in 0..100 {
        let pause = configuration.retry_pause();
        assert!(pause >= Duration::from_millis(200));
        assert!(pause <= Duration::from_millis(400));
    }

    let no_jitter = LockConfiguration {
        retry_jitter: Duration::ZERO,
        ..LockConfiguration::default()
    };
    assert_eq!(no_jitter.retry_pause(), Duration::from_millis(200));
}
