use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lockwarden_application::{GuardOutcome, OperationContext};
use serde_json::{Map, Value, json};

use crate::dto::AlreadyInProgressResponse;
use crate::error::ApiResult;
use crate::state::RequestLock;

/// Runs the rest of the request only while holding the lock derived from it.
///
/// The lock is released as soon as the inner service returns its response,
/// before the body is sent. Do not guard handlers that stream their body;
/// work done while streaming runs unlocked.
pub async fn lock_request(
    State(request_lock): State<RequestLock>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let outcome = request_lock
        .guard
        .run(
            RequestContext::new(request),
            &request_lock.template,
            |context| async move { Ok(next.run(context.into_request()).await) },
        )
        .await?;

    Ok(match outcome {
        GuardOutcome::Completed(response) => response,
        GuardOutcome::AlreadyInProgress { lock_key } => (
            StatusCode::ACCEPTED,
            Json(AlreadyInProgressResponse::new(lock_key)),
        )
            .into_response(),
    })
}

/// Inbound request exposed to key templates.
///
/// The attribute tree is `{ method, path, headers, query }`, with header
/// names in lower case.
pub struct RequestContext {
    request: Request,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    fn headers(&self) -> Map<String, Value> {
        self.request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), Value::String(value.to_owned())))
            })
            .collect()
    }

    fn query(&self) -> Map<String, Value> {
        Query::<BTreeMap<String, String>>::try_from_uri(self.request.uri())
            .map(|Query(pairs)| pairs)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect()
    }
}

impl OperationContext for RequestContext {
    fn operation_identifier(&self) -> String {
        let uri = self.request.uri();
        uri.path_and_query()
            .map_or_else(|| uri.path().to_owned(), |path| path.as_str().to_owned())
    }

    fn attribute_tree(&self) -> Value {
        json!({
            "method": self.request.method().as_str(),
            "path": self.request.uri().path(),
            "headers": self.headers(),
            "query": self.query(),
        })
    }
}
