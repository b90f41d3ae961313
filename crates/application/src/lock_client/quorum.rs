use lockwarden_core::AppResult;

/// Answers collected from one round of node operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct QuorumTally {
    nodes: usize,
    granted: usize,
    refused: usize,
}

impl QuorumTally {
    /// Counts answers; `granted` decides which successful answers count as grants.
    pub(super) fn count<T>(
        nodes: usize,
        answers: &[AppResult<T>],
        granted: impl Fn(&T) -> bool,
    ) -> Self {
        let mut tally = Self {
            nodes,
            granted: 0,
            refused: 0,
        };

        for answer in answers {
            match answer {
                Ok(value) if granted(value) => tally.granted += 1,
                Ok(_) => tally.refused += 1,
                Err(_) => {}
            }
        }

        tally
    }

    /// Strictly more than half of `nodes`.
    pub(super) fn majority_of(nodes: usize) -> usize {
        nodes / 2 + 1
    }

    pub(super) fn majority(&self) -> usize {
        Self::majority_of(self.nodes)
    }

    pub(super) fn granted(&self) -> usize {
        self.granted
    }

    pub(super) fn reachable(&self) -> usize {
        self.granted + self.refused
    }

    pub(super) fn has_majority(&self) -> bool {
        self.granted >= self.majority()
    }

    pub(super) fn majority_reachable(&self) -> bool {
        self.reachable() >= self.majority()
    }

    pub(super) fn describe_reachability(&self) -> String {
        format!(
            "{} of {} lock storage nodes reachable, {} required",
            self.reachable(),
            self.nodes,
            self.majority()
        )
    }
}
