use meridian_core::constants::{
    TRUST_DELTA_COMPLETED, TRUST_DELTA_FAILED, TRUST_DELTA_REJECTED, TRUST_DELTA_TIMEOUT,
};

/// Outcome reported by `feedback` (spec §4.4 trust update table). Mutually
/// exclusive per job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Completed,
    Rejected,
    Failed,
    Timeout,
}

impl MatchOutcome {
    pub fn trust_delta(self) -> f64 {
        match self {
            MatchOutcome::Completed => TRUST_DELTA_COMPLETED,
            MatchOutcome::Rejected => TRUST_DELTA_REJECTED,
            MatchOutcome::Failed => TRUST_DELTA_FAILED,
            MatchOutcome::Timeout => TRUST_DELTA_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_match_normative_table() {
        assert_eq!(MatchOutcome::Completed.trust_delta(), 0.01);
        assert_eq!(MatchOutcome::Rejected.trust_delta(), -0.005);
        assert_eq!(MatchOutcome::Failed.trust_delta(), -0.05);
        assert_eq!(MatchOutcome::Timeout.trust_delta(), -0.10);
    }
}
