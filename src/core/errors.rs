use thiserror::Error;

/// Typed failure taxonomy for the binning core.
///
/// Everything here is fatal for the current run and surfaced to the caller;
/// the core never logs-and-continues past a data-integrity problem. Hitting
/// the refinement iteration cap is deliberately NOT in this enum — a
/// best-effort clustering is still useful, so it is reported as a
/// [`crate::clustering::Convergence`] variant instead.
#[derive(Error, Debug)]
pub enum BinningError {
    /// Too few contigs or feasible pairs to proceed. Not retried.
    #[error("insufficient data for {context}: needed {needed}, had {available}")]
    InsufficientData {
        needed: usize,
        available: usize,
        context: String,
    },

    /// A required coverage/representation/graph artifact is absent.
    #[error("missing artifact: {what} ({hint})")]
    MissingArtifact { what: String, hint: String },

    /// The scorer raised during a batch invocation. Never retried
    /// automatically; the caller re-runs the whole step with `force`.
    #[error("scorer failure: {message}")]
    ScorerFailure { message: String },

    /// Inconsistent inputs, e.g. a graph edge referencing an unknown contig.
    #[error("data integrity violation: {message}")]
    DataIntegrity { message: String },

    /// A configuration field failed validation at construction.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl BinningError {
    pub fn insufficient(needed: usize, available: usize, context: impl Into<String>) -> Self {
        Self::InsufficientData {
            needed,
            available,
            context: context.into(),
        }
    }

    pub fn missing(what: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingArtifact {
            what: what.into(),
            hint: hint.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_problem() {
        let err = BinningError::insufficient(2, 1, "negative pair sampling");
        assert!(err.to_string().contains("negative pair sampling"));

        let err = BinningError::missing("latent/ctg_7", "run the representation precompute step");
        assert!(err.to_string().contains("latent/ctg_7"));

        let err = BinningError::integrity("edge references unknown contig 'ctg_9'");
        assert!(err.to_string().contains("unknown contig"));
    }
}
