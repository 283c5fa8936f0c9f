// ===== ERROR TYPES =====
//
// Error taxonomy for the tracking pipeline. Most internal plumbing passes
// plain `Result<T, String>` around; this enum is used at the seams where the
// failure class matters (API transport vs payload shape vs storage) and for
// the persistent-failure signal raised by the state machine.

use std::fmt;

#[derive(Debug, Clone)]
pub enum TrackerError {
    /// Network or HTTP level failure talking to the price API
    Transport { context: String, message: String },
    /// SQLite failure (open, query, or pool management)
    Store { context: String, message: String },
    /// Payload arrived but does not have the expected shape
    DataShape { context: String, message: String },
    /// A token crossed the consecutive-failure threshold
    PersistentFailure {
        token_id: i64,
        blockchain: String,
        contract_address: String,
        failures: i64,
    },
}

impl TrackerError {
    pub fn transport(context: &str, message: impl fmt::Display) -> Self {
        TrackerError::Transport {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    pub fn store(context: &str, message: impl fmt::Display) -> Self {
        TrackerError::Store {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    pub fn data_shape(context: &str, message: impl fmt::Display) -> Self {
        TrackerError::DataShape {
            context: context.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::Transport { context, message } => {
                write!(f, "Transport error in {}: {}", context, message)
            }
            TrackerError::Store { context, message } => {
                write!(f, "Store error in {}: {}", context, message)
            }
            TrackerError::DataShape { context, message } => {
                write!(f, "Unexpected payload shape in {}: {}", context, message)
            }
            TrackerError::PersistentFailure {
                token_id,
                blockchain,
                contract_address,
                failures,
            } => {
                write!(
                    f,
                    "Token {} ({}/{}) hit {} consecutive failures",
                    token_id, blockchain, contract_address, failures
                )
            }
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<TrackerError> for String {
    fn from(e: TrackerError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let e = TrackerError::transport("get_token_pairs", "connection refused");
        assert!(e.to_string().contains("get_token_pairs"));
        assert!(e.to_string().contains("connection refused"));
    }

    #[test]
    fn test_persistent_failure_display() {
        let e = TrackerError::PersistentFailure {
            token_id: 7,
            blockchain: "ethereum".to_string(),
            contract_address: "0xabc".to_string(),
            failures: 5,
        };
        let s = e.to_string();
        assert!(s.contains("5 consecutive failures"));
        assert!(s.contains("ethereum"));
    }
}
