use chrono::{
    DateTime,
    Utc,
};

const UNKNOWN_ERROR: &str = "An unknown error occurred";

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Identity provider unavailable: {0}")]
    AuthUnavailable(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Failed to decode `{call}`: {reason}")]
    Decode { call: &'static str, reason: String },
    #[error("Drawing schedule exhausted{}", .last.map(|d| format!(" after {}", d.to_rfc3339())).unwrap_or_default())]
    ScheduleExhausted { last: Option<DateTime<Utc>> },
    #[error("Transaction reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    ContractRevert { reason: Option<String> },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Colour class of the notification a UI shows for an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Negative,
    Warning,
}

impl PoolError {
    pub fn decode(call: &'static str, reason: impl Into<String>) -> Self {
        PoolError::Decode {
            call,
            reason: reason.into(),
        }
    }

    /// Single line of text suitable for a dismissible toast.
    pub fn user_message(&self) -> String {
        let message = match self {
            PoolError::AuthUnavailable(reason)
            | PoolError::Connection(reason)
            | PoolError::Config(reason) => {
                if reason.trim().is_empty() {
                    return UNKNOWN_ERROR.to_string();
                }
                self.to_string()
            }
            PoolError::ContractRevert { reason: Some(reason) } if reason.trim().is_empty() => {
                "Transaction reverted: no reason given".to_string()
            }
            other => other.to_string(),
        };
        message.lines().next().unwrap_or(UNKNOWN_ERROR).to_string()
    }

    pub fn severity(&self) -> Severity {
        match self {
            PoolError::ScheduleExhausted { .. } => Severity::Warning,
            _ => Severity::Negative,
        }
    }
}
