//! Error types for the gacha and progression core.
//!
//! Every failure callers can branch on is a variant here. Raw store or
//! serialization detail never reaches `user_message`.

use thiserror::Error;

/// What kind of entity a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Pool,
    Item,
    OwnedItem,
    Achievement,
    Batch,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Pool => "pool",
            EntityKind::Item => "item",
            EntityKind::OwnedItem => "owned item",
            EntityKind::Achievement => "achievement",
            EntityKind::Batch => "pull batch",
        };
        write!(f, "{}", name)
    }
}

/// Action the UI should offer next to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Offer a currency top-up
    TopUp,
    /// Offer to retry the action
    Retry,
    /// Nothing the user can do
    None,
}

#[derive(Error, Debug)]
pub enum GachaError {
    #[error("Insufficient currency: need {required}, have {available}")]
    InsufficientCurrency { required: u64, available: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown {kind}: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Concurrent update on {key} not resolved after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    #[error("No duplicates of {item_id} available")]
    NoDuplicatesAvailable { item_id: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GachaError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        GachaError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            GachaError::InsufficientCurrency { .. } => 4001,
            GachaError::NoDuplicatesAvailable { .. } => 4002,
            GachaError::NotFound { .. } => 4004,
            GachaError::Conflict { .. } => 4009,
            GachaError::Configuration(_) => 5001,
            GachaError::Store(_) => 5002,
            GachaError::Json(_) => 5003,
        }
    }

    /// Message safe to show to the player
    pub fn user_message(&self) -> String {
        match self {
            GachaError::InsufficientCurrency { required, available } => format!(
                "You need {} tickets for this pull but only have {}.",
                required, available
            ),
            GachaError::NoDuplicatesAvailable { .. } => {
                "You have no duplicate copies of this philosopher to use.".to_string()
            }
            GachaError::NotFound { kind, .. } => format!("That {} could not be found.", kind),
            GachaError::Conflict { .. } => {
                "Your progress was updated on another device. Please try again.".to_string()
            }
            GachaError::Configuration(_) | GachaError::Store(_) | GachaError::Json(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
        }
    }

    pub fn remediation(&self) -> Remediation {
        match self {
            GachaError::InsufficientCurrency { .. } => Remediation::TopUp,
            GachaError::Configuration(_) => Remediation::None,
            _ => Remediation::Retry,
        }
    }

    /// Whether an automatic retry can succeed without outside changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, GachaError::Conflict { .. } | GachaError::Store(_))
    }
}

pub type GachaResult<T> = Result<T, GachaError>;
