//! Error taxonomy for marketplace operations.
//!
//! Every variant aborts the whole operation; no partial state is committed.

use thiserror::Error;

use crate::lifecycle::ModelState;

pub type MarketResult<T> = Result<T, MarketError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("party {party} is not allowed to {action}")]
    Unauthorized { party: String, action: &'static str },
    #[error("unknown model {0}")]
    UnknownModel(String),
    #[error("party {trainer} is not a trainer of model {model_id}")]
    UnknownTrainer { model_id: String, trainer: String },
    #[error("invalid model definition: {0}")]
    InvalidModel(String),
    #[error("model {model_id} is {state:?}: {reason}")]
    InvalidState { model_id: String, state: ModelState, reason: &'static str },
    #[error("contributions already calculated for model {0}")]
    AlreadyCalculated(String),
    #[error("party {party} already paid for model {model_id}")]
    AlreadyPaid { model_id: String, party: String },
    #[error("escrow for model {model_id} holds {available}, payout needs {required}")]
    InsufficientEscrow { model_id: String, available: u128, required: u128 },
    #[error("declared amount {declared} does not match attached funds {attached}")]
    AmountMismatch { declared: u128, attached: u128 },
    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),
}

impl MarketError {
    /// Short stable label, used as a metric attribute and log field.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Unauthorized { .. } => "unauthorized",
            MarketError::UnknownModel(_) => "unknown_model",
            MarketError::UnknownTrainer { .. } => "unknown_trainer",
            MarketError::InvalidModel(_) => "invalid_model",
            MarketError::InvalidState { .. } => "invalid_state",
            MarketError::AlreadyCalculated(_) => "already_calculated",
            MarketError::AlreadyPaid { .. } => "already_paid",
            MarketError::InsufficientEscrow { .. } => "insufficient_escrow",
            MarketError::AmountMismatch { .. } => "amount_mismatch",
            MarketError::Overflow(_) => "overflow",
        }
    }

    pub(crate) fn unauthorized(party: &str, action: &'static str) -> Self {
        MarketError::Unauthorized { party: party.to_string(), action }
    }
}
