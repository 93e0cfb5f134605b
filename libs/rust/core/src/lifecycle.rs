//! Model lifecycle finite state machine.
//!
//! Phases:
//! - Created (registered, no metrics yet)
//! - Training (aggregator reporting iterations)
//! - Finished (buyer closed training)
//! - ContributionsCalculated (credit split fixed, payouts open)
//!
//! Tracks a timestamp for each transition so settlements can be audited.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModelState { Created, Training, Finished, ContributionsCalculated }

impl ModelState {
    pub fn accepts_metrics(self) -> bool { matches!(self, ModelState::Created | ModelState::Training) }
    pub fn accepts_deposit(self) -> bool { matches!(self, ModelState::Created | ModelState::Training) }

    fn successor(self) -> Option<ModelState> {
        match self {
            ModelState::Created => Some(ModelState::Training),
            ModelState::Training => Some(ModelState::Finished),
            ModelState::Finished => Some(ModelState::ContributionsCalculated),
            ModelState::ContributionsCalculated => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLifecycle {
    state: ModelState,
    created_at: i64,
    transitions: Vec<(ModelState, i64)>,
}

impl Default for ModelLifecycle {
    fn default() -> Self { Self::new() }
}

impl ModelLifecycle {
    pub fn new() -> Self { Self { state: ModelState::Created, created_at: Utc::now().timestamp(), transitions: Vec::new() } }
    pub fn state(&self) -> ModelState { self.state }
    pub fn transitions(&self) -> &[(ModelState, i64)] { &self.transitions }

    /// Fails with `InvalidState` unless the model is currently in `expected`.
    pub fn ensure(&self, model_id: &str, expected: ModelState, reason: &'static str) -> MarketResult<()> {
        if self.state == expected { Ok(()) } else { Err(self.invalid(model_id, reason)) }
    }

    pub fn invalid(&self, model_id: &str, reason: &'static str) -> MarketError {
        MarketError::InvalidState { model_id: model_id.to_string(), state: self.state, reason }
    }

    /// Moves to the next phase. Only the single forward edge out of the
    /// current phase is legal.
    pub fn advance(&mut self, model_id: &str, to: ModelState) -> MarketResult<()> {
        if self.state.successor() != Some(to) {
            return Err(self.invalid(model_id, "illegal lifecycle transition"));
        }
        self.state = to;
        self.transitions.push((to, Utc::now().timestamp()));
        Ok(())
    }
}
