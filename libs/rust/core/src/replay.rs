//! Typed call surface: every marketplace operation as a serializable call.
//!
//! Call scripts are YAML sequences of tagged maps, e.g.
//!
//! ```yaml
//! - call: save_mse
//!   caller: agg
//!   model_id: model1
//!   value: 900
//!   iteration: 0
//! ```

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::contribution::{ContributionReport, Percentage};
use crate::error::MarketResult;
use crate::ledger::{Iteration, Mse};
use crate::marketplace::Marketplace;
use crate::settlement::{format_units, parse_units, Amount, Payout};

/// Amount written as decimal units in scripts ("5", "0.5").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(pub Amount);

impl TryFrom<String> for TokenAmount {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> { parse_units(&value).map(TokenAmount) }
}

impl From<TokenAmount> for String {
    fn from(value: TokenAmount) -> Self { format_units(value.0) }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&format_units(self.0)) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum MarketCall {
    SetDataOwner { caller: String },
    SetFederatedAggregator { caller: String },
    SetModelBuyer { caller: String },
    NewModel { caller: String, model_id: String, validators: Vec<String>, trainers: Vec<String>, buyer: String },
    SaveMse { caller: String, model_id: String, value: Mse, iteration: Iteration },
    SavePartialMse { caller: String, model_id: String, value: Mse, trainer: String, iteration: Iteration },
    CheckMseForIter { caller: String, model_id: String, iteration: Iteration, expected: Mse },
    CheckPartialMseForIter { caller: String, model_id: String, trainer: String, iteration: Iteration, expected: Mse },
    /// `attached` defaults to `amount`.
    PayForModel { caller: String, model_id: String, amount: TokenAmount, #[serde(default)] attached: Option<TokenAmount> },
    FinishModelTraining { caller: String, model_id: String },
    CalculateContributions { caller: String, model_id: String },
    GetImprovement { model_id: String },
    GetDoContribution { model_id: String, trainer: String },
    CalculatePaymentForContribution { model_id: String, trainer: String },
    CalculatePaymentForValidation { model_id: String },
    CalculatePaymentForOrchestration { model_id: String },
    PayForContribution { caller: String, model_id: String },
    PayForValidation { caller: String, model_id: String },
    PayForOrchestration { caller: String, model_id: String },
}

impl MarketCall {
    pub fn name(&self) -> &'static str {
        match self {
            MarketCall::SetDataOwner { .. } => "set_data_owner",
            MarketCall::SetFederatedAggregator { .. } => "set_federated_aggregator",
            MarketCall::SetModelBuyer { .. } => "set_model_buyer",
            MarketCall::NewModel { .. } => "new_model",
            MarketCall::SaveMse { .. } => "save_mse",
            MarketCall::SavePartialMse { .. } => "save_partial_mse",
            MarketCall::CheckMseForIter { .. } => "check_mse_for_iter",
            MarketCall::CheckPartialMseForIter { .. } => "check_partial_mse_for_iter",
            MarketCall::PayForModel { .. } => "pay_for_model",
            MarketCall::FinishModelTraining { .. } => "finish_model_training",
            MarketCall::CalculateContributions { .. } => "calculate_contributions",
            MarketCall::GetImprovement { .. } => "get_improvement",
            MarketCall::GetDoContribution { .. } => "get_do_contribution",
            MarketCall::CalculatePaymentForContribution { .. } => "calculate_payment_for_contribution",
            MarketCall::CalculatePaymentForValidation { .. } => "calculate_payment_for_validation",
            MarketCall::CalculatePaymentForOrchestration { .. } => "calculate_payment_for_orchestration",
            MarketCall::PayForContribution { .. } => "pay_for_contribution",
            MarketCall::PayForValidation { .. } => "pay_for_validation",
            MarketCall::PayForOrchestration { .. } => "pay_for_orchestration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    Done,
    Verified(bool),
    Contributions(ContributionReport),
    Improvement(Mse),
    Percentage(Percentage),
    Amount(TokenAmount),
    Payout(Payout),
}

pub fn parse_script(text: &str) -> Result<Vec<MarketCall>> {
    serde_yaml::from_str(text).context("parse market call script")
}

impl Marketplace {
    pub fn apply(&self, call: MarketCall) -> MarketResult<CallOutcome> {
        match call {
            MarketCall::SetDataOwner { caller } => self.set_data_owner(&caller, &caller).map(|_| CallOutcome::Done),
            MarketCall::SetFederatedAggregator { caller } => self.set_federated_aggregator(&caller, &caller).map(|_| CallOutcome::Done),
            MarketCall::SetModelBuyer { caller } => self.set_model_buyer(&caller, &caller).map(|_| CallOutcome::Done),
            MarketCall::NewModel { caller, model_id, validators, trainers, buyer } => {
                self.new_model(&caller, &model_id, validators, trainers, &buyer).map(|_| CallOutcome::Done)
            }
            MarketCall::SaveMse { caller, model_id, value, iteration } => self.save_mse(&caller, &model_id, value, iteration).map(|_| CallOutcome::Done),
            MarketCall::SavePartialMse { caller, model_id, value, trainer, iteration } => {
                self.save_partial_mse(&caller, &model_id, value, &trainer, iteration).map(|_| CallOutcome::Done)
            }
            MarketCall::CheckMseForIter { caller, model_id, iteration, expected } => {
                self.check_mse_for_iter(&caller, &model_id, iteration, expected).map(CallOutcome::Verified)
            }
            MarketCall::CheckPartialMseForIter { caller, model_id, trainer, iteration, expected } => {
                self.check_partial_mse_for_iter(&caller, &model_id, &trainer, iteration, expected).map(CallOutcome::Verified)
            }
            MarketCall::PayForModel { caller, model_id, amount, attached } => {
                let attached = attached.unwrap_or(amount);
                self.pay_for_model(&caller, &model_id, amount.0, attached.0).map(|_| CallOutcome::Done)
            }
            MarketCall::FinishModelTraining { caller, model_id } => self.finish_model_training(&caller, &model_id).map(|_| CallOutcome::Done),
            MarketCall::CalculateContributions { caller, model_id } => self.calculate_contributions(&caller, &model_id).map(CallOutcome::Contributions),
            MarketCall::GetImprovement { model_id } => self.get_improvement(&model_id).map(CallOutcome::Improvement),
            MarketCall::GetDoContribution { model_id, trainer } => self.get_do_contribution(&model_id, &trainer).map(CallOutcome::Percentage),
            MarketCall::CalculatePaymentForContribution { model_id, trainer } => {
                self.calculate_payment_for_contribution(&model_id, &trainer).map(|a| CallOutcome::Amount(TokenAmount(a)))
            }
            MarketCall::CalculatePaymentForValidation { model_id } => {
                self.calculate_payment_for_validation(&model_id).map(|a| CallOutcome::Amount(TokenAmount(a)))
            }
            MarketCall::CalculatePaymentForOrchestration { model_id } => {
                self.calculate_payment_for_orchestration(&model_id).map(|a| CallOutcome::Amount(TokenAmount(a)))
            }
            MarketCall::PayForContribution { caller, model_id } => self.pay_for_contribution(&caller, &model_id).map(CallOutcome::Payout),
            MarketCall::PayForValidation { caller, model_id } => self.pay_for_validation(&caller, &model_id).map(CallOutcome::Payout),
            MarketCall::PayForOrchestration { caller, model_id } => self.pay_for_orchestration(&caller, &model_id).map(CallOutcome::Payout),
        }
    }
}
