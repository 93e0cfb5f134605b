//! Marketplace facade: role-gated operations over per-model records.
//!
//! Each model lives behind its own mutex. An operation looks the record up,
//! holds its lock for the whole call and checks every precondition before
//! the first write, so a call either commits completely or changes nothing.
//! Calls on the same model are totally ordered by lock acquisition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::contribution::{calculate_contributions, ContributionReport, Percentage};
use crate::error::{MarketError, MarketResult};
use crate::ledger::{Iteration, MetricLedger, Mse};
use crate::lifecycle::{ModelLifecycle, ModelState};
use crate::metrics_ext::{record_payout, record_rejection, MARKET_METRICS};
use crate::roles::{Role, RoleRegistry};
use crate::settlement::{Amount, Escrow, PaymentKind, Payout, SettlementPolicy};

pub type ModelId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: ModelId,
    pub aggregator: String,
    pub buyer: String,
    pub validators: Vec<String>,
    pub trainers: Vec<String>,
    pub lifecycle: ModelLifecycle,
    pub ledger: MetricLedger,
    pub contributions: Option<ContributionReport>,
    pub escrow: Escrow,
}

impl ModelRecord {
    pub fn state(&self) -> ModelState { self.lifecycle.state() }
    pub fn is_trainer(&self, party: &str) -> bool { self.trainers.iter().any(|t| t == party) }
    pub fn is_validator(&self, party: &str) -> bool { self.validators.iter().any(|v| v == party) }
    pub fn current_iteration(&self) -> Option<Iteration> { self.ledger.current_iteration() }

    fn require_aggregator(&self, caller: &str, action: &'static str) -> MarketResult<()> {
        if caller == self.aggregator { Ok(()) } else { Err(MarketError::unauthorized(caller, action)) }
    }

    fn require_buyer(&self, caller: &str, action: &'static str) -> MarketResult<()> {
        if caller == self.buyer { Ok(()) } else { Err(MarketError::unauthorized(caller, action)) }
    }

    fn require_trainer(&self, trainer: &str) -> MarketResult<()> {
        if self.is_trainer(trainer) {
            Ok(())
        } else {
            Err(MarketError::UnknownTrainer { model_id: self.model_id.clone(), trainer: trainer.to_string() })
        }
    }

    fn require_metric_writes(&self) -> MarketResult<()> {
        if self.state().accepts_metrics() { Ok(()) } else { Err(self.lifecycle.invalid(&self.model_id, "metrics can only be recorded while training")) }
    }

    fn report(&self) -> MarketResult<&ContributionReport> {
        self.contributions.as_ref().ok_or_else(|| self.lifecycle.invalid(&self.model_id, "contributions not calculated"))
    }

    fn locked(&self) -> MarketError {
        self.lifecycle.invalid(&self.model_id, "verified metric cannot change")
    }

    /// First metric write opens the training phase.
    fn mark_training(&mut self) -> MarketResult<()> {
        if self.state() == ModelState::Created { self.lifecycle.advance(&self.model_id, ModelState::Training)?; }
        Ok(())
    }
}

pub struct Marketplace {
    roles: RoleRegistry,
    policy: SettlementPolicy,
    models: RwLock<HashMap<ModelId, Arc<Mutex<ModelRecord>>>>,
    payouts: Mutex<Vec<Payout>>,
}

impl Default for Marketplace {
    fn default() -> Self { Self::new(SettlementPolicy::default()) }
}

impl Marketplace {
    pub fn new(policy: SettlementPolicy) -> Self {
        Self { roles: RoleRegistry::new(), policy, models: RwLock::new(HashMap::new()), payouts: Mutex::new(Vec::new()) }
    }

    pub fn set_data_owner(&self, caller: &str, party: &str) -> MarketResult<()> { self.roles.set_data_owner(caller, party) }
    pub fn set_federated_aggregator(&self, caller: &str, party: &str) -> MarketResult<()> { self.roles.set_federated_aggregator(caller, party) }
    pub fn set_model_buyer(&self, caller: &str, party: &str) -> MarketResult<()> { self.roles.set_model_buyer(caller, party) }

    fn lookup(&self, model_id: &str) -> MarketResult<Arc<Mutex<ModelRecord>>> {
        self.models.read().get(model_id).cloned().ok_or_else(|| MarketError::UnknownModel(model_id.to_string()))
    }

    fn with_model<T>(&self, op: &'static str, model_id: &str, f: impl FnOnce(&mut ModelRecord) -> MarketResult<T>) -> MarketResult<T> {
        let result = self.lookup(model_id).and_then(|record| {
            let mut guard = record.lock();
            f(&mut guard)
        });
        observe(op, model_id, result)
    }

    // ---- lifecycle ----

    #[instrument(skip(self, validators, trainers), fields(validators = validators.len(), trainers = trainers.len()))]
    pub fn new_model(&self, caller: &str, model_id: &str, validators: Vec<String>, trainers: Vec<String>, buyer: &str) -> MarketResult<()> {
        let result = self.create_model(caller, model_id, validators, trainers, buyer);
        observe("new_model", model_id, result)
    }

    fn create_model(&self, caller: &str, model_id: &str, validators: Vec<String>, trainers: Vec<String>, buyer: &str) -> MarketResult<()> {
        self.roles.require(caller, Role::FederatedAggregator, "create models")?;
        if model_id.is_empty() { return Err(MarketError::InvalidModel("model id is empty".into())); }
        if validators.is_empty() { return Err(MarketError::InvalidModel("at least one validator is required".into())); }
        if trainers.is_empty() { return Err(MarketError::InvalidModel("at least one trainer is required".into())); }
        if !self.roles.has_role(buyer, Role::ModelBuyer) {
            return Err(MarketError::InvalidModel(format!("{buyer} is not a registered model buyer")));
        }
        if buyer == caller { return Err(MarketError::InvalidModel("buyer and aggregator must differ".into())); }

        let mut seen: HashSet<&str> = HashSet::from([caller, buyer]);
        for party in validators.iter().chain(trainers.iter()) {
            if !seen.insert(party.as_str()) {
                return Err(MarketError::InvalidModel(format!("{party} appears in more than one role")));
            }
            if !self.roles.has_role(party, Role::DataOwner) {
                return Err(MarketError::InvalidModel(format!("{party} is not a registered data owner")));
            }
        }

        let mut models = self.models.write();
        if models.contains_key(model_id) {
            return Err(MarketError::InvalidModel(format!("model {model_id} already exists")));
        }
        let record = ModelRecord {
            model_id: model_id.to_string(),
            aggregator: caller.to_string(),
            buyer: buyer.to_string(),
            validators,
            trainers,
            lifecycle: ModelLifecycle::new(),
            ledger: MetricLedger::new(),
            contributions: None,
            escrow: Escrow::default(),
        };
        models.insert(model_id.to_string(), Arc::new(Mutex::new(record)));
        MARKET_METRICS.models_created_total.add(1, &[]);
        info!(model_id, aggregator = caller, buyer, "model_created");
        Ok(())
    }

    pub fn finish_model_training(&self, caller: &str, model_id: &str) -> MarketResult<()> {
        self.with_model("finish_model_training", model_id, |rec| {
            rec.require_buyer(caller, "finish training")?;
            rec.lifecycle.ensure(model_id, ModelState::Training, "only a training model can be finished")?;
            if rec.ledger.final_global().is_none() {
                return Err(rec.lifecycle.invalid(model_id, "no global mse recorded"));
            }
            if !rec.escrow.is_funded() {
                return Err(rec.lifecycle.invalid(model_id, "escrow not funded"));
            }
            rec.lifecycle.advance(model_id, ModelState::Finished)?;
            info!(model_id, iterations = rec.ledger.len(), "training_finished");
            Ok(())
        })
    }

    pub fn state(&self, model_id: &str) -> MarketResult<ModelState> {
        self.with_model("state", model_id, |rec| Ok(rec.state()))
    }

    // ---- metric ledger ----

    pub fn save_mse(&self, caller: &str, model_id: &str, value: Mse, iteration: Iteration) -> MarketResult<()> {
        self.with_model("save_mse", model_id, |rec| {
            rec.require_aggregator(caller, "save global mse")?;
            rec.require_metric_writes()?;
            rec.ledger.save_global_mse(iteration, value).map_err(|_| rec.locked())?;
            rec.mark_training()?;
            MARKET_METRICS.ledger.writes_total.add(1, &[]);
            info!(model_id, iteration, value, "global_mse_saved");
            Ok(())
        })
    }

    pub fn save_partial_mse(&self, caller: &str, model_id: &str, value: Mse, trainer: &str, iteration: Iteration) -> MarketResult<()> {
        self.with_model("save_partial_mse", model_id, |rec| {
            rec.require_aggregator(caller, "save partial mse")?;
            rec.require_trainer(trainer)?;
            rec.require_metric_writes()?;
            rec.ledger.save_partial_mse(trainer, iteration, value).map_err(|_| rec.locked())?;
            rec.mark_training()?;
            MARKET_METRICS.ledger.writes_total.add(1, &[]);
            info!(model_id, trainer, iteration, value, "partial_mse_saved");
            Ok(())
        })
    }

    /// Mismatches and missing iterations return `Ok(false)`.
    pub fn check_mse_for_iter(&self, caller: &str, model_id: &str, iteration: Iteration, expected: Mse) -> MarketResult<bool> {
        self.with_model("check_mse_for_iter", model_id, |rec| {
            rec.require_buyer(caller, "verify global mse")?;
            Ok(record_check(rec.ledger.check_global_mse(iteration, expected)))
        })
    }

    pub fn check_partial_mse_for_iter(&self, caller: &str, model_id: &str, trainer: &str, iteration: Iteration, expected: Mse) -> MarketResult<bool> {
        self.with_model("check_partial_mse_for_iter", model_id, |rec| {
            rec.require_buyer(caller, "verify partial mse")?;
            rec.require_trainer(trainer)?;
            Ok(record_check(rec.ledger.check_partial_mse(trainer, iteration, expected)))
        })
    }

    // ---- contributions ----

    #[instrument(skip(self))]
    pub fn calculate_contributions(&self, caller: &str, model_id: &str) -> MarketResult<ContributionReport> {
        self.with_model("calculate_contributions", model_id, |rec| {
            rec.require_aggregator(caller, "calculate contributions")?;
            if rec.contributions.is_some() { return Err(MarketError::AlreadyCalculated(model_id.to_string())); }
            rec.lifecycle.ensure(model_id, ModelState::Finished, "contributions require finished training")?;
            let report = calculate_contributions(&rec.ledger, &rec.trainers)
                .ok_or_else(|| rec.lifecycle.invalid(model_id, "no global mse recorded"))?;
            rec.lifecycle.advance(model_id, ModelState::ContributionsCalculated)?;
            rec.contributions = Some(report.clone());
            MARKET_METRICS.contributions_calculated_total.add(1, &[]);
            for share in &report.shares {
                info!(model_id, trainer = %share.trainer, delta = share.delta, percentage = share.percentage, "contribution_assigned");
            }
            info!(model_id, improvement = report.improvement, final_iteration = report.final_iteration, "contributions_calculated");
            Ok(report)
        })
    }

    pub fn get_improvement(&self, model_id: &str) -> MarketResult<Mse> {
        self.with_model("get_improvement", model_id, |rec| Ok(rec.report()?.improvement))
    }

    pub fn get_do_contribution(&self, model_id: &str, trainer: &str) -> MarketResult<Percentage> {
        self.with_model("get_do_contribution", model_id, |rec| {
            rec.require_trainer(trainer)?;
            let report = rec.report()?;
            Ok(report.percentage_of(trainer).unwrap_or(0))
        })
    }

    // ---- settlement ----

    pub fn pay_for_model(&self, caller: &str, model_id: &str, amount: Amount, attached: Amount) -> MarketResult<()> {
        self.with_model("pay_for_model", model_id, |rec| {
            rec.require_buyer(caller, "deposit escrow")?;
            if !rec.state().accepts_deposit() {
                return Err(rec.lifecycle.invalid(model_id, "deposits close when training finishes"));
            }
            if rec.escrow.is_funded() { return Err(rec.lifecycle.invalid(model_id, "escrow already funded")); }
            if amount != attached || amount == 0 {
                return Err(MarketError::AmountMismatch { declared: amount, attached });
            }
            rec.escrow.fund(amount);
            MARKET_METRICS.settlement.deposits_total.add(1, &[]);
            info!(model_id, buyer = caller, amount = %amount, "escrow_funded");
            Ok(())
        })
    }

    pub fn calculate_payment_for_contribution(&self, model_id: &str, trainer: &str) -> MarketResult<Amount> {
        self.with_model("calculate_payment_for_contribution", model_id, |rec| self.contribution_amount(rec, trainer))
    }

    /// Per-validator share of the validation pool.
    pub fn calculate_payment_for_validation(&self, model_id: &str) -> MarketResult<Amount> {
        self.with_model("calculate_payment_for_validation", model_id, |rec| {
            self.policy.validation_payment(rec.escrow.deposit(), rec.validators.len())
        })
    }

    pub fn calculate_payment_for_orchestration(&self, model_id: &str) -> MarketResult<Amount> {
        self.with_model("calculate_payment_for_orchestration", model_id, |rec| self.policy.orchestration_payment(rec.escrow.deposit()))
    }

    fn contribution_amount(&self, rec: &ModelRecord, trainer: &str) -> MarketResult<Amount> {
        rec.require_trainer(trainer)?;
        let percentage = rec.report()?.percentage_of(trainer).unwrap_or(0);
        self.policy.contribution_payment(rec.escrow.deposit(), percentage)
    }

    pub fn pay_for_contribution(&self, caller: &str, model_id: &str) -> MarketResult<Payout> {
        self.settle(caller, model_id, PaymentKind::Contribution)
    }

    pub fn pay_for_validation(&self, caller: &str, model_id: &str) -> MarketResult<Payout> {
        self.settle(caller, model_id, PaymentKind::Validation)
    }

    pub fn pay_for_orchestration(&self, caller: &str, model_id: &str) -> MarketResult<Payout> {
        self.settle(caller, model_id, PaymentKind::Orchestration)
    }

    fn settle(&self, caller: &str, model_id: &str, kind: PaymentKind) -> MarketResult<Payout> {
        let op = match kind {
            PaymentKind::Contribution => "pay_for_contribution",
            PaymentKind::Validation => "pay_for_validation",
            PaymentKind::Orchestration => "pay_for_orchestration",
        };
        self.with_model(op, model_id, |rec| {
            let entitled = match kind {
                PaymentKind::Contribution => rec.is_trainer(caller),
                PaymentKind::Validation => rec.is_validator(caller),
                PaymentKind::Orchestration => caller == rec.aggregator,
            };
            if !entitled { return Err(MarketError::unauthorized(caller, op)); }
            rec.lifecycle.ensure(model_id, ModelState::ContributionsCalculated, "payments open after contributions are calculated")?;
            let amount = match kind {
                PaymentKind::Contribution => self.contribution_amount(rec, caller)?,
                PaymentKind::Validation => self.policy.validation_payment(rec.escrow.deposit(), rec.validators.len())?,
                PaymentKind::Orchestration => self.policy.orchestration_payment(rec.escrow.deposit())?,
            };
            let payout = rec.escrow.release(model_id, caller, kind, amount)?;
            self.payouts.lock().push(payout.clone());
            record_payout(kind, amount);
            info!(model_id, party = caller, kind = kind.as_str(), amount = %amount, disbursed = %rec.escrow.disbursed(), remaining = %rec.escrow.available(), "payout_released");
            Ok(payout)
        })
    }

    // ---- reads ----

    pub fn snapshot(&self, model_id: &str) -> MarketResult<ModelRecord> {
        self.with_model("snapshot", model_id, |rec| Ok(rec.clone()))
    }

    pub fn escrow_balance(&self, model_id: &str) -> MarketResult<Amount> {
        self.with_model("escrow_balance", model_id, |rec| Ok(rec.escrow.available()))
    }

    pub fn payouts(&self) -> Vec<Payout> { self.payouts.lock().clone() }

    pub fn model_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.models.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn observe<T>(op: &'static str, model_id: &str, result: MarketResult<T>) -> MarketResult<T> {
    if let Err(e) = &result {
        warn!(op, model_id, kind = e.kind(), error = %e, "operation_rejected");
        record_rejection(e.kind());
    }
    result
}

fn record_check(matched: bool) -> bool {
    MARKET_METRICS.ledger.checks_total.add(1, &[]);
    if !matched { MARKET_METRICS.ledger.check_mismatches_total.add(1, &[]); }
    matched
}
