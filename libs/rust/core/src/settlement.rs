//! Settlement: fee policy, payout arithmetic and the per-model escrow.
//!
//! Shares are expressed in basis points of the deposit. Validators split
//! their pool evenly, the aggregator takes the orchestration share, and
//! trainers split the contribution pool by percentage. All arithmetic is
//! integer and floors, so the sum of payouts never exceeds the deposit.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::contribution::Percentage;
use crate::error::{MarketError, MarketResult};

pub type Amount = u128;

/// One whole currency unit in base units (18 decimals).
pub const UNIT: Amount = 1_000_000_000_000_000_000;
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Parses a decimal unit string ("5", "0.5") into base units.
pub fn parse_units(text: &str) -> Result<Amount, String> {
    let text = text.trim();
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() { return Err("empty amount".into()); }
    if frac.len() > 18 { return Err(format!("{text}: more than 18 decimals")); }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) { return Err(format!("{text}: not a decimal amount")); }
    let whole: Amount = if whole.is_empty() { 0 } else { whole.parse().map_err(|e| format!("{text}: {e}"))? };
    let frac: Amount = if frac.is_empty() { 0 } else { format!("{frac:0<18}").parse().map_err(|e| format!("{text}: {e}"))? };
    whole.checked_mul(UNIT).and_then(|w| w.checked_add(frac)).ok_or_else(|| format!("{text}: amount overflows"))
}

pub fn format_units(amount: Amount) -> String {
    let (whole, frac) = (amount / UNIT, amount % UNIT);
    if frac == 0 { return whole.to_string(); }
    format!("{whole}.{}", format!("{frac:018}").trim_end_matches('0'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPolicy {
    pub validation_bps: u32,
    pub orchestration_bps: u32,
    pub contribution_bps: u32,
}

impl Default for SettlementPolicy {
    fn default() -> Self { Self { validation_bps: 2_000, orchestration_bps: 1_000, contribution_bps: 3_500 } }
}

impl SettlementPolicy {
    pub fn total_bps(&self) -> u64 {
        self.validation_bps as u64 + self.orchestration_bps as u64 + self.contribution_bps as u64
    }

    /// Shares may not promise more than the deposit.
    pub fn is_valid(&self) -> bool { self.total_bps() <= BPS_DENOMINATOR as u64 }

    pub fn contribution_payment(&self, deposit: Amount, percentage: Percentage) -> MarketResult<Amount> {
        let scaled = deposit
            .checked_mul(self.contribution_bps as u128)
            .and_then(|v| v.checked_mul(percentage as u128))
            .ok_or(MarketError::Overflow("contribution payment"))?;
        Ok(scaled / (BPS_DENOMINATOR as u128 * 100))
    }

    /// Per-validator share of the validation pool.
    pub fn validation_payment(&self, deposit: Amount, validators: usize) -> MarketResult<Amount> {
        if validators == 0 { return Ok(0); }
        Ok(bps_of(deposit, self.validation_bps, "validation payment")? / validators as u128)
    }

    pub fn orchestration_payment(&self, deposit: Amount) -> MarketResult<Amount> {
        bps_of(deposit, self.orchestration_bps, "orchestration payment")
    }
}

fn bps_of(amount: Amount, bps: u32, what: &'static str) -> MarketResult<Amount> {
    amount
        .checked_mul(bps as u128)
        .map(|v| v / BPS_DENOMINATOR as u128)
        .ok_or(MarketError::Overflow(what))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentKind { Contribution, Validation, Orchestration }

impl PaymentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentKind::Contribution => "contribution",
            PaymentKind::Validation => "validation",
            PaymentKind::Orchestration => "orchestration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub model_id: String,
    pub party: String,
    pub kind: PaymentKind,
    pub amount: Amount,
    pub paid_at: i64,
}

/// Funds held for one model plus the set of parties already paid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Escrow {
    deposit: Amount,
    disbursed: Amount,
    paid: BTreeMap<String, PaymentKind>,
}

impl Escrow {
    pub fn deposit(&self) -> Amount { self.deposit }
    pub fn disbursed(&self) -> Amount { self.disbursed }
    pub fn available(&self) -> Amount { self.deposit - self.disbursed }
    pub fn is_funded(&self) -> bool { self.deposit > 0 }
    pub fn is_paid(&self, party: &str) -> bool { self.paid.contains_key(party) }

    pub(crate) fn fund(&mut self, amount: Amount) { self.deposit = amount; }

    /// Checks every release precondition without touching the escrow.
    pub fn ensure_releasable(&self, model_id: &str, party: &str, amount: Amount) -> MarketResult<()> {
        if self.is_paid(party) {
            return Err(MarketError::AlreadyPaid { model_id: model_id.to_string(), party: party.to_string() });
        }
        if !self.is_funded() || amount > self.available() {
            return Err(MarketError::InsufficientEscrow { model_id: model_id.to_string(), available: self.available(), required: amount });
        }
        Ok(())
    }

    pub(crate) fn release(&mut self, model_id: &str, party: &str, kind: PaymentKind, amount: Amount) -> MarketResult<Payout> {
        self.ensure_releasable(model_id, party, amount)?;
        self.disbursed += amount;
        self.paid.insert(party.to_string(), kind);
        Ok(Payout { model_id: model_id.to_string(), party: party.to_string(), kind, amount, paid_at: Utc::now().timestamp() })
    }
}
