//! Marketplace metric groups (lifecycle, ledger, settlement).
//!
//! Instruments go through the global meter; without an installed provider
//! they are no-ops, so library users opt in by configuring OpenTelemetry.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter, Unit};
use opentelemetry::KeyValue;

use crate::settlement::{Amount, PaymentKind, UNIT};

pub struct LedgerMetrics {
    pub writes_total: Counter<u64>,
    pub checks_total: Counter<u64>,
    pub check_mismatches_total: Counter<u64>,
}

pub struct SettlementMetrics {
    pub deposits_total: Counter<u64>,
    pub payouts_total: Counter<u64>,
    pub payout_units: Histogram<f64>,
}

pub struct MarketMetrics {
    pub models_created_total: Counter<u64>,
    pub contributions_calculated_total: Counter<u64>,
    pub rejected_total: Counter<u64>,
    pub ledger: LedgerMetrics,
    pub settlement: SettlementMetrics,
}

static MARKET_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("flm_market"));

pub static MARKET_METRICS: Lazy<MarketMetrics> = Lazy::new(|| {
    MarketMetrics {
        models_created_total: MARKET_METER.u64_counter("flm_models_created_total").with_description("Models registered for training").init(),
        contributions_calculated_total: MARKET_METER.u64_counter("flm_contributions_calculated_total").with_description("Contribution splits computed").init(),
        rejected_total: MARKET_METER.u64_counter("flm_operations_rejected_total").with_description("Operations aborted, labelled by error kind").init(),
        ledger: LedgerMetrics {
            writes_total: MARKET_METER.u64_counter("flm_ledger_writes_total").with_description("Global and partial MSE writes").init(),
            checks_total: MARKET_METER.u64_counter("flm_ledger_checks_total").with_description("Buyer verification reads").init(),
            check_mismatches_total: MARKET_METER.u64_counter("flm_ledger_check_mismatches_total").with_description("Verification reads that did not match").init(),
        },
        settlement: SettlementMetrics {
            deposits_total: MARKET_METER.u64_counter("flm_settlement_deposits_total").with_description("Escrow deposits accepted").init(),
            payouts_total: MARKET_METER.u64_counter("flm_settlement_payouts_total").with_description("Payouts released, labelled by kind").init(),
            payout_units: MARKET_METER.f64_histogram("flm_settlement_payout_units").with_description("Released payout size in whole units").with_unit(Unit::new("unit")).init(),
        },
    }
});

pub(crate) fn record_rejection(kind: &'static str) {
    MARKET_METRICS.rejected_total.add(1, &[KeyValue::new("kind", kind)]);
}

pub(crate) fn record_payout(kind: PaymentKind, amount: Amount) {
    let attrs = [KeyValue::new("kind", kind.as_str())];
    MARKET_METRICS.settlement.payouts_total.add(1, &attrs);
    MARKET_METRICS.settlement.payout_units.record(amount as f64 / UNIT as f64, &attrs);
}
