use std::sync::Arc;
use std::thread;

use flm_core::{split_percentages, MarketError, Marketplace, ModelState, PaymentKind, UNIT};
use rand::Rng;

const MODEL: &str = "model1";

fn marketplace() -> Marketplace {
    let market = Marketplace::default();
    for p in ["trainer1", "trainer2", "trainer3", "trainer4", "validator1", "validator2"] {
        market.set_data_owner(p, p).unwrap();
    }
    market.set_federated_aggregator("fed_aggr", "fed_aggr").unwrap();
    market.set_model_buyer("model_buyer", "model_buyer").unwrap();
    market
}

fn two_trainer_model(market: &Marketplace) {
    market
        .new_model("fed_aggr", MODEL, vec!["validator1".into()], vec!["trainer1".into(), "trainer2".into()], "model_buyer")
        .unwrap();
}

#[test]
fn first_iteration_checks_round_trip() {
    let market = marketplace();
    two_trainer_model(&market);
    market.save_mse("fed_aggr", MODEL, 900, 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 900, "trainer1", 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 800, "trainer2", 0).unwrap();
    assert!(market.check_mse_for_iter("model_buyer", MODEL, 0, 900).unwrap());
    assert!(!market.check_mse_for_iter("model_buyer", MODEL, 0, 901).unwrap());
    assert!(market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer1", 0, 900).unwrap());
    assert!(market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer2", 0, 800).unwrap());
    assert!(!market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer2", 1, 800).unwrap());
}

#[test]
fn contributions_measured_from_baseline_at_last_iteration() {
    let market = marketplace();
    two_trainer_model(&market);
    market.save_mse("fed_aggr", MODEL, 900, 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 900, "trainer1", 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 800, "trainer2", 0).unwrap();
    market.save_mse("fed_aggr", MODEL, 800, 1).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 890, "trainer1", 1).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 700, "trainer2", 1).unwrap();
    market.pay_for_model("model_buyer", MODEL, UNIT, UNIT).unwrap();
    market.finish_model_training("model_buyer", MODEL).unwrap();
    let report = market.calculate_contributions("fed_aggr", MODEL).unwrap();
    assert_eq!(report.final_iteration, 1);
    assert_eq!(report.shares[0].delta, 10);
    assert_eq!(report.shares[1].delta, 200);
    assert_eq!(market.get_do_contribution(MODEL, "trainer1").unwrap(), 5);
    assert_eq!(market.get_do_contribution(MODEL, "trainer2").unwrap(), 95);
    assert_eq!(market.get_improvement(MODEL).unwrap(), 100);
}

#[test]
fn full_training_cycle_settles_escrow() {
    let market = marketplace();
    two_trainer_model(&market);
    let deposit = 5 * UNIT;
    market.pay_for_model("model_buyer", MODEL, deposit, deposit).unwrap();

    let mut mse = 1000;
    market.save_mse("fed_aggr", MODEL, mse, 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, mse, "trainer1", 0).unwrap();
    assert!(market.check_mse_for_iter("model_buyer", MODEL, 0, mse).unwrap());
    assert!(market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer1", 0, mse).unwrap());
    for i in 1..=50 {
        mse -= 10;
        market.save_mse("fed_aggr", MODEL, mse, i).unwrap();
        market.save_partial_mse("fed_aggr", MODEL, mse + 8, "trainer1", i).unwrap();
        market.save_partial_mse("fed_aggr", MODEL, mse - 2, "trainer2", i).unwrap();
        assert!(market.check_mse_for_iter("model_buyer", MODEL, i, mse).unwrap());
        assert!(market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer1", i, mse + 8).unwrap());
        assert!(!market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer1", i, mse - 2).unwrap());
    }
    market.finish_model_training("model_buyer", MODEL).unwrap();
    market.calculate_contributions("fed_aggr", MODEL).unwrap();

    assert_eq!(market.get_improvement(MODEL).unwrap(), 500);
    let pct1 = market.get_do_contribution(MODEL, "trainer1").unwrap();
    let pct2 = market.get_do_contribution(MODEL, "trainer2").unwrap();
    assert_eq!((pct1, pct2), (49, 51));

    let contrib1 = market.calculate_payment_for_contribution(MODEL, "trainer1").unwrap();
    let contrib2 = market.calculate_payment_for_contribution(MODEL, "trainer2").unwrap();
    let validation = market.calculate_payment_for_validation(MODEL).unwrap();
    let orchestration = market.calculate_payment_for_orchestration(MODEL).unwrap();
    for c in [contrib1, contrib2] {
        assert!(c > UNIT * 8 / 10, "{c}");
        assert!(c < UNIT, "{c}");
    }
    assert_eq!(validation, UNIT);
    assert_eq!(orchestration, UNIT / 2);

    let paid: u128 = [
        market.pay_for_contribution("trainer1", MODEL).unwrap(),
        market.pay_for_contribution("trainer2", MODEL).unwrap(),
        market.pay_for_validation("validator1", MODEL).unwrap(),
        market.pay_for_orchestration("fed_aggr", MODEL).unwrap(),
    ]
    .iter()
    .map(|p| p.amount)
    .sum();
    assert_eq!(paid, contrib1 + contrib2 + validation + orchestration);
    assert!(paid <= deposit);
    assert_eq!(market.escrow_balance(MODEL).unwrap(), deposit - paid);

    let log = market.payouts();
    assert_eq!(log.len(), 4);
    assert_eq!(log[2].kind, PaymentKind::Validation);
}

#[test]
fn one_shot_operations_reject_repeats() {
    let market = marketplace();
    two_trainer_model(&market);
    market.pay_for_model("model_buyer", MODEL, UNIT, UNIT).unwrap();
    market.save_mse("fed_aggr", MODEL, 500, 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 400, "trainer1", 0).unwrap();

    let err = market.calculate_contributions("fed_aggr", MODEL).unwrap_err();
    assert!(matches!(err, MarketError::InvalidState { state: ModelState::Training, .. }));

    market.finish_model_training("model_buyer", MODEL).unwrap();
    market.calculate_contributions("fed_aggr", MODEL).unwrap();
    assert_eq!(market.calculate_contributions("fed_aggr", MODEL).unwrap_err(), MarketError::AlreadyCalculated(MODEL.into()));

    market.pay_for_contribution("trainer1", MODEL).unwrap();
    let err = market.pay_for_contribution("trainer1", MODEL).unwrap_err();
    assert!(matches!(err, MarketError::AlreadyPaid { .. }));
    assert!(matches!(market.pay_for_contribution("validator1", MODEL).unwrap_err(), MarketError::Unauthorized { .. }));
    assert!(matches!(market.pay_for_orchestration("trainer2", MODEL).unwrap_err(), MarketError::Unauthorized { .. }));
}

#[test]
fn out_of_order_iterations_are_accepted() {
    let market = marketplace();
    two_trainer_model(&market);
    market.save_mse("fed_aggr", MODEL, 700, 3).unwrap();
    market.save_mse("fed_aggr", MODEL, 1000, 0).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 650, "trainer2", 3).unwrap();
    market.save_partial_mse("fed_aggr", MODEL, 990, "trainer1", 1).unwrap();
    assert_eq!(market.snapshot(MODEL).unwrap().current_iteration(), Some(3));
    market.pay_for_model("model_buyer", MODEL, UNIT, UNIT).unwrap();
    market.finish_model_training("model_buyer", MODEL).unwrap();
    let report = market.calculate_contributions("fed_aggr", MODEL).unwrap();
    // trainer1 never reported at iteration 3
    assert_eq!(report.percentage_of("trainer1"), Some(0));
    assert_eq!(report.percentage_of("trainer2"), Some(100));
    assert_eq!(report.improvement, 300);
}

#[test]
fn validators_share_their_pool() {
    let market = marketplace();
    market
        .new_model("fed_aggr", MODEL, vec!["validator1".into(), "validator2".into()], vec!["trainer1".into()], "model_buyer")
        .unwrap();
    market.pay_for_model("model_buyer", MODEL, 10 * UNIT, 10 * UNIT).unwrap();
    assert_eq!(market.calculate_payment_for_validation(MODEL).unwrap(), UNIT);
    assert_eq!(market.calculate_payment_for_orchestration(MODEL).unwrap(), UNIT);
}

#[test]
fn concurrent_writers_each_commit() {
    let market = Arc::new(marketplace());
    two_trainer_model(&market);
    market.save_mse("fed_aggr", MODEL, 1000, 0).unwrap();
    let handles: Vec<_> = (1..=8u64)
        .map(|i| {
            let market = Arc::clone(&market);
            thread::spawn(move || {
                market.save_mse("fed_aggr", MODEL, 1000 - i * 10, i).unwrap();
                market.save_partial_mse("fed_aggr", MODEL, 1000 - i * 12, "trainer1", i).unwrap();
            })
        })
        .collect();
    for h in handles { h.join().unwrap(); }
    for i in 1..=8u64 {
        assert!(market.check_mse_for_iter("model_buyer", MODEL, i, 1000 - i * 10).unwrap());
        assert!(market.check_partial_mse_for_iter("model_buyer", MODEL, "trainer1", i, 1000 - i * 12).unwrap());
    }
}

#[test]
fn random_splits_sum_to_hundred() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let n = rng.gen_range(1..12);
        let deltas: Vec<u64> = (0..n).map(|_| if rng.gen_bool(0.2) { 0 } else { rng.gen_range(0..10_000) }).collect();
        let split = split_percentages(&deltas);
        assert_eq!(split.len(), deltas.len());
        assert_eq!(split.iter().map(|p| *p as u32).sum::<u32>(), 100, "{deltas:?}");
    }
}
