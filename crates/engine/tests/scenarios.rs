use chrono::{DateTime, Duration, TimeZone, Utc};
use circuit_core::{AppConfig, PlayerSegment, RevenueEventType};
use circuit_engine::{Catalog, MonetizationEngine, RecordingEconomy, Scheduler};
use circuit_experiments::{CompletionReason, Experiment, ExperimentStatus, Variant};
use std::sync::Arc;

/// Wednesday mid-morning UTC: no peak-hour or weekend pricing.
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap()
}

fn engine_with(config: AppConfig, catalog: Catalog) -> (MonetizationEngine, Arc<RecordingEconomy>) {
    let economy = Arc::new(RecordingEconomy::default());
    let engine = MonetizationEngine::from_config(config, catalog, economy.clone()).unwrap();
    (engine, economy)
}

fn engine() -> (MonetizationEngine, Arc<RecordingEconomy>) {
    engine_with(AppConfig::default(), Catalog::default())
}

fn price_test_catalog() -> Catalog {
    let experiment = Experiment::new(
        "gem-price",
        "Gem pack price test",
        vec![Variant::new("control", 1.0), Variant::new("discount", 0.8)],
        t0() + Duration::days(14),
    )
    .with_products(["gems"])
    .with_auto_promote(true);
    Catalog {
        experiments: vec![experiment],
        ..Catalog::default()
    }
}

fn players_for(engine: &MonetizationEngine, variant: usize, n: usize) -> Vec<String> {
    (0..)
        .map(|i| format!("runner-{i}"))
        .filter(|p| engine.experiments().assign_variant("gem-price", p) == Some(variant))
        .take(n)
        .collect()
}

#[test]
fn whale_purchase_is_classified_and_published() {
    let (engine, _) = engine();
    let profile = engine.on_purchase("p1", "mega_pack", 250.0, t0()).unwrap();

    assert_eq!(profile.segment, PlayerSegment::Whale);
    assert_eq!(profile.segment_confidence, 1.0);

    let changes = engine.drain_segment_events();
    assert_eq!(changes.last().map(|c| c.current), Some(PlayerSegment::Whale));
    assert!(engine.drain_segment_events().is_empty());

    engine.profiles().set_region("p1", "US", t0());
    let quote = engine.price_for("p1", "gems", 10.0, t0()).unwrap();
    assert!((quote.factor - 1.10).abs() < 1e-12);
    assert!((quote.final_price - 11.0).abs() < 1e-9);
}

#[test]
fn ledger_keeps_newest_events() {
    let mut config = AppConfig::default();
    config.ledger.capacity = 3;
    let (engine, _) = engine_with(config, Catalog::default());

    for i in 1..=4 {
        engine.on_offer_shown(&format!("E{i}"), "starter_bundle", t0());
    }
    let players: Vec<_> = engine
        .ledger()
        .snapshot()
        .into_iter()
        .map(|e| e.player_id)
        .collect();
    assert_eq!(players, vec!["E2", "E3", "E4"]);
    assert_eq!(engine.ledger().total_evicted(), 1);
}

#[test]
fn experiment_promotes_winner_after_sample_size() {
    let (engine, _) = engine_with(AppConfig::default(), price_test_catalog());
    engine.start_experiment("gem-price", t0()).unwrap();

    let control = players_for(&engine, 0, 65);
    let discount = players_for(&engine, 1, 35);

    for player in control.iter().take(40).chain(discount.iter()) {
        let quote = engine.price_for(player, "gems", 5.0, t0()).unwrap();
        assert!(quote.variant.is_some());
    }
    for player in control.iter().take(10) {
        engine.on_purchase(player, "gems", 5.0, t0()).unwrap();
    }
    for player in discount.iter().take(20) {
        engine.on_purchase(player, "gems", 4.0, t0()).unwrap();
    }

    let exp = engine.experiments().get("gem-price").unwrap();
    assert_eq!(exp.total_impressions(), 75);
    assert_eq!(exp.total_conversions(), 30);
    assert_eq!(exp.status, ExperimentStatus::Active);

    // Reaching the sample size through impressions alone decides nothing.
    for player in control.iter().skip(40) {
        engine.price_for(player, "gems", 5.0, t0()).unwrap();
    }
    let exp = engine.experiments().get("gem-price").unwrap();
    assert_eq!(exp.total_impressions(), 100);
    assert_eq!(exp.status, ExperimentStatus::Active);

    engine.on_purchase(&discount[20], "gems", 4.0, t0()).unwrap();

    let result = engine.experiments().result("gem-price").unwrap();
    assert_eq!(result.reason, CompletionReason::Significance);
    assert_eq!(result.winner.unwrap().variant_name, "discount");

    // Once completed, the product goes back to the regular factor pipeline.
    let quote = engine.price_for(&control[0], "gems", 5.0, t0()).unwrap();
    assert!(quote.variant.is_none());

    let dashboard = engine.dashboard(t0() + Duration::minutes(1));
    let discount_revenue = dashboard
        .revenue
        .revenue_by_variant
        .iter()
        .find(|v| v.variant_name == "discount")
        .unwrap();
    assert_eq!(discount_revenue.conversions, 21);
    assert!((discount_revenue.revenue - 84.0).abs() < 1e-9);
}

#[test]
fn purchases_count_once_and_only_after_a_quote() {
    let (engine, _) = engine_with(AppConfig::default(), price_test_catalog());
    engine.start_experiment("gem-price", t0()).unwrap();

    // Bought without ever being shown an experiment price.
    engine.on_purchase("walk-in", "gems", 5.0, t0()).unwrap();
    let exp = engine.experiments().get("gem-price").unwrap();
    assert_eq!(exp.total_conversions(), 0);

    engine.price_for("regular", "gems", 5.0, t0()).unwrap();
    engine.on_purchase("regular", "gems", 5.0, t0()).unwrap();
    engine.on_purchase("regular", "gems", 5.0, t0()).unwrap();
    let exp = engine.experiments().get("gem-price").unwrap();
    assert_eq!(exp.total_impressions(), 1);
    assert_eq!(exp.total_conversions(), 1);

    let attributed: Vec<_> = engine
        .ledger()
        .snapshot()
        .into_iter()
        .filter(|e| e.event_type == RevenueEventType::Purchase)
        .map(|e| e.variant.is_some())
        .collect();
    assert_eq!(attributed, vec![false, true, false]);
}

#[test]
fn implausible_session_lengths_do_not_panic() {
    let (engine, _) = engine();
    engine.on_session("p1", t0(), 1e12);
    let profile = engine.on_session("p1", t0(), f64::INFINITY);

    assert_eq!(profile.session_count, 2);
    assert_eq!(profile.total_play_minutes, 0.0);
    let session_ends: Vec<_> = engine
        .ledger()
        .snapshot()
        .into_iter()
        .filter(|e| e.event_type == RevenueEventType::SessionEnd)
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(session_ends, vec![t0(), t0()]);
}

#[test]
fn identical_histories_give_identical_decisions() {
    let (a, _) = engine_with(AppConfig::default(), price_test_catalog());
    let (b, _) = engine_with(AppConfig::default(), price_test_catalog());
    a.start_experiment("gem-price", t0()).unwrap();
    b.start_experiment("gem-price", t0()).unwrap();

    for engine in [&a, &b] {
        engine.on_session("p1", t0(), 35.0);
        engine.on_session("p1", t0() + Duration::hours(2), 25.0);
        engine.on_purchase("p1", "coins", 19.99, t0() + Duration::hours(3)).unwrap();
        engine.on_ad_result("p1", "rewarded_revive", 0.03, true, t0() + Duration::hours(4));
    }

    let pa = a.profiles().get("p1").unwrap();
    let pb = b.profiles().get("p1").unwrap();
    assert_eq!(pa.segment, pb.segment);
    assert_eq!(pa.segment_confidence, pb.segment_confidence);
    assert_eq!(pa.churn_risk, pb.churn_risk);

    let now = t0() + Duration::hours(5);
    let qa = a.price_for("p1", "gems", 5.0, now).unwrap();
    let qb = b.price_for("p1", "gems", 5.0, now).unwrap();
    assert_eq!(qa.final_price, qb.final_price);
    assert_eq!(qa.variant, qb.variant);
}

#[test]
fn ad_results_count_impressions_and_revenue() {
    let (engine, _) = engine();
    engine.on_ad_result("p1", "rewarded_revive", 0.02, true, t0());
    engine.on_ad_result("p1", "rewarded_revive", 0.02, false, t0());

    assert_eq!(engine.profiles().get("p1").unwrap().ads_watched, 1);
    let metrics = engine.dashboard(t0()).revenue;
    assert_eq!(metrics.count(RevenueEventType::AdImpression), 2);
    assert_eq!(metrics.count(RevenueEventType::AdCompleted), 1);
    assert!((metrics.ad_revenue - 0.02).abs() < 1e-12);
}

#[test]
fn lapsed_player_gets_one_comeback_bundle() {
    let (engine, economy) = engine();
    engine.on_session("p1", t0(), 5.0);
    assert_eq!(economy.grants_for("p1"), 0);

    let later = t0() + Duration::days(30);
    engine.refresh_churn(later);
    engine.refresh_churn(later + Duration::hours(1));

    let profile = engine.profiles().get("p1").unwrap();
    assert_eq!(profile.segment, PlayerSegment::AtRisk);
    assert_eq!(economy.grants_for("p1"), 3);

    let rewards = engine
        .ledger()
        .snapshot()
        .into_iter()
        .filter(|e| e.event_type == RevenueEventType::RetentionReward)
        .count();
    assert_eq!(rewards, 1);
}

#[test]
fn invalid_inputs_are_rejected() {
    let (engine, _) = engine();
    assert!(engine.price_for("p1", "gems", 0.0, t0()).is_err());
    assert!(engine.on_purchase("p1", "gems", f64::NAN, t0()).is_err());
    assert!(engine.price_catalog_product("p1", "unknown", t0()).is_err());

    let mut config = AppConfig::default();
    config.pricing.max_adjustment = 1.5;
    let economy = Arc::new(RecordingEconomy::default());
    assert!(MonetizationEngine::from_config(config, Catalog::default(), economy).is_err());
}

#[test]
fn scheduler_runs_engine_jobs() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let scheduler = Scheduler::new();
    engine.schedule(&scheduler, t0());
    assert_eq!(
        scheduler.task_names(),
        vec!["analytics", "experiment_sweep", "quote_eviction", "churn_refresh"]
    );

    engine.on_purchase("p1", "coins", 9.99, t0()).unwrap();
    assert!(engine.latest_dashboard().is_none());

    let ran = scheduler.tick(t0() + Duration::seconds(60));
    assert_eq!(ran, vec!["analytics", "experiment_sweep"]);
    let dashboard = engine.latest_dashboard().unwrap();
    assert_eq!(dashboard.player_count, 1);
    assert!((dashboard.revenue.total_revenue - 9.99).abs() < 1e-9);
}
