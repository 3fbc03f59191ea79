//! Cross-module scenarios exercising the LUT store, sampler, and session
//! manager together against a fixture directory, matching spec scenarios
//! A/B/D (three-outcome table, weight rewrite, forced outcome).

use slotlab_core::config::LibraryConfig;
use slotlab_core::hub::Hub;
use slotlab_core::lut::LutStore;
use slotlab_core::session::SessionManager;
use std::sync::Arc;

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("index.json"),
        r#"{"modes":[{"name":"base","cost":1.0,"weights":"base.csv"}]}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("base.csv"), "0,50,0\n1,30,200\n2,20,1000\n").unwrap();
    dir
}

#[test]
fn scenario_a_three_outcome_table_statistics() {
    let dir = fixture();
    let store = LutStore::open(dir.path()).unwrap();
    let stats = store.analyze("base").unwrap();

    assert!((stats.hit_rate - 0.50).abs() < 1e-9);
    assert!((stats.rtp - 2.60).abs() < 1e-9);
    assert_eq!(stats.max_payout, 10.00);
    assert_eq!(stats.min_nonzero_payout, Some(2.00));
}

#[test]
fn scenario_b_rewrite_weights_then_reanalyze() {
    let dir = fixture();
    let store = LutStore::open(dir.path()).unwrap();

    store.rewrite_weights("base", &[10, 10, 10], false).unwrap();
    let stats = store.analyze("base").unwrap();

    assert!((stats.hit_rate - (2.0 / 3.0)).abs() < 1e-9);
    assert!((stats.rtp - 4.0).abs() < 1e-9);

    let contents = std::fs::read_to_string(dir.path().join("base.csv")).unwrap();
    let rows: Vec<&str> = contents.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(rows.len(), 3);
    for (i, row) in rows.iter().enumerate() {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[0], i.to_string());
        assert_eq!(fields[1], "10");
    }
}

#[tokio::test]
async fn scenario_d_forced_outcome_then_random_play() {
    let dir = fixture();
    let config = LibraryConfig::new(dir.path());
    let lut = Arc::new(LutStore::open(dir.path()).unwrap());
    let hub = Hub::new(config.hub_inbound_queue, config.hub_subscriber_queue);
    let manager = SessionManager::new(config, lut, hub);

    let session_id = manager.get_or_create(None).id;
    manager.set_balance(session_id, 1000).unwrap();
    manager.force_outcome(session_id, "base", 2).unwrap();

    // sim_id 2 pays 1000 (10x): bet 100, win 1000, balance 1000 - 100 + 1000 = 1900.
    let first = manager.play(session_id, "base", 1.0).unwrap();
    assert_eq!(first.round.balance_after, 1900);
    assert_eq!(first.round.sim_id, 2);

    // Forced sim-id was consumed, so the second play draws randomly.
    let second = manager.play(session_id, "base", 1.0).unwrap();
    assert!(second.round.balance_after >= 0);
}
