mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use carbotax::clock::ManualClock;
use carbotax::config::ServerErrorSettings;
use carbotax::domain::IdentifierKind;
use carbotax::tracker::{CidSnapshot, FailureLedger, IdentifierSnapshot, ServerErrorTracker};
use common::temp_root;

fn tracker_settings() -> ServerErrorSettings {
    ServerErrorSettings {
        history_size: 100,
        window_secs: 60.0,
        threshold: 5,
        cooldown_secs: 180.0,
    }
}

#[test]
fn threshold_within_window_triggers_one_cooldown() {
    let clock = Arc::new(ManualClock::new());
    let mut tracker = ServerErrorTracker::new(&tracker_settings(), clock.clone());

    let mut cooled = Vec::new();
    for _ in 0..5 {
        clock.advance(Duration::from_secs(1));
        cooled.push(tracker.record_error());
    }

    assert_eq!(cooled, vec![false, false, false, false, true]);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(180)]);
    assert_eq!(tracker.recent_error_count(), 0);
}

#[test]
fn errors_spread_beyond_the_window_do_not_trigger() {
    let clock = Arc::new(ManualClock::new());
    let mut tracker = ServerErrorTracker::new(&tracker_settings(), clock.clone());

    for _ in 0..10 {
        assert!(!tracker.record_error());
        clock.advance(Duration::from_secs(20));
    }
    assert!(clock.sleeps().is_empty());
    assert!(tracker.recent_error_count() < 5);
}

#[test]
fn ring_buffer_bounds_history() {
    let clock = Arc::new(ManualClock::new());
    let settings = ServerErrorSettings {
        history_size: 3,
        threshold: 4,
        ..tracker_settings()
    };
    let mut tracker = ServerErrorTracker::new(&settings, clock.clone());

    for _ in 0..10 {
        assert!(!tracker.record_error());
    }
    assert_eq!(tracker.recent_error_count(), 3);
}

#[test]
fn ledger_dedupes_and_saves_snapshots() {
    let (_temp, root) = temp_root();
    let mut ledger = FailureLedger::new(root.join("failed"));

    ledger.add_failed(IdentifierKind::Inchikey, "AAAA-BBBB-C");
    ledger.add_failed(IdentifierKind::Inchikey, "AAAA-BBBB-C");
    ledger.add_failed(IdentifierKind::Smiles, "C(O)O");
    ledger.add_failed_cid(42);
    ledger.add_failed_cid(42);

    assert_eq!(ledger.failed(IdentifierKind::Inchikey), ["AAAA-BBBB-C"]);
    assert_eq!(ledger.failed_count(None), 2);
    assert_eq!(ledger.failed_count(Some(IdentifierKind::Smiles)), 1);
    assert_eq!(ledger.failed_cids(), [42]);

    let path = ledger.save(IdentifierKind::Inchikey).unwrap().unwrap();
    let file_name = path.file_name().unwrap();
    assert!(file_name.starts_with("failed_inchikey_"));
    let snapshot: IdentifierSnapshot =
        serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
    assert_eq!(snapshot.identifier_type, IdentifierKind::Inchikey);
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.identifiers, vec!["AAAA-BBBB-C".to_string()]);

    let cid_path = ledger.save_failed_cids().unwrap().unwrap();
    let cids: CidSnapshot =
        serde_json::from_str(&fs::read_to_string(cid_path.as_std_path()).unwrap()).unwrap();
    assert_eq!(cids.cids, vec![42]);
}

#[test]
fn saving_with_nothing_pending_is_a_no_op() {
    let (_temp, root) = temp_root();
    let mut ledger = FailureLedger::new(root.join("failed"));

    assert!(ledger.save(IdentifierKind::Smiles).unwrap().is_none());
    ledger.add_failed(IdentifierKind::Smiles, "CCO");
    assert!(ledger.save(IdentifierKind::Smiles).unwrap().is_some());
    assert!(ledger.save(IdentifierKind::Smiles).unwrap().is_none());
    assert!(ledger.save_failed_cids().unwrap().is_none());

    let files = fs::read_dir(root.join("failed").as_std_path()).unwrap().count();
    assert_eq!(files, 1);
}

#[test]
fn flush_writes_every_pending_list() {
    let (_temp, root) = temp_root();
    let mut ledger = FailureLedger::new(root.join("failed"));
    ledger.add_failed(IdentifierKind::Smiles, "CCO");
    ledger.add_failed(IdentifierKind::Inchikey, "AAAA-BBBB-C");
    ledger.add_failed_cid(7);

    assert_eq!(ledger.flush().len(), 3);
    assert!(ledger.flush().is_empty());

    ledger.clear();
    assert_eq!(ledger.failed_count(None), 0);
    assert!(ledger.failed_cids().is_empty());
}
