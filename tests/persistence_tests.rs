//! Persistence Integration Tests
//!
//! Tests for:
//! - Snapshot save / load round trips
//! - Journal replay after a crash (no snapshot taken)
//! - Structural changes and cascades through replay
//! - Rules being deliberately absent from persisted state

use cuboid::{Config, Database, FileJournal, PersistHook, RuleDef};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

/// Install a subscriber once so recovery logs show up under
/// `RUST_LOG=cuboid=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn persistent_config(data_dir: &Path) -> Config {
    init_tracing();
    let mut config = Config::default();
    config.persistence.enabled = true;
    config.persistence.data_dir = data_dir.to_path_buf();
    config
}

fn build_sample(db: &Database) {
    db.add_dimension("years").expect("dim");
    {
        let mut edit = db.edit_dimension("years").expect("edit");
        edit.add_member("2021", None, 1.0).expect("member");
        edit.add_member("2022", None, 1.0).expect("member");
        edit.commit().expect("commit");
    }
    db.add_dimension("regions").expect("dim");
    {
        let mut edit = db.edit_dimension("regions").expect("edit");
        edit.add_member("Total", None, 1.0).expect("member");
        edit.add_member("North", Some("Total"), 1.0).expect("member");
        edit.add_member("South", Some("Total"), -1.0).expect("member");
        edit.commit().expect("commit");
    }
    let cube = db.add_cube("sales", &["years", "regions"]).expect("cube");
    cube.write(&["2021", "North"], 400.0).expect("write");
    cube.write(&["2021", "South"], 100.0).expect("write");
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_snapshot_round_trip() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        db.save().expect("save");
    }

    let db = Database::with_config("planning", config).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    // every base read returns the same value
    assert_eq!(cube.read(&["2021", "North"]).expect("read"), 400.0);
    assert_eq!(cube.read(&["2021", "South"]).expect("read"), 100.0);
    // hierarchy and weights survived (South carries weight -1)
    assert_eq!(cube.read(&["2021", "regions:Total"]).expect("read"), 300.0);
}

#[test]
fn test_journal_replay_without_snapshot() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        // dropped without save(): only the journal exists
    }

    let db = Database::with_config("planning", config).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    assert_eq!(cube.read(&["2021", "North"]).expect("read"), 400.0);
    assert_eq!(cube.read(&["2021", "regions:Total"]).expect("read"), 300.0);
}

#[test]
fn test_snapshot_plus_tail_journal() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        db.save().expect("save");
        // writes after the snapshot land in the journal only
        let cube = db.cube("sales").expect("cube");
        cube.write(&["2022", "North"], 50.0).expect("write");
    }

    let db = Database::with_config("planning", config).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    assert_eq!(cube.read(&["2021", "North"]).expect("read"), 400.0);
    assert_eq!(cube.read(&["2022", "North"]).expect("read"), 50.0);
}

#[test]
fn test_structural_edit_replays_with_cascade() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        let mut edit = db.edit_dimension("regions").expect("edit");
        edit.remove_member("South").expect("remove");
        edit.commit().expect("commit");
    }

    let db = Database::with_config("planning", config).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    // the cascade deletion of South's fact replayed too
    assert_eq!(cube.fact_count(), 1);
    assert_eq!(cube.read(&["2021", "regions:Total"]).expect("read"), 400.0);
    assert!(!db
        .dimension("regions")
        .expect("dim")
        .contains_member("South"));
}

#[test]
fn test_rename_survives_reopen() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        let mut edit = db.edit_dimension("regions").expect("edit");
        edit.add_alias("North", "N").expect("alias");
        edit.rename("North", "Nord").expect("rename");
        edit.commit().expect("commit");
        db.save().expect("save");
    }

    let db = Database::with_config("planning", config).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    assert_eq!(cube.read(&["2021", "Nord"]).expect("read"), 400.0);
    assert_eq!(cube.read(&["2021", "N"]).expect("read"), 400.0);
    assert!(cube.read(&["2021", "North"]).is_err());
}

// ============================================================================
// Rules are code, not data
// ============================================================================

#[test]
fn test_rules_are_not_persisted() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        let cube = db.cube("sales").expect("cube");
        cube.add_rule(RuleDef::new("fixed", &["regions:North"], |_| 1.0.into()))
            .expect("rule");
        assert_eq!(cube.read(&["2021", "North"]).expect("read"), 1.0);
        db.save().expect("save");
    }

    let db = Database::with_config("planning", config).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    assert_eq!(cube.rule_count(), 0);
    // stored values come back; the rule's effect does not
    assert_eq!(cube.read(&["2021", "North"]).expect("read"), 400.0);
}

// ============================================================================
// Custom backend through the hook
// ============================================================================

#[test]
fn test_caller_supplied_backend() {
    let temp = TempDir::new().expect("tempdir");
    let backend: Arc<dyn PersistHook> = Arc::new(
        FileJournal::new(temp.path().join("custom"), true).expect("journal"),
    );

    {
        let db = Database::open("planning", Config::default(), Arc::clone(&backend))
            .expect("db");
        build_sample(&db);
        db.save().expect("save");
    }

    let db = Database::open("planning", Config::default(), backend).expect("reopen");
    let cube = db.cube("sales").expect("cube");
    assert_eq!(cube.read(&["2021", "North"]).expect("read"), 400.0);
}

#[test]
fn test_close_flushes_snapshot() {
    let temp = TempDir::new().expect("tempdir");
    let config = persistent_config(temp.path());

    {
        let db = Database::with_config("planning", config.clone()).expect("db");
        build_sample(&db);
        db.close().expect("close");
    }

    let db = Database::with_config("planning", config).expect("reopen");
    assert_eq!(db.list_cubes(), vec!["sales"]);
    assert_eq!(
        db.cube("sales")
            .expect("cube")
            .read(&["2021", "North"])
            .expect("read"),
        400.0
    );
}
