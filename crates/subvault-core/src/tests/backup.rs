use std::path::PathBuf;

use crate::capacity::MIB;
use crate::commands::backup::{self, BackupPhase, BackupRequest};
use crate::commands::list;
use crate::compress::Compression;
use crate::error::VaultError;
use crate::testutil::TestVault;

fn at(timestamp: i64) -> BackupRequest {
    BackupRequest {
        timestamp: Some(timestamp),
        ..Default::default()
    }
}

#[test]
fn dump_larger_than_free_space_grows_once() {
    let env = TestVault::with_sizes(5 * MIB, 10 * MIB);
    let mut vault = env.open().unwrap();

    let outcome = backup::run(&mut vault, &at(1_700_000_000)).unwrap();
    assert_eq!(outcome.grow_cycles, 1);
    assert_eq!(outcome.size_bytes, 10 * MIB);
    assert_eq!(outcome.name, "backup_1700000000");
    assert_eq!(env.volume.grow_count(), 1);

    let backups = list::list_backups(&mut vault).unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].path, outcome.path);
    vault.close().unwrap();
}

#[test]
fn completed_backup_has_container_with_its_size() {
    let env = TestVault::with_sizes(64 * MIB, 3 * MIB);
    let mut vault = env.open().unwrap();

    let outcome = backup::run(&mut vault, &at(100)).unwrap();
    let record = vault
        .journal()
        .find(&outcome.path.to_string_lossy())
        .unwrap()
        .clone();
    assert!(record.completed);
    assert!(outcome.path.join("data.bin").is_file());

    let sizes = list::list_backup_sizes(&mut vault).unwrap();
    assert_eq!(sizes.len(), 1);
    assert_eq!(sizes[0].container.path, outcome.path);
    assert_eq!(sizes[0].size_exclusive, 3 * MIB);
}

#[test]
fn scratch_directory_is_removed_after_success() {
    let env = TestVault::new();
    let mut vault = env.open().unwrap();

    backup::run(&mut vault, &at(7)).unwrap();
    assert!(!vault.layout().scratch_dir(7).exists());
    assert_eq!(env.transfer.dumps(), [vault.layout().scratch_dir(7)]);
}

#[test]
fn dump_failure_leaves_incomplete_record_and_no_container() {
    let env = TestVault::new();
    env.transfer.fail_dump(true);
    let mut vault = env.open().unwrap();

    let err = backup::run(&mut vault, &at(42)).unwrap_err();
    assert!(matches!(err, VaultError::GatewayFailed { .. }));

    let path = vault.layout().backup_path(42);
    let record = vault.journal().find(&path.to_string_lossy()).unwrap();
    assert!(!record.completed);
    assert!(!env.volume.container_paths().contains(&path));
    assert!(vault.layout().scratch_dir(42).exists());
    assert!(list::list_backups(&mut vault).unwrap().is_empty());
}

#[test]
fn next_run_cleans_up_after_failed_backup() {
    let env = TestVault::new();
    env.volume.fail("set_property");
    let mut vault = env.open().unwrap();

    let request = BackupRequest {
        compression: Some(Compression::parse("zstd:5").unwrap()),
        timestamp: Some(1),
        ..Default::default()
    };
    assert!(backup::run(&mut vault, &request).is_err());
    let failed = vault.layout().backup_path(1);
    assert!(env.volume.container_paths().contains(&failed));

    env.volume.heal("set_property");
    backup::run(&mut vault, &request_at(&request, 2)).unwrap();
    assert!(!env.volume.container_paths().contains(&failed));
    assert!(!vault.layout().scratch_dir(1).exists());
}

fn request_at(request: &BackupRequest, timestamp: i64) -> BackupRequest {
    BackupRequest {
        timestamp: Some(timestamp),
        ..request.clone()
    }
}

#[test]
fn phases_are_reported_in_order() {
    let env = TestVault::new();
    let mut vault = env.open().unwrap();
    let mut phases = Vec::new();

    backup::run_with_progress(&mut vault, &at(5), &mut |phase| phases.push(phase)).unwrap();
    assert_eq!(
        phases,
        [
            BackupPhase::NotStarted,
            BackupPhase::Dumping,
            BackupPhase::SizingAndMaybeGrowing,
            BackupPhase::ContainerCreated,
            BackupPhase::DataMoved,
            BackupPhase::Completed,
        ]
    );
}

#[test]
fn same_timestamp_twice_is_a_duplicate() {
    let env = TestVault::new();
    let mut vault = env.open().unwrap();
    backup::run(&mut vault, &at(9)).unwrap();

    let err = backup::run(&mut vault, &at(9)).unwrap_err();
    assert!(matches!(err, VaultError::DuplicateBackup(_)));
    assert_eq!(list::list_backups(&mut vault).unwrap().len(), 1);
}

#[test]
fn compression_property_is_applied_before_data() {
    let mut env = TestVault::new();
    env.options.compression = Compression::parse("zlib:9").unwrap();
    let mut vault = env.open().unwrap();

    let outcome = backup::run(&mut vault, &at(11)).unwrap();
    assert_eq!(
        env.volume.properties(&outcome.path),
        [("compression".to_string(), "zlib".to_string())]
    );

    let uncompressed = BackupRequest {
        compression: Some(None),
        timestamp: Some(12),
        ..Default::default()
    };
    let outcome = backup::run(&mut vault, &uncompressed).unwrap();
    assert_eq!(
        env.volume.properties(&outcome.path),
        [("compression".to_string(), "none".to_string())]
    );
}

#[test]
fn volume_without_default_compression_sets_no_property() {
    let env = TestVault::new();
    let mut vault = env.open().unwrap();

    let outcome = backup::run(&mut vault, &at(13)).unwrap();
    assert!(env.volume.properties(&outcome.path).is_empty());
}

#[test]
fn incremental_backup_deduplicates_backups_root() {
    let env = TestVault::new();
    let mut vault = env.open().unwrap();

    let full = backup::run(&mut vault, &at(1)).unwrap();
    assert!(!full.deduplicated);
    assert!(env.dedup.calls().is_empty());

    let incremental = BackupRequest {
        deduplicate: true,
        timestamp: Some(2),
        ..Default::default()
    };
    assert!(backup::run(&mut vault, &incremental).unwrap().deduplicated);
    assert_eq!(
        env.dedup.calls(),
        [(vault.layout().backups_root(), 128 * 1024)]
    );
}

#[test]
fn dedup_enabled_in_options_applies_to_every_backup() {
    let mut env = TestVault::new();
    env.options.dedup_by_default = true;
    let mut vault = env.open().unwrap();

    assert!(backup::run(&mut vault, &at(1)).unwrap().deduplicated);
    assert_eq!(env.dedup.calls().len(), 1);
}

#[test]
fn dedup_failure_leaves_backup_incomplete() {
    let env = TestVault::new();
    env.dedup.fail(true);
    let mut vault = env.open().unwrap();

    let request = BackupRequest {
        deduplicate: true,
        timestamp: Some(3),
        ..Default::default()
    };
    assert!(backup::run(&mut vault, &request).is_err());
    let path: PathBuf = vault.layout().backup_path(3);
    assert!(!vault.journal().find(&path.to_string_lossy()).unwrap().completed);
}
