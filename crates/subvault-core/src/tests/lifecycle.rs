use crate::capacity::MIB;
use crate::commands::backup::{self, BackupRequest};
use crate::commands::{list, reconcile, restore};
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
fn backup_list_crash_reconcile_restore() {
    let env = TestVault::with_sizes(4 * MIB, 3 * MIB);

    // Three backups on a volume that has to grow for them.
    let mut vault = env.open().unwrap();
    let mut paths = Vec::new();
    for ts in [1_700_000_000, 1_700_003_600, 1_700_007_200] {
        paths.push(backup::run(&mut vault, &at(ts)).unwrap().path);
    }
    assert!(env.volume.grow_count() >= 1);
    vault.close().unwrap();

    // A run that died after creating its container.
    env.volume.fail("set_property");
    let mut vault = env.open().unwrap();
    let request = BackupRequest {
        compression: Some(Compression::parse("zstd").unwrap()),
        ..at(1_700_010_800)
    };
    assert!(backup::run(&mut vault, &request).is_err());
    drop(vault);
    env.volume.heal("set_property");

    let mut vault = env.open().unwrap();
    let listed: Vec<_> = list::list_backups(&mut vault)
        .unwrap()
        .into_iter()
        .map(|b| b.path)
        .collect();
    assert_eq!(listed, paths);
    assert!(reconcile::run(&mut vault).unwrap().is_clean());
    assert_eq!(vault.journal().list_backups().len(), 4);

    let restored = restore::run(&mut vault, "backup_1700003600").unwrap();
    assert_eq!(restored, paths[1]);
    assert!(matches!(
        restore::run(&mut vault, "backup_1700010800"),
        Err(VaultError::BackupNotFound(_))
    ));
    assert_eq!(env.transfer.restores(), [paths[1].clone()]);
    vault.close().unwrap();

    assert!(!env.volume.is_mounted());
    assert!(!env.volume.is_attached());
}
