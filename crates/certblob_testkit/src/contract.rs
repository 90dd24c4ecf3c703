//! Reusable checks for the [`CertStorage`] contract.
//!
//! Every check panics with a descriptive message on violation, so they can
//! be called directly from `#[tokio::test]` functions against any backend.
//! Checks write below `root` and clean up after themselves.

use certblob_storage::{CertStorage, Context, StorageError};
use std::time::Duration;

/// Runs every single-instance check below `root`.
pub async fn check_storage_contract(storage: &dyn CertStorage, root: &str) {
    check_round_trip(storage, root).await;
    check_delete(storage, root).await;
    check_listing(storage, root).await;
    check_stat(storage, root).await;
    check_unlock_idempotent(storage, root).await;
}

/// Store followed by load returns the exact bytes.
pub async fn check_round_trip(storage: &dyn CertStorage, root: &str) {
    let ctx = Context::background();
    let key = format!("{root}/round_trip/example.com.crt");
    let payload: Vec<u8> = (0..=255u8).collect();

    storage
        .store(&ctx, &key, &payload)
        .await
        .expect("Failed to store");
    let loaded = storage.load(&ctx, &key).await.expect("Failed to load");
    assert_eq!(loaded, payload, "Loaded bytes differ for {key}");

    storage.delete(&ctx, &key).await.expect("Failed to delete");
}

/// After delete the key is absent and load reports not-found.
pub async fn check_delete(storage: &dyn CertStorage, root: &str) {
    let ctx = Context::background();
    let key = format!("{root}/delete/a.key");

    storage
        .store(&ctx, &key, b"secret")
        .await
        .expect("Failed to store");
    assert!(storage.exists(&ctx, &key).await, "{key} should exist");

    storage.delete(&ctx, &key).await.expect("Failed to delete");
    assert!(!storage.exists(&ctx, &key).await, "{key} should be gone");

    let err = storage
        .load(&ctx, &key)
        .await
        .expect_err("Load after delete should fail");
    assert!(err.is_not_found(), "Expected NotFound, got {err}");

    storage
        .delete(&ctx, &key)
        .await
        .expect("Deleting an absent key should succeed");
}

/// Recursive listing returns exactly the stored keys below the prefix.
pub async fn check_listing(storage: &dyn CertStorage, root: &str) {
    let ctx = Context::background();
    let base = format!("{root}/list/a");
    let keys = [
        format!("{base}/b"),
        format!("{base}/c"),
        format!("{base}/d/e"),
    ];
    let sibling = format!("{root}/list/ab/x");

    for key in keys.iter().chain(std::iter::once(&sibling)) {
        storage.store(&ctx, key, b"v").await.expect("Failed to store");
    }

    let mut listed = storage
        .list(&ctx, &base, true)
        .await
        .expect("Failed to list");
    listed.sort();
    assert_eq!(listed, keys.to_vec(), "Recursive listing of {base}");

    let mut shallow = storage
        .list(&ctx, &base, false)
        .await
        .expect("Failed to list");
    shallow.sort();
    assert_eq!(
        shallow,
        vec![format!("{base}/b"), format!("{base}/c"), format!("{base}/d/")],
        "Shallow listing of {base}"
    );

    for key in keys.iter().chain(std::iter::once(&sibling)) {
        storage.delete(&ctx, key).await.expect("Failed to delete");
    }
}

/// Stat distinguishes leaves from virtual directories.
pub async fn check_stat(storage: &dyn CertStorage, root: &str) {
    let ctx = Context::background();
    let dir = format!("{root}/stat/certificates/");
    let key = format!("{dir}example.com.json");

    storage
        .store(&ctx, &key, b"{\"sans\":[]}")
        .await
        .expect("Failed to store");

    let info = storage.stat(&ctx, &key).await;
    assert_eq!(info.key, key);
    assert_eq!(info.size, 11);
    assert!(info.is_terminal, "{key} should be terminal");

    let info = storage.stat(&ctx, &dir).await;
    assert!(!info.is_terminal, "{dir} should not be terminal");

    let missing = format!("{root}/stat/missing");
    assert!(storage.stat(&ctx, &missing).await.is_zero());

    storage.delete(&ctx, &key).await.expect("Failed to delete");
}

/// Unlocking twice, or unlocking a never-locked key, succeeds.
pub async fn check_unlock_idempotent(storage: &dyn CertStorage, root: &str) {
    let ctx = Context::background();
    let key = format!("{root}/unlock");

    storage
        .unlock(&ctx, &format!("{key}/never"))
        .await
        .expect("Unlock of never-locked key should succeed");

    storage.lock(&ctx, &key).await.expect("Failed to lock");
    storage.unlock(&ctx, &key).await.expect("Failed to unlock");
    storage
        .unlock(&ctx, &key)
        .await
        .expect("Second unlock should succeed");
}

/// Two instances sharing a store exclude each other.
///
/// `first` acquires the lock, `second` is refused by `try_lock`, then
/// `second` blocks in `lock` until `first` unlocks.
pub async fn check_lock_exclusion(first: &dyn CertStorage, second: &dyn CertStorage, key: &str) {
    let ctx = Context::background();

    first.lock(&ctx, key).await.expect("First lock should succeed");
    match second.try_lock(&ctx, key).await {
        Err(StorageError::LockContention { .. }) => {}
        other => panic!("Expected contention, got {other:?}"),
    }

    let short = ctx.clone().with_timeout(Duration::from_millis(100));
    match second.lock(&short, key).await {
        Err(StorageError::DeadlineExceeded) => {}
        other => panic!("Expected deadline while lock is held, got {other:?}"),
    }

    let waiting = async {
        second
            .lock(&ctx.clone().with_timeout(Duration::from_secs(5)), key)
            .await
    };
    let releasing = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.unlock(&ctx, key).await
    };
    let (acquired, released) = tokio::join!(waiting, releasing);
    released.expect("Unlock should succeed");
    acquired.expect("Second lock should succeed after unlock");

    second.unlock(&ctx, key).await.expect("Failed to unlock");
}
