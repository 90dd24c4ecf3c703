//! Info command implementation.

use certblob_storage::{AzureBlobConfig, BlobStorage};

/// Runs the info command.
pub fn run(storage: &BlobStorage, config: &AzureBlobConfig) {
    println!("{}", storage);
    println!();
    println!("Holder:   {}", storage.holder_id());
    println!(
        "Endpoint: {}",
        config.endpoint.as_deref().unwrap_or(if config.use_emulator {
            "azurite emulator"
        } else {
            "default"
        })
    );
    println!("Locks:");
    println!("  Stale after:      {:?}", config.lock.stale_after);
    println!("  Refresh interval: {:?}", config.lock.refresh_interval);
    println!("  Poll interval:    {:?}", config.lock.poll_interval);
}
