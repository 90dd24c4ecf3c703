//! Lock commands: lock, unlock and lock-status.

use certblob_storage::{BlobStorage, CertStorage, Context, LockRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Lock inspection result.
#[derive(Debug, Serialize)]
pub struct LockStatus {
    /// Logical key the lock protects.
    pub key: String,
    /// Whether a lock object exists.
    pub locked: bool,
    /// Current holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    /// Acquisition token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// When the lock was acquired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
    /// When the holder last refreshed the lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Seconds since the last refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<f64>,
    /// Whether another instance may steal the lock.
    pub stale: bool,
}

impl LockStatus {
    fn new(key: &str, record: Option<LockRecord>, stale_after: Duration) -> Self {
        match record {
            Some(record) => {
                let now = Utc::now();
                Self {
                    key: key.to_string(),
                    locked: true,
                    holder: Some(record.holder.clone()),
                    token: Some(record.token.to_string()),
                    acquired_at: Some(record.acquired_at),
                    updated_at: Some(record.updated_at),
                    age_secs: Some(record.age(now).as_secs_f64()),
                    stale: record.is_stale(now, stale_after),
                }
            }
            None => Self {
                key: key.to_string(),
                locked: false,
                holder: None,
                token: None,
                acquired_at: None,
                updated_at: None,
                age_secs: None,
                stale: false,
            },
        }
    }
}

/// Runs the lock command.
///
/// Acquires the lock, keeps it refreshed for `hold` (or until `ctx` is
/// cancelled), then releases it with `release`.
pub async fn lock(
    storage: &BlobStorage,
    ctx: &Context,
    release: &Context,
    key: &str,
    hold: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    storage.lock(ctx, key).await?;
    println!("Locked {} as {}", key, storage.holder_id());

    tokio::select! {
        _ = tokio::time::sleep(hold) => {}
        _ = ctx.cancellation().cancelled() => {
            println!("Interrupted");
        }
    }

    storage.unlock(release, key).await?;
    println!("Unlocked {}", key);
    Ok(())
}

/// Runs the unlock command.
///
/// A fresh lock held by another instance is left in place.
pub async fn unlock(
    storage: &BlobStorage,
    ctx: &Context,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    storage.unlock(ctx, key).await?;
    match storage.lock_record(ctx, key).await? {
        Some(record) => println!("Lock on {} is still held by {}", key, record.holder),
        None => println!("Unlocked {}", key),
    }
    Ok(())
}

/// Runs the lock-status command.
pub async fn status(
    storage: &BlobStorage,
    ctx: &Context,
    key: &str,
    stale_after: Duration,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = storage.lock_record(ctx, key).await?;
    let status = LockStatus::new(key, record, stale_after);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => print_text_output(&status),
    }
    Ok(())
}

fn print_text_output(status: &LockStatus) {
    println!("Key:      {}", status.key);
    if !status.locked {
        println!("Status:   unlocked");
        return;
    }
    println!(
        "Status:   {}",
        if status.stale { "stale" } else { "held" }
    );
    if let Some(holder) = &status.holder {
        println!("Holder:   {}", holder);
    }
    if let Some(token) = &status.token {
        println!("Token:    {}", token);
    }
    if let Some(acquired_at) = status.acquired_at {
        println!("Acquired: {}", acquired_at.to_rfc3339());
    }
    if let Some(updated_at) = status.updated_at {
        println!("Updated:  {}", updated_at.to_rfc3339());
    }
    if let Some(age) = status.age_secs {
        println!("Age:      {:.1}s", age);
    }
}
