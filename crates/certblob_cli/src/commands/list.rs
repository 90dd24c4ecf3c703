//! List command implementation.

use certblob_storage::{CertStorage, Context};

/// Runs the list command.
pub async fn run(
    storage: &dyn CertStorage,
    ctx: &Context,
    prefix: &str,
    recursive: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let keys = storage.list(ctx, prefix, recursive).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        _ => {
            for key in &keys {
                println!("{}", key);
            }
        }
    }
    Ok(())
}
