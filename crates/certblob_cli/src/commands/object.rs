//! Object commands: store, load, delete, exists and stat.

use certblob_storage::{CertStorage, Context, KeyInfo};
use std::io::{Read, Write};
use std::path::Path;

/// Runs the store command, reading the value from `file` or stdin.
pub async fn store(
    storage: &dyn CertStorage,
    ctx: &Context,
    key: &str,
    file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = match file {
        Some(path) => std::fs::read(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    storage.store(ctx, key, &value).await?;
    println!("Stored {} bytes at {}", value.len(), key);
    Ok(())
}

/// Runs the load command, writing the value to `output` or stdout.
pub async fn load(
    storage: &dyn CertStorage,
    ctx: &Context,
    key: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = storage.load(ctx, key).await?;

    match output {
        Some(path) => std::fs::write(path, &value)
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&value)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Runs the delete command.
pub async fn delete(
    storage: &dyn CertStorage,
    ctx: &Context,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    storage.delete(ctx, key).await?;
    println!("Deleted {}", key);
    Ok(())
}

/// Runs the exists command. Returns whether the key exists.
pub async fn exists(
    storage: &dyn CertStorage,
    ctx: &Context,
    key: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    let exists = storage.try_exists(ctx, key).await?;
    println!("{}", exists);
    Ok(exists)
}

/// Runs the stat command.
pub async fn stat(
    storage: &dyn CertStorage,
    ctx: &Context,
    key: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = storage.try_stat(ctx, key).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        _ => {
            print!("{}", format_info(&info));
        }
    }
    Ok(())
}

fn format_info(info: &KeyInfo) -> String {
    let kind = if info.is_terminal {
        "object"
    } else {
        "directory"
    };
    format!(
        "Key:      {}\nKind:     {}\nSize:     {} bytes\nModified: {}\n",
        info.key,
        kind,
        info.size,
        info.modified.to_rfc3339()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use certblob_testkit::{memory_storage, TEST_PREFIX};

    #[tokio::test]
    async fn store_and_load_through_files() {
        let storage = memory_storage(TEST_PREFIX);
        let ctx = Context::background();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cert.pem");
        let output = dir.path().join("copy.pem");
        std::fs::write(&input, b"-----BEGIN CERTIFICATE-----").unwrap();

        store(&storage, &ctx, "certificates/a.crt", Some(&input))
            .await
            .unwrap();
        load(&storage, &ctx, "certificates/a.crt", Some(&output))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(&output).unwrap(),
            b"-----BEGIN CERTIFICATE-----"
        );
    }

    #[tokio::test]
    async fn exists_reports_presence() {
        let storage = memory_storage(TEST_PREFIX);
        let ctx = Context::background();
        storage.store(&ctx, "a", b"v").await.unwrap();

        assert!(exists(&storage, &ctx, "a").await.unwrap());
        assert!(!exists(&storage, &ctx, "b").await.unwrap());

        delete(&storage, &ctx, "a").await.unwrap();
        assert!(!exists(&storage, &ctx, "a").await.unwrap());
    }

    #[tokio::test]
    async fn stat_of_missing_key_fails() {
        let storage = memory_storage(TEST_PREFIX);
        let ctx = Context::background();
        assert!(stat(&storage, &ctx, "missing", "text").await.is_err());
    }

    #[test]
    fn info_text_names_kind() {
        let info = KeyInfo {
            key: "certificates/".into(),
            ..KeyInfo::default()
        };
        let text = format_info(&info);
        assert!(text.contains("directory"));
        assert!(text.contains("certificates/"));
    }
}
