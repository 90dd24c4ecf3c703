//! Backend configuration from files, flags and the environment.

use certblob_storage::{AccountKey, AzureBlobConfig};
use clap::Args;
use std::path::PathBuf;

/// Connection options shared by every command.
#[derive(Debug, Default, Args)]
pub struct ConnectionArgs {
    /// Path to a JSON configuration file
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    /// Storage account name [env: AZURE_ACCOUNT_NAME]
    #[arg(global = true, long)]
    pub account: Option<String>,

    /// Storage account key [env: AZURE_ACCOUNT_KEY]
    #[arg(global = true, long)]
    pub account_key: Option<String>,

    /// Blob container [env: AZURE_CONTAINER]
    #[arg(global = true, long)]
    pub container: Option<String>,

    /// Key prefix inside the container [env: AZURE_PREFIX]
    #[arg(global = true, long)]
    pub prefix: Option<String>,

    /// Custom blob service endpoint
    #[arg(global = true, long)]
    pub endpoint: Option<String>,

    /// Use the local Azurite emulator
    #[arg(global = true, long)]
    pub emulator: bool,
}

impl ConnectionArgs {
    /// Builds the backend configuration.
    ///
    /// Flags override the config file and the process environment fills
    /// whatever is still empty.
    pub fn load(&self) -> Result<AzureBlobConfig, Box<dyn std::error::Error>> {
        self.load_with(|name| std::env::var(name).ok())
    }

    /// Like [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AzureBlobConfig, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
                serde_json::from_str::<AzureBlobConfig>(&text)
                    .map_err(|e| format!("Invalid config file {}: {e}", path.display()))?
            }
            None => AzureBlobConfig::default(),
        };

        if let Some(account) = &self.account {
            config.account_name = account.clone();
        }
        if let Some(key) = &self.account_key {
            config.account_key = AccountKey::new(key.as_str());
        }
        if let Some(container) = &self.container {
            config.container = container.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint.as_str());
        }
        if self.emulator {
            config = config.with_emulator();
        }

        let config = config.resolve_env_with(lookup);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certblob_testkit::temp_config_file;
    use std::time::Duration;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn config_file_is_loaded() {
        let file = temp_config_file(
            r#"{
                "account_name": "acct",
                "account_key": "c2VjcmV0",
                "container": "certs",
                "prefix": "caddy",
                "lock": { "stale_after_ms": 60000 }
            }"#,
        );
        let args = ConnectionArgs {
            config: Some(file.path().to_path_buf()),
            ..ConnectionArgs::default()
        };

        let config = args.load_with(no_env).unwrap();
        assert_eq!(config.account_name, "acct");
        assert_eq!(config.account_key.expose(), "c2VjcmV0");
        assert_eq!(config.container, "certs");
        assert_eq!(config.prefix, "caddy");
        assert_eq!(config.lock.stale_after, Duration::from_secs(60));
    }

    #[test]
    fn flags_override_file() {
        let file = temp_config_file(
            r#"{"account_name": "acct", "account_key": "k", "container": "certs"}"#,
        );
        let args = ConnectionArgs {
            config: Some(file.path().to_path_buf()),
            container: Some("staging".into()),
            prefix: Some("edge".into()),
            ..ConnectionArgs::default()
        };

        let config = args.load_with(no_env).unwrap();
        assert_eq!(config.container, "staging");
        assert_eq!(config.prefix, "edge");
        assert_eq!(config.account_name, "acct");
    }

    #[test]
    fn environment_fills_gaps() {
        let args = ConnectionArgs {
            container: Some("certs".into()),
            ..ConnectionArgs::default()
        };
        let env = |name: &str| match name {
            "AZURE_ACCOUNT_NAME" => Some("from-env".to_string()),
            "AZURE_ACCOUNT_KEY" => Some("env-key".to_string()),
            "AZURE_CONTAINER" => Some("ignored".to_string()),
            _ => None,
        };

        let config = args.load_with(env).unwrap();
        assert_eq!(config.account_name, "from-env");
        assert_eq!(config.account_key.expose(), "env-key");
        assert_eq!(config.container, "certs");
    }

    #[test]
    fn emulator_needs_no_credentials() {
        let args = ConnectionArgs {
            container: Some("certs".into()),
            emulator: true,
            ..ConnectionArgs::default()
        };

        let config = args.load_with(no_env).unwrap();
        assert!(config.use_emulator);
        assert!(config.allow_http);
    }

    #[test]
    fn missing_container_is_rejected() {
        let args = ConnectionArgs {
            account: Some("acct".into()),
            account_key: Some("k".into()),
            ..ConnectionArgs::default()
        };

        let err = args.load_with(no_env).unwrap_err();
        assert!(err.to_string().contains("container"));
    }

    #[test]
    fn invalid_file_is_reported() {
        let file = temp_config_file("{ not json");
        let args = ConnectionArgs {
            config: Some(file.path().to_path_buf()),
            ..ConnectionArgs::default()
        };

        let err = args.load_with(no_env).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }
}
