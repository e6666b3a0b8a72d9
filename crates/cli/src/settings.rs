use serde::{Deserialize, Serialize};
use shared::Result;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_SETTINGS_FILE: &str = "reclaimer.json";

/// Endpoint and fee payer remembered between runs
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<String>,
}

impl std::fmt::Debug for ShellSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSettings")
            .field("rpc_endpoint", &self.rpc_endpoint)
            .field("fee_payer", &self.fee_payer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ShellSettings {
    /// Read settings from `path`; a missing file yields empty settings
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ShellSettings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, ShellSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_SETTINGS_FILE);
        let settings = ShellSettings {
            rpc_endpoint: Some("https://api.devnet.solana.com".to_string()),
            fee_payer: Some("secret".to_string()),
        };

        settings.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"rpcEndpoint\""));
        assert!(raw.contains("\"feePayer\""));
        assert_eq!(ShellSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ShellSettings::load(&path).is_err());
    }

    #[test]
    fn test_debug_redacts_fee_payer() {
        let settings = ShellSettings {
            rpc_endpoint: None,
            fee_payer: Some("very-secret".to_string()),
        };
        assert!(!format!("{:?}", settings).contains("very-secret"));
    }
}
