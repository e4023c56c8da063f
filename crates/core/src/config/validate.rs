use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::downloader::DownloaderType;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Per-branch timeouts are finite and non-zero
/// - Indexer and downloader ids are unique
/// - Connection fields required by each backend are present
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.timeouts.indexer_secs == 0 || config.timeouts.downloader_secs == 0 {
        return Err(ConfigError::ValidationError(
            "timeouts must be greater than 0 seconds".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for indexer in &config.indexers {
        if !seen.insert(indexer.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate indexer id: {}",
                indexer.id
            )));
        }
        if indexer.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "indexer {} has an empty url",
                indexer.id
            )));
        }
    }

    let mut seen = HashSet::new();
    for downloader in &config.downloaders {
        if !seen.insert(downloader.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate downloader id: {}",
                downloader.id
            )));
        }
        if downloader.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "downloader {} has an empty host",
                downloader.id
            )));
        }
        if downloader.client_type == DownloaderType::Sabnzbd
            && downloader.api_key.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::ValidationError(format!(
                "downloader {} (sabnzbd) requires api_key",
                downloader.id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = load_config_from_str("[server]\nport = 0\n").unwrap();
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let config = load_config_from_str("[timeouts]\ndownloader_secs = 0\n").unwrap();
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_duplicate_downloader_ids_fails() {
        let toml = r#"
[[downloaders]]
id = "dl"
name = "A"
type = "transmission"
host = "a"

[[downloaders]]
id = "dl"
name = "B"
type = "qbittorrent"
host = "b"
"#;
        let config = load_config_from_str(toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate downloader id"));
    }

    #[test]
    fn test_validate_sabnzbd_without_api_key_fails() {
        let toml = r#"
[[downloaders]]
id = "sab"
name = "SABnzbd"
type = "sabnzbd"
host = "localhost"
"#;
        let config = load_config_from_str(toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("requires api_key"));
    }

    #[test]
    fn test_validate_empty_indexer_url_fails() {
        let toml = r#"
[[indexers]]
id = "idx"
name = "Empty"
url = " "
api_key = "k"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert!(validate_config(&config).is_err());
    }
}
