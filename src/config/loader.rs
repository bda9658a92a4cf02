//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading and backend construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("unknown cache driver '{0}'")]
    UnknownDriver(String),

    #[error("backend {idx}: cache driver '{driver}' rejected its settings: {source}")]
    Driver {
        driver: String,
        idx: usize,
        #[source]
        source: CacheError,
    },

    #[error("no usable backends")]
    NoBackends,
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Expiry;
    use crate::config::schema::{BackendEntry, KeyStrategy, StrategyKind};
    use std::io::Write;
    use std::time::Duration;

    const FULL: &str = r#"
        backends = [
            "http://10.0.0.1:8081/",
            { host = "10.0.0.2", port = 8082, prefix = "/api" },
            "cache",
        ]
        select_strategy = "random"

        [listener]
        bind_address = "127.0.0.1:8080"

        [cache]
        path = "/tmp/fp-cache"
        expire = "never"
        key = "path"

        [timeouts]
        http_timeout_ms = 2500

        [pre_proxy]
        rewrite_host = true
        set_headers = { "x-proxy" = "failover" }

        [errors."503.1"]
        document = "<h1>down</h1>"
        headers = { "content-type" = "text/html" }
    "#;

    #[test]
    fn parses_full_config() {
        let config = parse_config(FULL).unwrap();
        assert_eq!(config.backends.len(), 3);
        assert!(matches!(&config.backends[2], BackendEntry::Url(s) if s == "cache"));
        assert_eq!(config.select_strategy, StrategyKind::Random);

        let cache = config.cache.as_ref().unwrap();
        assert_eq!(cache.driver, "fs");
        assert_eq!(cache.expire, Expiry::Never);
        assert_eq!(cache.key, KeyStrategy::Path);

        assert_eq!(config.timeouts.http_timeout(), Duration::from_millis(2500));
        assert_eq!(config.timeouts.backend_watch_interval_ms, 1000);
        assert!(config.pre_proxy.rewrite_host);
        assert_eq!(
            config.errors["503.1"].document.as_deref(),
            Some("<h1>down</h1>")
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_config("backends = [\"http://a/\"]\nlisten = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_surface() {
        let err = parse_config("backends = []").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors, vec![ValidationError::NoBackends])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backends = [\"http://127.0.0.1:9000/\"]").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");

        let missing = load_config(Path::new("/nonexistent/failover.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
