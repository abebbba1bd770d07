//! Configuration loading from disk and the command line.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Values taken from the environment or command line.
///
/// Each set field replaces the corresponding file/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub upstream_base: Option<String>,
    pub bind_address: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut ProxyConfig) {
        if let Some(base) = self.upstream_base {
            config.upstream.base_url = base;
        }
        if let Some(addr) = self.bind_address {
            config.listener.bind_address = addr;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

/// Build the effective configuration: defaults, then the optional file,
/// then overrides. Validation runs last, on the merged result.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    overrides.apply(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let config = resolve_config(
            None,
            ConfigOverrides {
                upstream_base: Some("http://cam:5000".into()),
                bind_address: Some("127.0.0.1:9000".into()),
                log_level: None,
            },
        )
        .unwrap();

        assert_eq!(config.upstream.base_url, "http://cam:5000");
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn missing_upstream_is_rejected() {
        let err = resolve_config(None, ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("upstream.base_url"));
    }

    #[test]
    fn file_values_are_overridden() {
        let path = std::env::temp_dir().join(format!(
            "transcode-proxy-{}-config.toml",
            std::process::id()
        ));
        fs::write(
            &path,
            r#"
            [upstream]
            base_url = "http://from-file:5000"
            response_timeout_secs = 5

            [transcoder]
            program = "/usr/lib/jellyfin-ffmpeg/ffmpeg"
            "#,
        )
        .unwrap();

        let config = resolve_config(
            Some(&path),
            ConfigOverrides {
                upstream_base: Some("http://from-env:5000".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.upstream.base_url, "http://from-env:5000");
        assert_eq!(config.upstream.response_timeout_secs, 5);
        assert_eq!(config.transcoder.program, "/usr/lib/jellyfin-ffmpeg/ffmpeg");
    }

    #[test]
    fn unreadable_file_is_io_error() {
        let err = resolve_config(
            Some(Path::new("/definitely/not/here.toml")),
            ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
