//! Loading [`ExperimentConfig`] from TOML on disk.

use std::path::Path;

use pidgin_core::ExperimentConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },
    #[error("configuration is invalid: {0:?}")]
    Invalid(Vec<pidgin_core::model::ConfigError>),
}

/// Load and validate an experiment config from a TOML file. Validation
/// failures collect every problem rather than stopping at the first.
pub fn load_config(path: &Path) -> Result<ExperimentConfig, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> Result<ExperimentConfig, ConfigLoadError> {
    let config: ExperimentConfig = toml::from_str(raw).map_err(|source| ConfigLoadError::Parse {
        path: path.display().to_string(),
        source: Box::new(source),
    })?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigLoadError::Invalid(errors));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(
            &path,
            r#"
            name = "baseline"
            agent_a_model = "anthropic:claude-3"
            agent_b_model = "openai:gpt-4"
            max_turns = 20
            initial_prompt = "Let's discuss consciousness."
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.name, "baseline");
        assert_eq!(config.max_turns, 20);
    }

    #[test]
    fn rejects_invalid_config_with_all_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(
            &path,
            r#"
            name = ""
            agent_a_model = "anthropic:claude-3"
            agent_b_model = "openai:gpt-4"
            max_turns = 0
            "#,
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
    }
}
