use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::format::RecordFormatter;
use regex::Regex;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.state_file = expand_tilde(&config.state_file);

    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.log_group_name.trim().is_empty() {
        errors.push("log_group_name cannot be empty".to_string());
    }

    if config.tag.trim().is_empty() {
        errors.push("tag cannot be empty".to_string());
    }

    if config.state_file.as_os_str().is_empty() {
        errors.push("state_file cannot be empty".to_string());
    }

    validate_discovery(config, &mut errors);

    if config.fetch_interval.is_zero() {
        errors.push("fetch_interval must be greater than zero".to_string());
    }

    if config.max_pages_per_cycle == 0 {
        errors.push("max_pages_per_cycle must be at least 1".to_string());
    }

    if config.retry.max_retries == 0 {
        errors.push("retry.max_retries must be at least 1".to_string());
    }

    if !(config.retry.sleep_divisor.is_finite() && config.retry.sleep_divisor > 0.0) {
        errors.push(format!(
            "retry.sleep_divisor must be a positive number, got {}",
            config.retry.sleep_divisor
        ));
    }

    if let Some(pattern) = &config.format {
        if let Err(e) = RecordFormatter::pattern(pattern) {
            errors.push(format!("format: {}", e));
        }
    }

    validate_remote(&config.remote, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_remote(remote: &RemoteConfig, errors: &mut Vec<String>) {
    match (&remote.aws_key_id, &remote.aws_sec_key) {
        (Some(_), None) => {
            errors.push("remote.aws_key_id is set but remote.aws_sec_key is missing".to_string())
        }
        (None, Some(_)) => {
            errors.push("remote.aws_sec_key is set but remote.aws_key_id is missing".to_string())
        }
        _ => {}
    }

    // The SDK can find its region in the environment; the plain client cannot.
    if remote.backend == RemoteBackend::Http && remote.resolved_endpoint().is_none() {
        errors.push("remote: the http backend needs either 'region' or 'endpoint'".to_string());
    }
}

fn validate_discovery(config: &Config, errors: &mut Vec<String>) {
    let stream_name = config
        .log_stream_name
        .as_deref()
        .filter(|name| !name.is_empty());

    if config.use_log_stream_name_prefix && config.use_todays_log_stream {
        errors.push(
            "use_log_stream_name_prefix and use_todays_log_stream are mutually exclusive"
                .to_string(),
        );
    }

    if config.use_log_stream_name_prefix && stream_name.is_none() {
        errors.push(
            "use_log_stream_name_prefix requires log_stream_name to hold the prefix".to_string(),
        );
    }

    if !config.use_todays_log_stream && !config.use_log_stream_name_prefix && stream_name.is_none()
    {
        errors.push(
            "log_stream_name is required unless use_todays_log_stream is enabled".to_string(),
        );
    }
}
