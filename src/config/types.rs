use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_group_name: String,
    #[serde(default)]
    pub log_stream_name: Option<String>,
    #[serde(default)]
    pub use_log_stream_name_prefix: bool,
    #[serde(default)]
    pub use_todays_log_stream: bool,
    pub state_file: PathBuf,
    #[serde(default = "default_fetch_interval", with = "duration_format")]
    pub fetch_interval: Duration,
    /// Regex with named capture groups. When absent, messages are parsed as JSON.
    #[serde(default)]
    pub format: Option<String>,
    pub tag: String,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default = "default_read_from")]
    pub read_from: ReadStart,
    #[serde(default = "default_max_pages_per_cycle")]
    pub max_pages_per_cycle: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_fetch_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_read_from() -> ReadStart {
    ReadStart::Beginning
}

fn default_max_pages_per_cycle() -> usize {
    100
}

/// Where a stream with no stored position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    Now,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_sleep_divisor")]
    pub sleep_divisor: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_sleep_divisor() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            sleep_divisor: default_sleep_divisor(),
        }
    }
}

/// Client used to talk to the log service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// AWS SDK client with SigV4 signing and the standard credential chain.
    #[default]
    Aws,
    /// Plain JSON over HTTP without signing, for emulators and signing proxies.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub backend: RemoteBackend,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Static access key id. Without it the SDK's default credential chain is used.
    #[serde(default)]
    pub aws_key_id: Option<String>,
    #[serde(default)]
    pub aws_sec_key: Option<String>,
    #[serde(default = "default_timeout", with = "duration_format")]
    pub timeout: Duration,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::default(),
            region: None,
            endpoint: None,
            aws_key_id: None,
            aws_sec_key: None,
            timeout: default_timeout(),
            headers: HashMap::new(),
        }
    }
}

impl RemoteConfig {
    /// Explicit endpoint if given, otherwise the regional service endpoint.
    pub fn resolved_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        self.region
            .as_ref()
            .map(|region| format!("https://logs.{}.amazonaws.com", region))
    }
}

// Durations are written either as a bare number of seconds (fractions allowed)
// or as a string with a unit suffix: 500ms, 5s, 1m, 1h.
mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(f64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(secs) => {
                Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
            }
            RawDuration::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            (s, "s")
        };

        let value: f64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let secs = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return Err(format!("unknown unit: {}", unit)),
        };

        Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", s, e))
    }

    fn format_duration(d: Duration) -> String {
        let millis = d.as_millis();
        if millis % 1000 != 0 {
            format!("{}ms", millis)
        } else {
            let secs = d.as_secs();
            if secs % 3600 == 0 && secs > 0 {
                format!("{}h", secs / 3600)
            } else if secs % 60 == 0 && secs > 0 {
                format!("{}m", secs / 60)
            } else {
                format!("{}s", secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::duration_format::parse_duration;
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("0.1").unwrap(), Duration::from_millis(100));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_fractional_fetch_interval() {
        let yaml = r#"
log_group_name: group
log_stream_name: stream
state_file: /tmp/state.json
tag: test
fetch_interval: 0.1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fetch_interval, Duration::from_millis(100));
        assert_eq!(config.read_from, ReadStart::Beginning);
        assert_eq!(config.max_pages_per_cycle, 100);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_resolved_endpoint_prefers_explicit() {
        let remote = RemoteConfig {
            region: Some("us-east-1".to_string()),
            endpoint: Some("http://localhost:4566/".to_string()),
            ..RemoteConfig::default()
        };
        assert_eq!(
            remote.resolved_endpoint().as_deref(),
            Some("http://localhost:4566")
        );

        let remote = RemoteConfig {
            region: Some("eu-west-1".to_string()),
            ..RemoteConfig::default()
        };
        assert_eq!(
            remote.resolved_endpoint().as_deref(),
            Some("https://logs.eu-west-1.amazonaws.com")
        );

        assert!(RemoteConfig::default().resolved_endpoint().is_none());
    }
}
