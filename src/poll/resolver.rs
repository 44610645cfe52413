use crate::config::types::Config;
use crate::config::ConfigError;
use crate::remote::LogStore;
use crate::retry::{Backoff, Outcome};
use crate::state::StreamKey;
use chrono::{DateTime, NaiveDate, TimeZone};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const DATE_PREFIX_FORMAT: &str = "%Y/%m/%d";

/// How the streams to poll are found each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryPolicy {
    /// Exactly one stream, named verbatim.
    FixedStream(String),
    /// Every stream whose name starts with the prefix.
    PrefixMatch(String),
    /// Streams prefixed with today's and yesterday's date (`YYYY/MM/DD`).
    DateRotating,
}

impl DiscoveryPolicy {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if config.use_todays_log_stream {
            return Ok(DiscoveryPolicy::DateRotating);
        }

        let name = config
            .log_stream_name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ConfigError::Validation(
                    "log_stream_name is required unless use_todays_log_stream is enabled"
                        .to_string(),
                )
            })?;

        if config.use_log_stream_name_prefix {
            Ok(DiscoveryPolicy::PrefixMatch(name))
        } else {
            Ok(DiscoveryPolicy::FixedStream(name))
        }
    }
}

/// Date prefixes for `day` and the day before, in that order.
pub fn date_prefixes(day: NaiveDate) -> Vec<String> {
    let mut prefixes = vec![day.format(DATE_PREFIX_FORMAT).to_string()];
    if let Some(yesterday) = day.pred_opt() {
        prefixes.push(yesterday.format(DATE_PREFIX_FORMAT).to_string());
    }
    prefixes
}

pub struct StreamResolver {
    store: Arc<dyn LogStore>,
    backoff: Backoff,
}

impl StreamResolver {
    pub fn new(store: Arc<dyn LogStore>, backoff: Backoff) -> Self {
        Self { store, backoff }
    }

    /// Streams to poll this cycle, in emission order.
    ///
    /// A listing that gives up after its retries contributes no streams;
    /// that is not an error.
    pub async fn resolve<Tz: TimeZone>(
        &self,
        group: &str,
        policy: &DiscoveryPolicy,
        now: &DateTime<Tz>,
    ) -> Vec<StreamKey> {
        let names = match policy {
            DiscoveryPolicy::FixedStream(name) => vec![name.clone()],
            DiscoveryPolicy::PrefixMatch(prefix) => {
                self.list_by_prefix(group, prefix).await.unwrap_or_default()
            }
            DiscoveryPolicy::DateRotating => {
                let mut names = Vec::new();
                for prefix in date_prefixes(now.date_naive()) {
                    if let Some(found) = self.list_by_prefix(group, &prefix).await {
                        names.extend(found);
                    }
                }
                names
            }
        };

        let mut seen = HashSet::new();
        names
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .map(|name| StreamKey::new(group, name))
            .collect()
    }

    /// All stream names under `prefix`, across every listing page.
    /// `None` if a page could not be fetched.
    async fn list_by_prefix(&self, group: &str, prefix: &str) -> Option<Vec<String>> {
        let description = format!("describe_log_streams {} prefix={}", group, prefix);
        let prefix = Some(prefix).filter(|p| !p.is_empty());
        let mut names = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let outcome = self
                .backoff
                .run(&description, || {
                    self.store.list_log_streams(group, prefix, token.as_deref())
                })
                .await;

            let page = match outcome {
                Outcome::Ok(page) => page,
                Outcome::Exhausted => {
                    warn!(
                        log_group = %group,
                        prefix = ?prefix,
                        "Could not list log streams, skipping them this cycle"
                    );
                    return None;
                }
            };

            names.extend(page.streams);

            match page.next_token {
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                _ => break,
            }
        }

        debug!(
            log_group = %group,
            prefix = ?prefix,
            streams = names.len(),
            "Listed log streams"
        );
        Some(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryLogStore, Operation};
    use chrono::{Duration, Local, Utc};

    fn resolver(store: &Arc<MemoryLogStore>) -> StreamResolver {
        StreamResolver::new(store.clone(), Backoff::new(2, 1000.0))
    }

    fn names(keys: &[StreamKey]) -> Vec<&str> {
        keys.iter().map(|k| k.log_stream_name.as_str()).collect()
    }

    #[test]
    fn test_date_prefixes() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(date_prefixes(day), vec!["2024/03/01", "2024/02/29"]);
    }

    #[tokio::test]
    async fn test_fixed_stream_makes_no_remote_call() {
        let store = Arc::new(MemoryLogStore::new());
        let keys = resolver(&store)
            .resolve(
                "group",
                &DiscoveryPolicy::FixedStream("stream".to_string()),
                &Utc::now(),
            )
            .await;

        assert_eq!(keys, vec![StreamKey::new("group", "stream")]);
        assert_eq!(store.calls(Operation::ListLogStreams), 0);
    }

    #[tokio::test]
    async fn test_prefix_match_lists_every_page() {
        let store = Arc::new(MemoryLogStore::new().with_stream_page_size(1));
        store.create_log_stream("group", "testprefix1");
        store.create_log_stream("group", "testprefix2");
        store.create_log_stream("group", "unrelated");

        let keys = resolver(&store)
            .resolve(
                "group",
                &DiscoveryPolicy::PrefixMatch("testprefix".to_string()),
                &Utc::now(),
            )
            .await;

        assert_eq!(names(&keys), vec!["testprefix1", "testprefix2"]);
        assert_eq!(store.calls(Operation::ListLogStreams), 2);
    }

    #[tokio::test]
    async fn test_prefix_match_with_no_streams_is_empty() {
        let store = Arc::new(MemoryLogStore::new());
        store.create_log_stream("group", "other");

        let keys = resolver(&store)
            .resolve(
                "group",
                &DiscoveryPolicy::PrefixMatch("testprefix".to_string()),
                &Utc::now(),
            )
            .await;
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_degrades_to_no_streams() {
        let store = Arc::new(MemoryLogStore::new());
        store.create_log_stream("group", "testprefix1");
        store.fail_next(Operation::ListLogStreams, 2);

        let keys = resolver(&store)
            .resolve(
                "group",
                &DiscoveryPolicy::PrefixMatch("testprefix".to_string()),
                &Utc::now(),
            )
            .await;
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_date_rotation_today_before_yesterday() {
        let now = Local::now();
        let today = now.date_naive().format(DATE_PREFIX_FORMAT).to_string();
        let yesterday = (now - Duration::days(1))
            .date_naive()
            .format(DATE_PREFIX_FORMAT)
            .to_string();
        let tomorrow = (now + Duration::days(1))
            .date_naive()
            .format(DATE_PREFIX_FORMAT)
            .to_string();

        let store = Arc::new(MemoryLogStore::new());
        store.create_log_stream("group", &format!("{}/[$LATEST]a", yesterday));
        store.create_log_stream("group", &format!("{}/[$LATEST]b", today));
        store.create_log_stream("group", &format!("{}/[$LATEST]c", tomorrow));
        store.create_log_stream("group", "testprefix");

        let keys = resolver(&store)
            .resolve("group", &DiscoveryPolicy::DateRotating, &now)
            .await;

        assert_eq!(
            names(&keys),
            vec![
                format!("{}/[$LATEST]b", today),
                format!("{}/[$LATEST]a", yesterday)
            ]
        );
    }

    #[tokio::test]
    async fn test_date_rotation_just_after_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();

        let store = Arc::new(MemoryLogStore::new());
        store.create_log_stream("group", "2023/12/31/instance-1");

        let keys = resolver(&store)
            .resolve("group", &DiscoveryPolicy::DateRotating, &now)
            .await;

        assert_eq!(names(&keys), vec!["2023/12/31/instance-1"]);
    }
}
