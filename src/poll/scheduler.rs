use super::fetcher::{EventFetcher, FetchResult};
use super::resolver::{DiscoveryPolicy, StreamResolver};
use crate::config::types::Config;
use crate::config::ConfigError;
use crate::format::{FormatError, Record, RecordFormatter};
use crate::remote::LogStore;
use crate::retry::Backoff;
use crate::sink::RecordSink;
use crate::state::{StateStore, StreamKey};
use chrono::Local;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("format error: {0}")]
    Format(#[from] FormatError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Running,
    Stopped,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub streams: usize,
    pub events: usize,
    pub degraded_streams: usize,
    pub saved: bool,
}

/// Cheap handle for observing and nudging a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    state: watch::Receiver<PollState>,
    kick: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Ask for a cycle now instead of at the next tick.
    ///
    /// Returns false, and does nothing, while a cycle is running or after
    /// the scheduler stopped. Several kicks between cycles collapse into one,
    /// and a kick before `run` starts is answered by the first cycle.
    pub fn kick(&self) -> bool {
        if self.state() != PollState::Idle {
            return false;
        }
        self.kick.notify_one();
        true
    }
}

/// Drives poll cycles: resolve, fetch every stream, then emit and persist.
///
/// Owns the state store; only one cycle runs at a time.
pub struct PollScheduler {
    group: String,
    tag: String,
    include_metadata: bool,
    interval: Duration,
    policy: DiscoveryPolicy,
    resolver: StreamResolver,
    fetcher: EventFetcher,
    formatter: RecordFormatter,
    sink: Arc<dyn RecordSink>,
    state: StateStore,
    status: watch::Sender<PollState>,
    kick: Arc<Notify>,
}

impl PollScheduler {
    pub fn from_config(
        config: &Config,
        store: Arc<dyn LogStore>,
        sink: Arc<dyn RecordSink>,
        state: StateStore,
    ) -> Result<Self, SchedulerError> {
        let policy = DiscoveryPolicy::from_config(config)?;
        let formatter = RecordFormatter::from_config(config.format.as_deref())?;
        let backoff = Backoff::from_config(&config.retry);
        let (status, _) = watch::channel(PollState::Idle);

        Ok(Self {
            group: config.log_group_name.clone(),
            tag: config.tag.clone(),
            include_metadata: config.include_metadata,
            interval: config.fetch_interval,
            policy,
            resolver: StreamResolver::new(store.clone(), backoff),
            fetcher: EventFetcher::new(store, backoff, config.max_pages_per_cycle)
                .with_read_from(config.read_from),
            formatter,
            sink,
            state,
            status,
            kick: Arc::new(Notify::new()),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: self.status.subscribe(),
            kick: self.kick.clone(),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run one full cycle.
    ///
    /// Streams are fetched concurrently. Records are emitted, positions
    /// updated and the state file saved only after every fetch finished, so
    /// the saved file never mixes old and new positions of one cycle.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        self.status.send_replace(PollState::Running);

        let keys = self
            .resolver
            .resolve(&self.group, &self.policy, &Local::now())
            .await;

        for key in &keys {
            if self.state.register(key) {
                info!(log_stream = %key, "Discovered log stream");
            }
        }

        let results = {
            let fetcher = &self.fetcher;
            let state = &self.state;
            join_all(keys.iter().map(|key| {
                let position = state.get(key);
                async move { fetcher.fetch(key, &position).await }
            }))
            .await
        };

        let mut summary = CycleSummary {
            streams: keys.len(),
            ..CycleSummary::default()
        };

        for (key, result) in keys.into_iter().zip(results) {
            if result.degraded {
                summary.degraded_streams += 1;
            }
            summary.events += result.events.len();
            self.emit_all(&key, &result).await;
            self.state.set(key, result.position);
        }

        match self.state.save().await {
            Ok(()) => summary.saved = true,
            Err(e) => error!(
                path = %self.state.path().display(),
                error = %e,
                "Failed to save state file, positions are kept in memory only"
            ),
        }

        if summary.degraded_streams > 0 {
            warn!(
                streams = summary.streams,
                degraded = summary.degraded_streams,
                "Some streams could not be read this cycle"
            );
        }
        info!(
            streams = summary.streams,
            events = summary.events,
            saved = summary.saved,
            "Poll cycle complete"
        );

        self.status.send_replace(PollState::Idle);
        summary
    }

    async fn emit_all(&self, key: &StreamKey, result: &FetchResult) {
        for event in &result.events {
            let mut record = self.formatter.format(&self.tag, event);
            if self.include_metadata {
                self.add_metadata(&mut record, key);
            }
            self.sink.emit(record).await;
        }
    }

    fn add_metadata(&self, record: &mut Record, key: &StreamKey) {
        record.fields.insert(
            "log_group_name".to_string(),
            Value::String(key.log_group_name.clone()),
        );
        record.fields.insert(
            "log_stream_name".to_string(),
            Value::String(key.log_stream_name.clone()),
        );
    }

    /// Run cycles until `shutdown` turns true or its sender is dropped.
    ///
    /// A cycle in progress always finishes, save included. Returns the
    /// state store so the caller can inspect the final positions.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> StateStore {
        info!(
            log_group = %self.group,
            interval = ?self.interval,
            policy = ?self.policy,
            "Poll scheduler started"
        );

        let kick = self.kick.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // This cycle answers any kick that arrived before it started.
            let _ = kick.notified().now_or_never();

            let cycle_start = Instant::now();
            self.run_cycle().await;

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(cycle_start + self.interval) => {}
                _ = kick.notified() => {
                    debug!("Poll cycle requested");
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.status.send_replace(PollState::Stopped);
        info!("Poll scheduler stopped");
        self.state
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::parse_config;
    use crate::remote::{MemoryLogStore, Operation, RawEvent};
    use crate::sink::ChannelSink;
    use tempfile::TempDir;

    fn config(dir: &TempDir, extra: &str) -> Config {
        let yaml = format!(
            "log_group_name: group\nlog_stream_name: stream\ntag: test\nstate_file: {}\nfetch_interval: 3600\nremote:\n  endpoint: http://localhost:4566\n{}",
            dir.path().join("state.json").display(),
            extra
        );
        parse_config(&yaml).unwrap()
    }

    fn event(timestamp_ms: i64, message: &str) -> RawEvent {
        RawEvent {
            timestamp_ms,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_emits_and_saves() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        let store = Arc::new(MemoryLogStore::new());
        store.put_log_events("group", "stream", vec![event(1_000, r#"{"a":1}"#)]);
        let (sink, mut rx) = ChannelSink::channel(16);

        let mut scheduler = PollScheduler::from_config(
            &config,
            store,
            Arc::new(sink),
            StateStore::empty(&config.state_file),
        )
        .unwrap();

        let summary = scheduler.run_cycle().await;
        assert_eq!(
            summary,
            CycleSummary {
                streams: 1,
                events: 1,
                degraded_streams: 0,
                saved: true
            }
        );

        let record = rx.recv().await.unwrap();
        assert_eq!(record.tag, "test");
        assert_eq!(record.time, 1);
        assert!(config.state_file.exists());
        assert_eq!(scheduler.handle().state(), PollState::Idle);
    }

    #[tokio::test]
    async fn test_metadata_fields() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "include_metadata: true\n");
        let store = Arc::new(MemoryLogStore::new());
        store.put_log_events("group", "stream", vec![event(1_000, "plain")]);
        let (sink, mut rx) = ChannelSink::channel(16);

        let mut scheduler = PollScheduler::from_config(
            &config,
            store,
            Arc::new(sink),
            StateStore::empty(&config.state_file),
        )
        .unwrap();
        scheduler.run_cycle().await;

        let record = rx.recv().await.unwrap();
        assert_eq!(record.fields["message"], "plain");
        assert_eq!(record.fields["log_group_name"], "group");
        assert_eq!(record.fields["log_stream_name"], "stream");
    }

    #[tokio::test]
    async fn test_kick_is_refused_once_stopped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        let store = Arc::new(MemoryLogStore::new());
        store.create_log_stream("group", "stream");
        let (sink, _rx) = ChannelSink::channel(16);

        let scheduler = PollScheduler::from_config(
            &config,
            store,
            Arc::new(sink),
            StateStore::empty(&config.state_file),
        )
        .unwrap();
        let handle = scheduler.handle();

        let (_tx, shutdown) = watch::channel(true);
        scheduler.run(shutdown).await;

        assert_eq!(handle.state(), PollState::Stopped);
        assert!(!handle.kick());
    }

    #[tokio::test]
    async fn test_kick_before_run_is_answered_by_first_cycle() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        let store = Arc::new(MemoryLogStore::new());
        store.put_log_events("group", "stream", vec![event(1_000, "one")]);
        let (sink, mut rx) = ChannelSink::channel(16);

        let scheduler = PollScheduler::from_config(
            &config,
            store.clone(),
            Arc::new(sink),
            StateStore::empty(&config.state_file),
        )
        .unwrap();
        let handle = scheduler.handle();
        assert!(handle.kick());

        let (shutdown_tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(shutdown));

        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        // One cycle: a read from the head and one confirming the stream is drained.
        assert_eq!(store.calls(Operation::GetLogEvents), 2);
    }
}
