use super::{EventPage, EventStart, LogStore, RawEvent, RemoteError, Result, StreamPage};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Remote calls that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListLogStreams,
    GetLogEvents,
}

/// In-process log store.
///
/// Forward tokens have the form `f/<index>` and point at the next unread
/// event; reading at the end of a stream returns the same token again.
/// Events are served in insertion order.
#[derive(Debug)]
pub struct MemoryLogStore {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    groups: BTreeMap<String, BTreeMap<String, Vec<RawEvent>>>,
    event_page_size: usize,
    stream_page_size: usize,
    pending_failures: HashMap<Operation, usize>,
    failing_streams: HashSet<(String, String)>,
    calls: HashMap<Operation, usize>,
    event_requests: Vec<(String, EventStart)>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                groups: BTreeMap::new(),
                event_page_size: 10_000,
                stream_page_size: 50,
                pending_failures: HashMap::new(),
                failing_streams: HashSet::new(),
                calls: HashMap::new(),
                event_requests: Vec::new(),
            }),
        }
    }

    pub fn with_event_page_size(self, size: usize) -> Self {
        self.inner().event_page_size = size.max(1);
        self
    }

    pub fn with_stream_page_size(self, size: usize) -> Self {
        self.inner().stream_page_size = size.max(1);
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_log_stream(&self, group: &str, stream: &str) {
        self.inner()
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(stream.to_string())
            .or_default();
    }

    /// Append events, creating the stream if needed.
    pub fn put_log_events(&self, group: &str, stream: &str, events: Vec<RawEvent>) {
        self.inner()
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(stream.to_string())
            .or_default()
            .extend(events);
    }

    /// Make the next `count` calls of `operation` fail.
    pub fn fail_next(&self, operation: Operation, count: usize) {
        *self.inner().pending_failures.entry(operation).or_default() += count;
    }

    /// Make every event read from one stream fail until cleared.
    pub fn fail_stream(&self, group: &str, stream: &str) {
        self.inner()
            .failing_streams
            .insert((group.to_string(), stream.to_string()));
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner();
        inner.pending_failures.clear();
        inner.failing_streams.clear();
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.inner().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Every `get_log_events` request received, as `(stream, start)`.
    pub fn event_requests(&self) -> Vec<(String, EventStart)> {
        self.inner().event_requests.clone()
    }
}

impl Inner {
    fn record_call(&mut self, operation: Operation) -> Result<()> {
        *self.calls.entry(operation).or_default() += 1;

        if let Some(remaining) = self.pending_failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Unavailable(format!(
                    "injected failure for {:?}",
                    operation
                )));
            }
        }
        Ok(())
    }
}

fn parse_token(token: &str, prefix: &str) -> Result<usize> {
    token
        .strip_prefix(prefix)
        .and_then(|index| index.parse().ok())
        .ok_or_else(|| RemoteError::Status {
            status: 400,
            message: format!("InvalidParameterException: bad token '{}'", token),
        })
}

fn resource_not_found(what: &str) -> RemoteError {
    RemoteError::Status {
        status: 400,
        message: format!("ResourceNotFoundException: {} does not exist", what),
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn list_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
        next_token: Option<&str>,
    ) -> Result<StreamPage> {
        let mut inner = self.inner();
        inner.record_call(Operation::ListLogStreams)?;

        let streams = inner
            .groups
            .get(group)
            .ok_or_else(|| resource_not_found(&format!("log group '{}'", group)))?;

        let matching: Vec<&String> = streams
            .keys()
            .filter(|name| prefix.map_or(true, |p| name.starts_with(p)))
            .collect();

        let offset = match next_token {
            Some(token) => parse_token(token, "s/")?,
            None => 0,
        };
        let end = (offset + inner.stream_page_size).min(matching.len());

        Ok(StreamPage {
            streams: matching
                .get(offset..end)
                .unwrap_or_default()
                .iter()
                .map(|name| name.to_string())
                .collect(),
            next_token: (end < matching.len()).then(|| format!("s/{}", end)),
        })
    }

    async fn get_log_events(
        &self,
        group: &str,
        stream: &str,
        start: &EventStart,
    ) -> Result<EventPage> {
        let mut inner = self.inner();
        inner.record_call(Operation::GetLogEvents)?;
        inner
            .event_requests
            .push((stream.to_string(), start.clone()));

        if inner
            .failing_streams
            .contains(&(group.to_string(), stream.to_string()))
        {
            return Err(RemoteError::Unavailable(format!(
                "stream '{}' is failing",
                stream
            )));
        }

        let events = inner
            .groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .ok_or_else(|| resource_not_found(&format!("log stream '{}'", stream)))?;

        let from = match start {
            EventStart::Head => 0,
            EventStart::Token(token) => parse_token(token, "f/")?.min(events.len()),
            EventStart::Time(ms) => events
                .iter()
                .position(|e| e.timestamp_ms >= *ms)
                .unwrap_or(events.len()),
        };
        let to = (from + inner.event_page_size).min(events.len());

        Ok(EventPage {
            events: events[from..to].to_vec(),
            next_forward_token: Some(format!("f/{}", to)),
        })
    }
}
