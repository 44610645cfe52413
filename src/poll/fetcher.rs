use crate::config::types::ReadStart;
use crate::remote::{EventStart, LogStore, RawEvent};
use crate::retry::{Backoff, Outcome};
use crate::state::{ReadPosition, StreamKey};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Events read from one stream in one cycle, and where to resume next time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub events: Vec<RawEvent>,
    pub position: ReadPosition,
    pub pages: usize,
    /// True if a remote call gave up after exhausting its retries.
    pub degraded: bool,
}

/// Reads new events for a stream, page by page, from its stored position.
pub struct EventFetcher {
    store: Arc<dyn LogStore>,
    backoff: Backoff,
    max_pages: usize,
    read_from: ReadStart,
}

impl EventFetcher {
    pub fn new(store: Arc<dyn LogStore>, backoff: Backoff, max_pages: usize) -> Self {
        Self {
            store,
            backoff,
            max_pages: max_pages.max(1),
            read_from: ReadStart::Beginning,
        }
    }

    pub fn with_read_from(mut self, read_from: ReadStart) -> Self {
        self.read_from = read_from;
        self
    }

    /// Fetch up to `max_pages` pages forward from `position`.
    ///
    /// Pages already read are kept if a later page gives up; if the first
    /// page gives up the position comes back unchanged. Events older than
    /// `position.last_seen_timestamp_ms` are dropped. Events at exactly that
    /// timestamp are kept and may repeat across restarts.
    pub async fn fetch(&self, key: &StreamKey, position: &ReadPosition) -> FetchResult {
        let description = format!("get_log_events {}", key);
        let floor = position.last_seen_timestamp_ms;

        let mut result = FetchResult {
            position: position.clone(),
            ..FetchResult::default()
        };
        let mut start = self.start_for(position);
        let mut skipped = 0usize;
        let mut more = false;

        while result.pages < self.max_pages {
            let outcome = self
                .backoff
                .run(&description, || {
                    self.store
                        .get_log_events(&key.log_group_name, &key.log_stream_name, &start)
                })
                .await;

            let page = match outcome {
                Outcome::Ok(page) => page,
                Outcome::Exhausted => {
                    result.degraded = true;
                    break;
                }
            };
            result.pages += 1;

            trace!(
                log_stream = %key,
                page = result.pages,
                events = page.events.len(),
                "Fetched page of log events"
            );

            for event in page.events {
                if floor.is_some_and(|floor| event.timestamp_ms < floor) {
                    skipped += 1;
                    continue;
                }
                result.position.last_seen_timestamp_ms = Some(
                    result
                        .position
                        .last_seen_timestamp_ms
                        .map_or(event.timestamp_ms, |seen| seen.max(event.timestamp_ms)),
                );
                result.events.push(event);
            }

            let Some(next) = page.next_forward_token else {
                more = false;
                break;
            };

            // The store hands back the token it was given once the stream is drained.
            more = !matches!(&start, EventStart::Token(used) if *used == next);
            result.position.next_forward_token = Some(next.clone());
            if !more {
                break;
            }
            start = EventStart::Token(next);
        }

        if skipped > 0 {
            debug!(
                log_stream = %key,
                skipped = skipped,
                "Dropped events older than the last seen timestamp"
            );
        }

        if more && !result.degraded {
            warn!(
                log_stream = %key,
                max_pages = self.max_pages,
                "Page limit reached, remaining events are left for the next cycle"
            );
        }

        result
    }

    fn start_for(&self, position: &ReadPosition) -> EventStart {
        if let Some(token) = &position.next_forward_token {
            return EventStart::Token(token.clone());
        }
        if let Some(timestamp_ms) = position.last_seen_timestamp_ms {
            return EventStart::Time(timestamp_ms);
        }
        match self.read_from {
            ReadStart::Beginning => EventStart::Head,
            ReadStart::Now => EventStart::Time(Utc::now().timestamp_millis()),
        }
    }
}
