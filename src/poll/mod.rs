pub mod fetcher;
pub mod resolver;
pub mod scheduler;

pub use fetcher::{EventFetcher, FetchResult};
pub use resolver::{date_prefixes, DiscoveryPolicy, StreamResolver};
pub use scheduler::{CycleSummary, PollScheduler, PollState, SchedulerError, SchedulerHandle};
