pub mod aggregator;
pub mod fetcher;
pub mod request_tracker;
pub mod sampler;
pub mod store;

pub use aggregator::{aggregate, Aggregator, MailboxAggregate, ReportTimezone, SenderRollup, SenderStats, SortMetric};
pub use fetcher::{BatchFetcher, FetchOutcome, RetryPolicy};
pub use request_tracker::RequestTracker;
pub use sampler::{IdSampler, SamplingMode};
pub use store::{DetailLevel, ListPage, MessageId, MessageMetadata, MessagePart, MessageStore};
