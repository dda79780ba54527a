pub mod adapters;
pub mod cache;
pub mod coalesce;
pub mod ingestor;
pub mod normalize;
pub mod ports;

pub use cache::ReadingCache;
pub use coalesce::Coalescer;
pub use ingestor::SensorIngestor;
pub use normalize::{normalize_sample, sample_from_json};
pub use ports::{Feed, PullFeed, PushFeed, RawSample, SampleStream};
