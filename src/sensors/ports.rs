use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::HubError;

/// Un-normalized telemetry as a feed delivers it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub fields: Map<String, Value>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl RawSample {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

pub type SampleStream =
    Pin<Box<dyn Stream<Item = Result<RawSample, HubError>> + Send + 'static>>;

#[async_trait]
pub trait PullFeed: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch(&self) -> Result<RawSample, HubError>;
}

/// A streaming source. The stream ending means the feed disconnected.
#[async_trait]
pub trait PushFeed: Send + Sync {
    fn source_id(&self) -> &str;

    async fn connect(&self) -> Result<SampleStream, HubError>;
}

#[derive(Clone)]
pub enum Feed {
    Pull {
        feed: Arc<dyn PullFeed>,
        interval: Duration,
    },
    Push(Arc<dyn PushFeed>),
}

impl Feed {
    pub fn pull(feed: Arc<dyn PullFeed>, interval: Duration) -> Self {
        Feed::Pull { feed, interval }
    }

    pub fn push(feed: Arc<dyn PushFeed>) -> Self {
        Feed::Push(feed)
    }

    pub fn source_id(&self) -> &str {
        match self {
            Feed::Pull { feed, .. } => feed.source_id(),
            Feed::Push(feed) => feed.source_id(),
        }
    }
}
