use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::{StreamExt, future};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::UnixStream,
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    error::{HubError, feed_unavailable, invalid_input},
    sensors::{
        normalize::sample_from_json,
        ports::{PushFeed, RawSample, SampleStream},
    },
};

/// Push feed reading NDJSON samples (`{fields, timestamp?}` per line) from a
/// Unix socket. Closing the socket ends the stream.
#[derive(Debug, Clone)]
pub struct UnixSocketStreamFeed {
    source_id: String,
    socket_path: PathBuf,
}

impl UnixSocketStreamFeed {
    pub fn new(source_id: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl PushFeed for UnixSocketStreamFeed {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn connect(&self) -> Result<SampleStream, HubError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|err| {
            feed_unavailable(format!(
                "failed to connect to {}: {err}",
                self.socket_path.display()
            ))
        })?;

        let lines = LinesStream::new(BufReader::new(stream).lines());
        let samples = lines.filter_map(|line| {
            future::ready(match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(parse_line(&line)),
                Err(err) => Some(Err(feed_unavailable(format!("socket read failed: {err}")))),
            })
        });
        Ok(samples.boxed())
    }
}

fn parse_line(line: &str) -> Result<RawSample, HubError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|err| invalid_input(format!("sample line is not valid json: {err}")))?;
    sample_from_json(value)
}
