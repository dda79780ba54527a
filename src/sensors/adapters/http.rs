use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::{
    error::{HubError, feed_unavailable, invalid_input},
    sensors::{normalize::sample_from_json, ports::PullFeed, ports::RawSample},
};

/// Pull feed that GETs a JSON document on every fetch.
///
/// The body is either a flat object of fields or `{fields, timestamp?}`.
#[derive(Clone)]
pub struct HttpJsonFeed {
    source_id: String,
    url: Url,
    client: Client,
}

impl HttpJsonFeed {
    pub fn new(source_id: impl Into<String>, url: &str) -> Result<Self, HubError> {
        let url = match Url::parse(url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return Err(invalid_input(format!(
                    "unsupported feed url scheme '{}'",
                    url.scheme()
                )));
            }
            Err(err) => return Err(invalid_input(format!("invalid feed url '{url}': {err}"))),
        };

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| feed_unavailable(format!("failed to build http client: {err}")))?;

        Ok(Self {
            source_id: source_id.into(),
            url,
            client,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PullFeed for HttpJsonFeed {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self) -> Result<RawSample, HubError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| feed_unavailable(format!("GET {} failed: {err}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(feed_unavailable(format!(
                "GET {} returned status {}",
                self.url,
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| invalid_input(format!("GET {} returned invalid json: {err}", self.url)))?;
        sample_from_json(body)
    }
}
