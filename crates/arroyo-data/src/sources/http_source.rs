//! HTTP conjunction source

use std::time::Duration;

use arroyo_core::{ConjunctionSource, QueryDescriptor, ResponsePage, SourceError, TableVariant};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::DataError;

/// Conjunction backend reached over HTTP
///
/// Each query is POSTed as JSON to the variant's endpoint under `base_url`.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    variant: TableVariant,
}

impl HttpSource {
    pub fn new(base_url: &str, variant: TableVariant, timeout: Option<Duration>) -> Result<Self, DataError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url: format!("{}{}", base_url.trim_end_matches('/'), variant.endpoint()),
            variant,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConjunctionSource for HttpSource {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<ResponsePage, SourceError> {
        let request = query.to_request(self.variant);
        debug!("POST {} begin={} nrows={}", self.url, request.begin, request.nrows);

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                message: detail(&body),
            });
        }

        serde_json::from_slice::<ResponsePage>(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn source_name(&self) -> &str {
        &self.url
    }
}

/// The `detail` member of an error body, if there is one
fn detail(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("detail")? {
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}
