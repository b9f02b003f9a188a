use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::record::Stream;

use super::TelemetryPublisher;
use super::error::SinkError;

pub const DEFAULT_QUERY_URL: &str = "http://127.0.0.1:8079/api/query";
pub const DEFAULT_INGEST_URL: &str = "http://127.0.0.1:8079/add/nokey";

const SOURCE_NAME: &str = "PECS";
const TIMEZONE: &str = "America/Los_Angeles";

#[derive(Debug, Deserialize)]
struct UuidReply {
    uuid: String,
}

pub fn stream_query(serial: u16, stream: Stream) -> String {
    format!("select uuid where Path like '{}'", stream.path(serial))
}

/// sMAP ingest document carrying a single reading.
pub fn ingest_document(path: &str, unit: &str, timestamp_ms: u64, value: f64, uuid: &str) -> Value {
    json!({
        path: {
            "Metadata": {
                "SourceName": SOURCE_NAME,
            },
            "Properties": {
                "Timezone": TIMEZONE,
                "ReadingType": "double",
                "UnitofMeasure": unit,
                "UnitofTime": "ms",
                "StreamType": "numeric",
            },
            "Readings": [[timestamp_ms, value]],
            "uuid": uuid,
        }
    })
}

/// Publishes readings to an sMAP archiver over HTTP.
#[derive(Debug, Clone)]
pub struct ArchiverPublisher {
    client: reqwest::Client,
    query_url: String,
    ingest_url: String,
}

impl ArchiverPublisher {
    pub fn new(query_url: impl Into<String>, ingest_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            query_url: query_url.into(),
            ingest_url: ingest_url.into(),
        }
    }

    async fn post(&self, url: &str, body: String) -> Result<String, SinkError> {
        let request_error = |source| SinkError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let text = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(SinkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

impl Default for ArchiverPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_URL, DEFAULT_INGEST_URL)
    }
}

#[async_trait]
impl TelemetryPublisher for ArchiverPublisher {
    async fn resolve_stream_id(&self, serial: u16, stream: Stream) -> Result<String, SinkError> {
        let reply = self.post(&self.query_url, stream_query(serial, stream)).await?;
        let found: Vec<UuidReply> =
            serde_json::from_str(&reply).map_err(|source| SinkError::Decode {
                url: self.query_url.clone(),
                source,
            })?;

        match found.into_iter().next() {
            Some(existing) => Ok(existing.uuid),
            None => {
                log::info!(
                    "No stream found for {:04x}/{}, creating new UUID",
                    serial,
                    stream
                );
                Ok(uuid::Uuid::new_v4().to_string())
            }
        }
    }

    async fn publish(
        &self,
        stream_id: &str,
        path: &str,
        unit: &str,
        timestamp_ms: u64,
        value: f64,
    ) -> Result<(), SinkError> {
        let document = ingest_document(path, unit, timestamp_ms, value, stream_id);
        self.post(&self.ingest_url, document.to_string()).await?;
        Ok(())
    }
}
