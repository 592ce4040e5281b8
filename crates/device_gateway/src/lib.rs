use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[cfg(feature = "testing")]
pub mod testing;

/// How the vote collector unlocks keypad buttons for a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionMode {
    YesNoAbstain,
    SingleDigit,
    SpeakerList,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("vote collector is unreachable: {0}")]
    Unreachable(String),
    #[error("vote collector answered with status {0}")]
    Status(u16),
    #[error("vote collector rejected the command: {0}")]
    Rejected(String),
    #[error("vote collector did not answer in time")]
    Timeout,
    #[error("vote collector sent an unreadable reply: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub elapsed_seconds: i64,
    pub votes_received: i64,
}

/// Counts reported by the vote collector; `[yes, no, abstain]` for
/// yes/no/abstain collections.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceTally {
    pub counts: Vec<i64>,
}

impl DeviceTally {
    pub fn yes_no_abstain(&self) -> (i64, i64, i64) {
        let count = |index: usize| self.counts.get(index).copied().unwrap_or_default();
        (count(0), count(1), count(2))
    }
}

#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Starts collecting; returns the number of keypads the device expects.
    async fn start_collection(
        &self,
        mode: CollectionMode,
        options: Option<u8>,
        callback_url: &str,
    ) -> Result<i64, DeviceError>;
    async fn stop_collection(&self) -> Result<DeviceTally, DeviceError>;
    async fn query_status(&self) -> Result<DeviceStatus, DeviceError>;
    async fn query_result(&self) -> Result<DeviceTally, DeviceError>;
    async fn query_device_status(&self) -> Result<String, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct DeviceGatewayConfig {
    pub uri: String,
    pub timeout: Duration,
}

impl Default for DeviceGatewayConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:8030".into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Serialize)]
struct StartCommand<'a> {
    mode: CollectionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<u8>,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartReply {
    voter_count: i64,
}

#[derive(Debug, Deserialize)]
struct DeviceReply {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply<T> {
    Failed { error: String },
    Done(T),
}

/// Talks JSON over HTTP to a vote collector.
#[derive(Clone)]
pub struct HttpDeviceGateway {
    http: Client,
    base_url: String,
}

impl HttpDeviceGateway {
    pub fn new(config: &DeviceGatewayConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.uri.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, DeviceError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16()));
        }
        let reply: Reply<T> = response
            .json()
            .await
            .map_err(|e| DeviceError::Malformed(e.to_string()))?;
        match reply {
            Reply::Failed { error } => Err(DeviceError::Rejected(error)),
            Reply::Done(value) => Ok(value),
        }
    }
}

fn transport_error(err: reqwest::Error) -> DeviceError {
    if err.is_timeout() {
        DeviceError::Timeout
    } else {
        DeviceError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl DeviceGateway for HttpDeviceGateway {
    async fn start_collection(
        &self,
        mode: CollectionMode,
        options: Option<u8>,
        callback_url: &str,
    ) -> Result<i64, DeviceError> {
        debug!(?mode, ?options, %callback_url, "starting vote collection");
        let reply: StartReply = self
            .call(self.http.post(self.url("/voting/start")).json(&StartCommand {
                mode,
                options,
                callback_url,
            }))
            .await?;
        Ok(reply.voter_count)
    }

    async fn stop_collection(&self) -> Result<DeviceTally, DeviceError> {
        self.call(self.http.post(self.url("/voting/stop"))).await
    }

    async fn query_status(&self) -> Result<DeviceStatus, DeviceError> {
        self.call(self.http.get(self.url("/voting/status"))).await
    }

    async fn query_result(&self) -> Result<DeviceTally, DeviceError> {
        self.call(self.http.get(self.url("/voting/result"))).await
    }

    async fn query_device_status(&self) -> Result<String, DeviceError> {
        let reply: DeviceReply = self.call(self.http.get(self.url("/device"))).await?;
        Ok(reply.status)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
