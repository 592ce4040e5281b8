//! In-process stand-in for a vote collector, for tests in dependent crates.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{CollectionMode, DeviceError, DeviceGateway, DeviceStatus, DeviceTally};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Start {
        mode: CollectionMode,
        options: Option<u8>,
        callback_url: String,
    },
    Stop,
    Status,
    Result,
    Device,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub start: Result<i64, DeviceError>,
    pub stop: Result<DeviceTally, DeviceError>,
    pub status: Result<DeviceStatus, DeviceError>,
    pub result: Result<DeviceTally, DeviceError>,
    pub device: Result<String, DeviceError>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start: Ok(0),
            stop: Ok(DeviceTally::default()),
            status: Ok(DeviceStatus::default()),
            result: Ok(DeviceTally::default()),
            device: Ok("Device: VoteCollector 1.0".into()),
        }
    }
}

#[derive(Default)]
pub struct ScriptedDeviceGateway {
    script: Mutex<Script>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl ScriptedDeviceGateway {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn update(&self, change: impl FnOnce(&mut Script)) {
        change(&mut *self.script.lock().await);
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: GatewayCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl DeviceGateway for ScriptedDeviceGateway {
    async fn start_collection(
        &self,
        mode: CollectionMode,
        options: Option<u8>,
        callback_url: &str,
    ) -> Result<i64, DeviceError> {
        self.record(GatewayCall::Start {
            mode,
            options,
            callback_url: callback_url.to_string(),
        })
        .await;
        self.script.lock().await.start.clone()
    }

    async fn stop_collection(&self) -> Result<DeviceTally, DeviceError> {
        self.record(GatewayCall::Stop).await;
        self.script.lock().await.stop.clone()
    }

    async fn query_status(&self) -> Result<DeviceStatus, DeviceError> {
        self.record(GatewayCall::Status).await;
        self.script.lock().await.status.clone()
    }

    async fn query_result(&self) -> Result<DeviceTally, DeviceError> {
        self.record(GatewayCall::Result).await;
        self.script.lock().await.result.clone()
    }

    async fn query_device_status(&self) -> Result<String, DeviceError> {
        self.record(GatewayCall::Device).await;
        self.script.lock().await.device.clone()
    }
}
