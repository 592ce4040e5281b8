use std::{
    collections::BTreeSet,
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use device_gateway::{CollectionMode, DeviceError, DeviceGateway, DeviceStatus, DeviceTally};
use server_api::{
    callbacks::{self, CallbackReport},
    ApiContext, ControllerSettings,
};
use shared::{
    domain::{KeypadId, PollRef, VotingTarget},
    protocol::{CallbackOutcome, KeypadCallbackForm},
};
use storage::Storage;
use tempfile::TempDir;
use tokio::{sync::Mutex, task::JoinHandle};

/// Vote collector that notes when each start reaches it and, like the real
/// device, may answer a ping from a keypad before the start call returns.
#[derive(Default)]
struct EchoingGateway {
    ctx: OnceLock<ApiContext>,
    ping_from: Option<KeypadId>,
    starts: Mutex<Vec<DateTime<Utc>>>,
    pings: Mutex<Vec<JoinHandle<CallbackReport>>>,
}

#[async_trait]
impl DeviceGateway for EchoingGateway {
    async fn start_collection(
        &self,
        _mode: CollectionMode,
        _options: Option<u8>,
        _callback_url: &str,
    ) -> Result<i64, DeviceError> {
        self.starts.lock().await.push(Utc::now());
        if let (Some(keypad_id), Some(ctx)) = (self.ping_from.clone(), self.ctx.get().cloned()) {
            let ping = tokio::spawn(async move {
                let form = KeypadCallbackForm {
                    battery: Some("80".into()),
                    ..KeypadCallbackForm::default()
                };
                callbacks::keepalive(&ctx, Some(&keypad_id), &form)
                    .await
                    .expect("keepalive")
            });
            self.pings.lock().await.push(ping);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(1)
    }

    async fn stop_collection(&self) -> Result<DeviceTally, DeviceError> {
        Ok(DeviceTally::default())
    }

    async fn query_status(&self) -> Result<DeviceStatus, DeviceError> {
        Ok(DeviceStatus::default())
    }

    async fn query_result(&self) -> Result<DeviceTally, DeviceError> {
        Ok(DeviceTally::default())
    }

    async fn query_device_status(&self) -> Result<String, DeviceError> {
        Ok("Device: echo".into())
    }
}

async fn context(ping_from: Option<KeypadId>) -> (TempDir, ApiContext, Arc<EchoingGateway>) {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let database_url = format!(
        "sqlite://{}",
        temp_root
            .path()
            .join("votes.db")
            .to_string_lossy()
            .replace('\\', "/")
    );
    let storage = Storage::new(&database_url).await.expect("db");
    let gateway = Arc::new(EchoingGateway {
        ping_from,
        ..EchoingGateway::default()
    });
    let ctx = ApiContext::new(storage, gateway.clone(), ControllerSettings::default());
    assert!(gateway.ctx.set(ctx.clone()).is_ok());
    (temp_root, ctx, gateway)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_answered_while_a_connectivity_test_starts_outlives_the_keypad_reset() {
    let keypad_id = KeypadId::new("K1");
    let (_temp_root, ctx, gateway) = context(Some(keypad_id.clone())).await;
    ctx.storage
        .create_keypad(&keypad_id, None, None)
        .await
        .expect("keypad");

    ctx.sessions
        .start_session(VotingTarget::ConnectivityTest)
        .await
        .expect("start");

    let pings = std::mem::take(&mut *gateway.pings.lock().await);
    assert_eq!(pings.len(), 1);
    for ping in pings {
        let report = ping.await.expect("join");
        assert_eq!(report.outcome, CallbackOutcome::Acknowledged);
    }

    let keypad = ctx
        .storage
        .load_keypad(&keypad_id)
        .await
        .expect("load")
        .expect("keypad");
    assert!(keypad.in_range, "keypad answered the ping");
    assert_eq!(keypad.battery_level, 80);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn votes_racing_a_restart_survive_only_when_stored_after_the_reset() {
    let (_temp_root, ctx, gateway) = context(None).await;
    let poll_id = ctx.storage.create_motion_poll("budget").await.expect("poll");
    let target = VotingTarget::MotionVote(poll_id);
    let keypads: Vec<KeypadId> = (1..=16).map(|n| KeypadId::new(format!("K{n}"))).collect();
    for keypad_id in &keypads {
        ctx.storage
            .create_keypad(keypad_id, None, None)
            .await
            .expect("keypad");
    }
    ctx.sessions.start_session(target).await.expect("start");

    let mut tasks = Vec::new();
    for (delay, keypad_id) in keypads.into_iter().enumerate() {
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            let form = KeypadCallbackForm {
                value: Some("Y".into()),
                votes: Some("3".into()),
                ..KeypadCallbackForm::default()
            };
            callbacks::vote(&ctx, poll_id.0, &keypad_id, &form)
                .await
                .expect("callback")
        }));
    }
    tokio::time::sleep(Duration::from_millis(8)).await;
    ctx.sessions.start_session(target).await.expect("restart");

    let mut reports = Vec::new();
    for task in tasks {
        reports.push(task.await.expect("join"));
    }
    let reset_at = gateway.starts.lock().await[1];

    let mut kept = BTreeSet::new();
    for report in &reports {
        match report.outcome {
            CallbackOutcome::VoteSubmitted => {
                let record = report.vote.as_ref().expect("record");
                if record.updated_at > reset_at {
                    kept.insert(record.keypad_id.clone().expect("keypad"));
                }
            }
            CallbackOutcome::VoteRejected => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    let surviving: BTreeSet<KeypadId> = ctx
        .storage
        .list_votes(PollRef::Motion(poll_id))
        .await
        .expect("votes")
        .into_iter()
        .filter_map(|record| record.keypad_id)
        .collect();
    assert_eq!(surviving, kept);
    assert!(ctx.sessions.session().await.is_active);
}
