use std::{sync::Arc, time::Duration};

use device_gateway::testing::{Script, ScriptedDeviceGateway};
use shared::domain::{
    AgendaItemId, ElectionMethod, ElectionPollId, KeypadId, MotionPollId, UserId,
};
use storage::Storage;

use crate::{ApiContext, ControllerSettings};

pub struct Fixture {
    pub ctx: ApiContext,
    pub gateway: Arc<ScriptedDeviceGateway>,
}

impl Fixture {
    pub async fn new(script: Script) -> Self {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let gateway = Arc::new(ScriptedDeviceGateway::new(script));
        let ctx = ApiContext::new(
            storage,
            gateway.clone(),
            ControllerSettings {
                callback_base_url: "http://votes.local:8443/".into(),
                stop_timeout: Duration::from_millis(200),
            },
        );
        Self { ctx, gateway }
    }

    pub fn storage(&self) -> &Storage {
        &self.ctx.storage
    }

    pub async fn user(&self, username: &str) -> UserId {
        self.storage()
            .create_user(username, username)
            .await
            .expect("user")
    }

    pub async fn keypad(&self, id: &str, owner: Option<UserId>) -> KeypadId {
        let keypad_id = KeypadId::new(id);
        self.storage()
            .create_keypad(&keypad_id, owner, None)
            .await
            .expect("keypad");
        keypad_id
    }

    pub async fn motion(&self, title: &str) -> MotionPollId {
        self.storage()
            .create_motion_poll(title)
            .await
            .expect("motion poll")
    }

    pub async fn election(&self, method: ElectionMethod, candidates: &[&str]) -> ElectionPollId {
        let poll_id = self
            .storage()
            .create_election_poll("Board election", method)
            .await
            .expect("election poll");
        for name in candidates {
            self.storage()
                .add_candidate(poll_id, None, name)
                .await
                .expect("candidate");
        }
        poll_id
    }

    pub async fn agenda_item(&self, title: &str) -> AgendaItemId {
        self.storage()
            .create_agenda_item(title)
            .await
            .expect("agenda item")
    }
}
