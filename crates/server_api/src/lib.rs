use std::sync::Arc;

use device_gateway::DeviceGateway;
use shared::error::VotingError;
use storage::Storage;

pub mod callbacks;
pub mod keypads;
pub mod ledger;
pub mod session;
pub mod speakers;
pub mod tally;

pub use session::{ControllerSettings, SessionController};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub sessions: Arc<SessionController>,
}

impl ApiContext {
    pub fn new(
        storage: Storage,
        gateway: Arc<dyn DeviceGateway>,
        settings: ControllerSettings,
    ) -> Self {
        let sessions = Arc::new(SessionController::new(storage.clone(), gateway, settings));
        Self { storage, sessions }
    }
}

fn internal(err: anyhow::Error) -> VotingError {
    VotingError::Internal(format!("{err:#}"))
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
