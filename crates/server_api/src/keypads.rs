use shared::{
    domain::{Keypad, KeypadId, UNKNOWN_BATTERY_LEVEL},
    error::VotingError,
};
use storage::Storage;
use tracing::debug;

use crate::internal;

/// Refreshes presence and battery of a provisioned keypad.
pub async fn touch(
    storage: &Storage,
    keypad_id: &KeypadId,
    battery_level: i64,
) -> Result<Keypad, VotingError> {
    let keypad = storage
        .touch_keypad(keypad_id, battery_level)
        .await
        .map_err(internal)?;
    match keypad {
        Some(keypad) => Ok(keypad),
        None => {
            debug!(%keypad_id, "callback from unregistered keypad");
            Err(VotingError::UnknownKeypad(keypad_id.clone()))
        }
    }
}

/// Marks every keypad out of range with an unknown battery level.
pub async fn reset_all(storage: &Storage) -> Result<u64, VotingError> {
    storage.reset_keypads().await.map_err(internal)
}

pub async fn list(storage: &Storage) -> Result<Vec<Keypad>, VotingError> {
    storage.list_keypads().await.map_err(internal)
}

/// Battery level as reported in a callback; absent or garbled means unknown.
pub fn parse_battery(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(UNKNOWN_BATTERY_LEVEL)
}
