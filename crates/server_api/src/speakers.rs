use shared::{
    domain::{AgendaItemId, UserId},
    error::VotingError,
};
use storage::Storage;
use tracing::debug;

use crate::internal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerChange {
    Added,
    AlreadyWaiting,
    Removed,
    NotWaiting,
}

/// Applies a keypad's speaker-list button: `Y` enqueues the owner, `N`
/// withdraws a waiting entry.
pub async fn handle_speaker_request(
    storage: &Storage,
    item_id: AgendaItemId,
    owner: Option<UserId>,
    value: &str,
) -> Result<SpeakerChange, VotingError> {
    let Some(user_id) = owner else {
        return Err(VotingError::AnonymousNotAllowed);
    };
    if storage
        .load_agenda_item(item_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(VotingError::UnknownTarget(format!("agenda item {}", item_id.0)));
    }

    match value.trim() {
        "Y" => {
            let added = storage
                .add_waiting_speaker(item_id, user_id)
                .await
                .map_err(internal)?;
            match added {
                Some(speaker_id) => {
                    debug!(item_id = item_id.0, user_id = user_id.0, speaker_id = speaker_id.0, "speaker added");
                    Ok(SpeakerChange::Added)
                }
                None => Ok(SpeakerChange::AlreadyWaiting),
            }
        }
        "N" => {
            let removed = storage
                .remove_waiting_speaker(item_id, user_id)
                .await
                .map_err(internal)?;
            Ok(if removed {
                SpeakerChange::Removed
            } else {
                SpeakerChange::NotWaiting
            })
        }
        other => Err(VotingError::InvalidRequest(format!(
            "unsupported speaker list button '{other}'"
        ))),
    }
}

#[cfg(test)]
#[path = "tests/speakers_tests.rs"]
mod tests;
