//! Keypad events relayed by the vote collector. Each event is answered with a
//! [`CallbackOutcome`]; only storage failures surface as errors. Every event
//! holds the session read guard while it touches storage, so it lands entirely
//! before or after a start or stop.

use shared::{
    domain::{
        AgendaItemId, ElectionPollId, Keypad, KeypadId, MotionPollId, PollRef, Session,
        VoteRecord, VotingTarget,
    },
    error::VotingError,
    protocol::{CallbackOutcome, KeypadCallbackForm, VoteProgress},
};
use tracing::debug;

use crate::{
    keypads, ledger,
    speakers::{self, SpeakerChange},
    ApiContext,
};

#[derive(Debug, Clone)]
pub struct CallbackReport {
    pub outcome: CallbackOutcome,
    /// The keypad as refreshed by this event, when it is registered.
    pub keypad: Option<Keypad>,
    pub vote: Option<VoteRecord>,
    pub progress: Option<VoteProgress>,
}

impl CallbackReport {
    fn new(outcome: CallbackOutcome, keypad: Option<Keypad>) -> Self {
        Self {
            outcome,
            keypad,
            vote: None,
            progress: None,
        }
    }
}

/// Progress counters the vote collector attaches to a vote; unreadable means zero.
pub fn parse_progress(form: &KeypadCallbackForm) -> VoteProgress {
    let number = |raw: Option<&str>| {
        raw.and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or_default()
    };
    VoteProgress {
        votes_received: number(form.votes.as_deref()),
        elapsed_seconds: number(form.elapsed.as_deref()),
    }
}

/// Yes/no/abstain answer. The vote collector does not say whether `poll_id`
/// names a motion or an election; an election is meant only while it is the
/// running session.
pub async fn vote(
    ctx: &ApiContext,
    poll_id: i64,
    keypad_id: &KeypadId,
    form: &KeypadCallbackForm,
) -> Result<CallbackReport, VotingError> {
    let poll_for = |session: &Session| match session.target {
        Some(VotingTarget::ElectionVote(election)) if election.0 == poll_id => {
            PollRef::Election(election)
        }
        _ => PollRef::Motion(MotionPollId(poll_id)),
    };
    submit_vote(ctx, poll_for, keypad_id, form).await
}

/// Candidate key for an election.
pub async fn candidate(
    ctx: &ApiContext,
    poll_id: ElectionPollId,
    keypad_id: &KeypadId,
    form: &KeypadCallbackForm,
) -> Result<CallbackReport, VotingError> {
    submit_vote(ctx, |_| PollRef::Election(poll_id), keypad_id, form).await
}

async fn submit_vote(
    ctx: &ApiContext,
    poll_for: impl FnOnce(&Session) -> PollRef,
    keypad_id: &KeypadId,
    form: &KeypadCallbackForm,
) -> Result<CallbackReport, VotingError> {
    let battery = keypads::parse_battery(form.battery.as_deref());

    let session = ctx.sessions.read().await;
    let poll = poll_for(&session);
    let run = session.run;
    let keypad = match keypads::touch(&ctx.storage, keypad_id, battery).await {
        Ok(keypad) => keypad,
        Err(err) => return vote_refused(err, None),
    };
    let stored = store_vote(ctx, &session, poll, keypad_id, form).await;
    drop(session);

    match stored {
        Ok(record) => {
            let progress = parse_progress(form);
            ctx.sessions.record_progress(run, progress).await;
            Ok(CallbackReport {
                outcome: CallbackOutcome::VoteSubmitted,
                keypad: Some(keypad),
                vote: Some(record),
                progress: Some(progress),
            })
        }
        Err(err) => vote_refused(err, Some(keypad)),
    }
}

async fn store_vote(
    ctx: &ApiContext,
    session: &Session,
    poll: PollRef,
    keypad_id: &KeypadId,
    form: &KeypadCallbackForm,
) -> Result<VoteRecord, VotingError> {
    if session.active_target() != Some(VotingTarget::from(poll)) {
        return Err(VotingError::NoActiveSession);
    }
    let resolved = ledger::resolve_poll(&ctx.storage, poll).await?;
    ledger::record_vote(
        &ctx.storage,
        &resolved,
        keypad_id,
        form.value.as_deref().unwrap_or_default(),
        form.sn.as_deref(),
    )
    .await
}

fn vote_refused(
    err: VotingError,
    keypad: Option<Keypad>,
) -> Result<CallbackReport, VotingError> {
    let outcome = match err {
        VotingError::Internal(_) => return Err(err),
        VotingError::InvalidVoteValue(_) => CallbackOutcome::VoteInvalid,
        _ => CallbackOutcome::VoteRejected,
    };
    debug!(error = %err, "vote callback refused");
    Ok(CallbackReport::new(outcome, keypad))
}

/// Speaker-list button of a keypad owner.
pub async fn speaker(
    ctx: &ApiContext,
    item_id: AgendaItemId,
    keypad_id: &KeypadId,
    form: &KeypadCallbackForm,
) -> Result<CallbackReport, VotingError> {
    let battery = keypads::parse_battery(form.battery.as_deref());

    let session = ctx.sessions.read().await;
    let keypad = match keypads::touch(&ctx.storage, keypad_id, battery).await {
        Ok(keypad) => keypad,
        Err(VotingError::UnknownKeypad(_)) => {
            return Ok(CallbackReport::new(CallbackOutcome::KeypadNotRegistered, None))
        }
        Err(err) => return Err(err),
    };
    let change = speakers::handle_speaker_request(
        &ctx.storage,
        item_id,
        keypad.user_id,
        form.value.as_deref().unwrap_or_default(),
    )
    .await;
    drop(session);
    let outcome = match change {
        Ok(SpeakerChange::Added | SpeakerChange::AlreadyWaiting) => CallbackOutcome::SpeakerAdded,
        Ok(SpeakerChange::Removed | SpeakerChange::NotWaiting) => CallbackOutcome::SpeakerRemoved,
        Err(VotingError::AnonymousNotAllowed) => CallbackOutcome::UserUnknown,
        Err(VotingError::UnknownTarget(_)) => CallbackOutcome::NoAgendaItem,
        Err(VotingError::Internal(message)) => return Err(VotingError::Internal(message)),
        Err(err) => {
            debug!(%keypad_id, error = %err, "speaker callback refused");
            CallbackOutcome::InvalidEntry
        }
    };
    Ok(CallbackReport::new(outcome, Some(keypad)))
}

/// Presence ping. Keypad id `0` or none means the vote collector only checks
/// that the server is reachable.
pub async fn keepalive(
    ctx: &ApiContext,
    keypad_id: Option<&KeypadId>,
    form: &KeypadCallbackForm,
) -> Result<CallbackReport, VotingError> {
    let Some(keypad_id) = keypad_id.filter(|id| id.as_str() != "0") else {
        return Ok(CallbackReport::new(CallbackOutcome::Acknowledged, None));
    };
    let battery = keypads::parse_battery(form.battery.as_deref());

    // Keypad resets run under the write guard.
    let _session = ctx.sessions.read().await;
    let keypad = match keypads::touch(&ctx.storage, keypad_id, battery).await {
        Ok(keypad) => Some(keypad),
        Err(VotingError::UnknownKeypad(_)) => None,
        Err(err) => return Err(err),
    };
    Ok(CallbackReport::new(CallbackOutcome::Acknowledged, keypad))
}

#[cfg(test)]
#[path = "tests/callbacks_tests.rs"]
mod tests;
