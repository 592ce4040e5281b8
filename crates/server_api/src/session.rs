use std::{sync::Arc, time::Duration};

use device_gateway::{CollectionMode, DeviceError, DeviceGateway};
use futures::future::BoxFuture;
use shared::{
    domain::{
        AgendaItem, ElectionMethod, Overlay, PollRef, PromptAxis, PromptChoice, Session,
        VoteAxis, VotingMode, VotingResult, VotingTarget,
    },
    error::VotingError,
    protocol::VoteProgress,
};
use storage::Storage;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::{
    internal, keypads,
    ledger::{self, ResolvedPoll},
    tally,
};

/// Candidate keys are the digits 1..=9; 0 abstains.
pub const MAX_KEYPAD_CANDIDATES: usize = 9;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Public base URL of this server; the vote collector posts keypad events below it.
    pub callback_base_url: String,
    pub stop_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            callback_base_url: "http://127.0.0.1:8443".into(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// A start target after it has been checked against storage.
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Poll(ResolvedPoll),
    AgendaItem(AgendaItem),
    ConnectivityTest,
}

impl ResolvedTarget {
    fn collection(&self) -> (CollectionMode, Option<u8>, &'static str) {
        match self {
            Self::Poll(poll) => match poll.axis() {
                VoteAxis::YesNoAbstain => (CollectionMode::YesNoAbstain, None, "vote"),
                VoteAxis::Candidates { count } => {
                    // Bounded by MAX_KEYPAD_CANDIDATES during resolution.
                    let options = u8::try_from(count + 1).unwrap_or(u8::MAX);
                    (CollectionMode::SingleDigit, Some(options), "candidate")
                }
            },
            Self::AgendaItem(_) => (CollectionMode::SpeakerList, None, "speaker"),
            Self::ConnectivityTest => (CollectionMode::Ping, None, "keypad"),
        }
    }
}

type PrepareFn =
    for<'a> fn(&'a Storage, &'a ResolvedTarget) -> BoxFuture<'a, Result<Option<Overlay>, VotingError>>;

/// What each mode does locally once the vote collector accepted the start.
const START_STRATEGIES: &[(VotingMode, PrepareFn)] = &[
    (VotingMode::MotionVote, prepare_vote),
    (VotingMode::ElectionVote, prepare_vote),
    (VotingMode::SpeakerList, prepare_speaker_list),
    (VotingMode::ConnectivityTest, prepare_connectivity_test),
];

fn prepare_vote<'a>(
    storage: &'a Storage,
    target: &'a ResolvedTarget,
) -> BoxFuture<'a, Result<Option<Overlay>, VotingError>> {
    Box::pin(async move {
        let ResolvedTarget::Poll(poll) = target else {
            return Err(VotingError::InvalidTarget("vote session without a poll".into()));
        };
        let cleared = storage
            .delete_votes(poll.poll_ref())
            .await
            .map_err(internal)?;
        debug!(poll = %poll.poll_ref(), cleared, "cleared previous votes");
        Ok(Some(voting_prompt(poll)))
    })
}

fn prepare_speaker_list<'a>(
    _storage: &'a Storage,
    _target: &'a ResolvedTarget,
) -> BoxFuture<'a, Result<Option<Overlay>, VotingError>> {
    Box::pin(async { Ok(Some(Overlay::VotingIcon)) })
}

fn prepare_connectivity_test<'a>(
    storage: &'a Storage,
    _target: &'a ResolvedTarget,
) -> BoxFuture<'a, Result<Option<Overlay>, VotingError>> {
    Box::pin(async move {
        let reset = keypads::reset_all(storage).await?;
        debug!(reset, "keypads marked out of range");
        Ok(None)
    })
}

fn voting_prompt(poll: &ResolvedPoll) -> Overlay {
    let candidates = poll.candidates();
    match poll.axis() {
        VoteAxis::YesNoAbstain => Overlay::VotingPrompt {
            axis: PromptAxis::YesNoAbstain,
            choices: match candidates {
                [only] => vec![PromptChoice {
                    key: 1,
                    label: only.name.clone(),
                }],
                _ => Vec::new(),
            },
        },
        VoteAxis::Candidates { .. } => {
            let mut choices: Vec<PromptChoice> = candidates
                .iter()
                .zip(1u8..)
                .map(|(candidate, key)| PromptChoice {
                    key,
                    label: candidate.name.clone(),
                })
                .collect();
            choices.push(PromptChoice {
                key: 0,
                label: "Abstain".into(),
            });
            Overlay::VotingPrompt {
                axis: PromptAxis::Candidates,
                choices,
            }
        }
    }
}

pub async fn resolve_target(
    storage: &Storage,
    target: VotingTarget,
) -> Result<ResolvedTarget, VotingError> {
    match target {
        VotingTarget::MotionVote(poll_id) => {
            let poll = ledger::resolve_poll(storage, PollRef::Motion(poll_id)).await?;
            Ok(ResolvedTarget::Poll(poll))
        }
        VotingTarget::ElectionVote(poll_id) => {
            let poll = ledger::resolve_poll(storage, PollRef::Election(poll_id)).await?;
            if let ResolvedPoll::Election { poll: election, candidates } = &poll {
                let count = candidates.len();
                if election.method == ElectionMethod::Votes
                    && !(1..=MAX_KEYPAD_CANDIDATES).contains(&count)
                {
                    return Err(VotingError::InvalidTarget(format!(
                        "election {} has {count} candidates, keypads support 1 to {MAX_KEYPAD_CANDIDATES}",
                        poll_id.0
                    )));
                }
            }
            Ok(ResolvedTarget::Poll(poll))
        }
        VotingTarget::SpeakerList(item_id) => storage
            .load_agenda_item(item_id)
            .await
            .map_err(internal)?
            .map(ResolvedTarget::AgendaItem)
            .ok_or_else(|| VotingError::UnknownTarget(format!("agenda item {}", item_id.0))),
        VotingTarget::ConnectivityTest => Ok(ResolvedTarget::ConnectivityTest),
    }
}

/// Owns the singleton voting session and drives the vote collector through
/// its lifecycle.
pub struct SessionController {
    storage: Storage,
    gateway: Arc<dyn DeviceGateway>,
    settings: ControllerSettings,
    session: RwLock<Session>,
    overlay: Mutex<Option<Overlay>>,
}

impl SessionController {
    pub fn new(
        storage: Storage,
        gateway: Arc<dyn DeviceGateway>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            storage,
            gateway,
            settings,
            session: RwLock::new(Session::default()),
            overlay: Mutex::new(None),
        }
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn overlay(&self) -> Option<Overlay> {
        self.overlay.lock().await.clone()
    }

    /// Shared access for keypad callbacks. Start and stop wait until every
    /// outstanding guard is dropped.
    pub async fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().await
    }

    fn callback_url(&self, resource: &str, target: VotingTarget) -> String {
        let base = self.settings.callback_base_url.trim_end_matches('/');
        match target.target_id() {
            0 => format!("{base}/votecollector/{resource}"),
            id => format!("{base}/votecollector/{resource}/{id}"),
        }
    }

    /// Starts collecting for `target`, stopping whatever ran before. Returns the
    /// number of keypads the vote collector expects.
    pub async fn start_session(&self, target: VotingTarget) -> Result<i64, VotingError> {
        let resolved = resolve_target(&self.storage, target).await?;
        let (mode, options, resource) = resolved.collection();
        let callback_url = self.callback_url(resource, target);

        let mut session = self.session.write().await;
        if let Some(previous) = session.active_target() {
            if let Err(err) = self.stop_device().await {
                warn!(?previous, error = %err, "stopping the previous voting failed, continuing");
            }
            session.is_active = false;
            *self.overlay.lock().await = None;
        }

        let voter_count = self
            .gateway
            .start_collection(mode, options, &callback_url)
            .await
            .map_err(|err| {
                warn!(?target, error = %err, "vote collector refused to start");
                VotingError::Device(err.to_string())
            })?;

        *session = Session {
            target: Some(target),
            is_active: true,
            expected_voter_count: voter_count.max(0),
            received_vote_count: 0,
            elapsed_seconds: 0,
            run: session.run.wrapping_add(1),
        };

        let prepare = START_STRATEGIES
            .iter()
            .find(|(strategy_mode, _)| *strategy_mode == target.mode())
            .map(|(_, prepare)| *prepare)
            .ok_or_else(|| VotingError::Internal(format!("no start strategy for {:?}", target.mode())))?;
        match prepare(&self.storage, &resolved).await {
            Ok(overlay) => {
                *self.overlay.lock().await = overlay;
            }
            Err(err) => {
                if let Err(stop_err) = self.stop_device().await {
                    warn!(error = %stop_err, "stopping after a failed start failed too");
                }
                session.is_active = false;
                *self.overlay.lock().await = None;
                return Err(err);
            }
        }

        info!(?target, voter_count, %callback_url, "voting started");
        Ok(voter_count)
    }

    /// Stops the running collection. The session always ends up inactive; the
    /// vote collector's answer or failure is passed back.
    pub async fn stop_session(&self) -> Result<Vec<i64>, VotingError> {
        let mut session = self.session.write().await;
        *self.overlay.lock().await = None;
        let outcome = self.stop_device().await;
        let target = session.target;
        session.is_active = false;
        drop(session);

        match outcome {
            Ok(counts) => {
                info!(?target, ?counts, "voting stopped");
                Ok(counts)
            }
            Err(err) => {
                warn!(?target, error = %err, "vote collector failed to stop, session closed locally");
                Err(VotingError::Device(err.to_string()))
            }
        }
    }

    async fn stop_device(&self) -> Result<Vec<i64>, DeviceError> {
        match tokio::time::timeout(self.settings.stop_timeout, self.gateway.stop_collection()).await
        {
            Ok(result) => result.map(|tally| tally.counts),
            Err(_) => Err(DeviceError::Timeout),
        }
    }

    pub async fn status(&self) -> Result<VoteProgress, VotingError> {
        if self.session.read().await.active_target().is_none() {
            return Err(VotingError::NoActiveSession);
        }
        let status = self
            .gateway
            .query_status()
            .await
            .map_err(|err| VotingError::Device(err.to_string()))?;
        Ok(VoteProgress {
            votes_received: status.votes_received,
            elapsed_seconds: status.elapsed_seconds,
        })
    }

    /// Result of the current or most recent session, which must be `target`.
    pub async fn result(&self, target: VotingTarget) -> Result<VotingResult, VotingError> {
        let Some(poll) = target.poll() else {
            return Err(VotingError::InvalidRequest(format!(
                "{:?} sessions have no result",
                target.mode()
            )));
        };
        let current = self.session.read().await.target;
        if current != Some(target) {
            return Err(VotingError::TargetMismatch { requested: target });
        }

        let resolved = ledger::resolve_poll(&self.storage, poll).await?;
        match (&resolved, resolved.axis()) {
            (ResolvedPoll::Election { poll, .. }, VoteAxis::Candidates { .. }) => {
                let tally = tally::tally_poll(&self.storage, poll.poll_id).await?;
                Ok(VotingResult::Candidates(tally))
            }
            _ => {
                let tally = self
                    .gateway
                    .query_result()
                    .await
                    .map_err(|err| VotingError::Device(err.to_string()))?;
                let (yes, no, abstain) = tally.yes_no_abstain();
                Ok(VotingResult::YesNoAbstain { yes, no, abstain })
            }
        }
    }

    pub async fn device_status(&self) -> Result<(String, bool), VotingError> {
        let status = self
            .gateway
            .query_device_status()
            .await
            .map_err(|err| VotingError::Device(err.to_string()))?;
        let connected = !status.starts_with("Device: None");
        Ok((status, connected))
    }

    /// Stores progress reported alongside a vote, unless the session moved on.
    /// `run` is the session run the vote was stored under; a stop or a restart
    /// on the same target makes it stale.
    pub async fn record_progress(&self, run: u64, progress: VoteProgress) -> bool {
        let mut session = self.session.write().await;
        if !session.is_active || session.run != run {
            return false;
        }
        session.received_vote_count = progress.votes_received.max(0);
        session.elapsed_seconds = progress.elapsed_seconds.max(0);
        true
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
