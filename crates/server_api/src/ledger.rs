use shared::{
    domain::{
        Candidate, CandidateId, ElectionMethod, ElectionPoll, KeypadId, MotionPoll, PollRef,
        VoteAxis, VoteRecord, VoteValue,
    },
    error::VotingError,
};
use storage::{Storage, VoteUpsert};
use tracing::debug;

use crate::internal;

/// A poll loaded together with what is needed to validate keypad answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPoll {
    Motion(MotionPoll),
    Election {
        poll: ElectionPoll,
        candidates: Vec<Candidate>,
    },
}

impl ResolvedPoll {
    pub fn poll_ref(&self) -> PollRef {
        match self {
            Self::Motion(poll) => PollRef::Motion(poll.poll_id),
            Self::Election { poll, .. } => PollRef::Election(poll.poll_id),
        }
    }

    pub fn axis(&self) -> VoteAxis {
        match self {
            Self::Motion(_) => VoteAxis::YesNoAbstain,
            Self::Election { poll, candidates } => match poll.method {
                ElectionMethod::Votes => VoteAxis::Candidates {
                    count: candidates.len(),
                },
                ElectionMethod::YesNo | ElectionMethod::YesNoAbstain => VoteAxis::YesNoAbstain,
            },
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Self::Motion(_) => &[],
            Self::Election { candidates, .. } => candidates,
        }
    }
}

pub async fn resolve_poll(storage: &Storage, poll: PollRef) -> Result<ResolvedPoll, VotingError> {
    match poll {
        PollRef::Motion(poll_id) => storage
            .load_motion_poll(poll_id)
            .await
            .map_err(internal)?
            .map(ResolvedPoll::Motion)
            .ok_or_else(|| VotingError::unknown_poll(poll)),
        PollRef::Election(poll_id) => {
            let Some(election) = storage.load_election_poll(poll_id).await.map_err(internal)? else {
                return Err(VotingError::unknown_poll(poll));
            };
            let candidates = storage.list_candidates(poll_id).await.map_err(internal)?;
            Ok(ResolvedPoll::Election {
                poll: election,
                candidates,
            })
        }
    }
}

/// Validates a raw keypad answer against the poll's vote axis and resolves the
/// candidate it stands for. Candidate keys are 1-based, `0` abstains.
pub fn parse_vote(
    poll: &ResolvedPoll,
    raw: &str,
) -> Result<(VoteValue, Option<CandidateId>), VotingError> {
    let invalid = || VotingError::InvalidVoteValue(raw.to_string());
    let value = VoteValue::parse(raw.trim()).ok_or_else(invalid)?;

    match (poll.axis(), value) {
        (VoteAxis::YesNoAbstain, VoteValue::Yes | VoteValue::No | VoteValue::Abstain) => {
            let candidate_id = match poll.candidates() {
                [only] => Some(only.candidate_id),
                _ => None,
            };
            Ok((value, candidate_id))
        }
        (VoteAxis::Candidates { .. }, VoteValue::Key(0)) => Ok((value, None)),
        (VoteAxis::Candidates { count }, VoteValue::Key(key)) if usize::from(key) <= count => {
            let candidate = &poll.candidates()[usize::from(key) - 1];
            Ok((value, Some(candidate.candidate_id)))
        }
        _ => Err(invalid()),
    }
}

/// Stores the answer of one keypad on one poll; a repeated answer replaces
/// the previous one.
pub async fn record_vote(
    storage: &Storage,
    poll: &ResolvedPoll,
    keypad_id: &KeypadId,
    raw_value: &str,
    serial_number: Option<&str>,
) -> Result<VoteRecord, VotingError> {
    let (value, candidate_id) = parse_vote(poll, raw_value).inspect_err(|_| {
        debug!(%keypad_id, poll = %poll.poll_ref(), raw_value, "discarding invalid vote value");
    })?;
    storage
        .upsert_vote(VoteUpsert {
            poll: poll.poll_ref(),
            keypad_id,
            value,
            candidate_id,
            serial_number: serial_number.filter(|sn| !sn.is_empty()),
        })
        .await
        .map_err(internal)
}

/// Detaches every vote of the poll from its keypad. Safe to repeat.
pub async fn anonymize(storage: &Storage, poll: PollRef) -> Result<u64, VotingError> {
    resolve_poll(storage, poll).await?;
    storage.anonymize_votes(poll).await.map_err(internal)
}

pub async fn votes(storage: &Storage, poll: PollRef) -> Result<Vec<VoteRecord>, VotingError> {
    resolve_poll(storage, poll).await?;
    storage.list_votes(poll).await.map_err(internal)
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
