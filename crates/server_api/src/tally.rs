use shared::{
    domain::{Candidate, CandidateCount, ElectionPollId, ElectionTally, PollRef, VoteRecord},
    error::VotingError,
};
use storage::Storage;

use crate::internal;

/// Counts candidate votes of an election. Records that name no candidate of
/// the election are invalid, so `valid + invalid == records.len()`.
pub fn tally(candidates: &[Candidate], records: &[VoteRecord]) -> ElectionTally {
    let mut counts: Vec<CandidateCount> = candidates
        .iter()
        .map(|candidate| CandidateCount {
            candidate_id: candidate.candidate_id,
            votes: 0,
        })
        .collect();
    let mut invalid = 0;

    for record in records {
        let slot = record.candidate_id.and_then(|candidate_id| {
            counts
                .iter_mut()
                .find(|count| count.candidate_id == candidate_id)
        });
        match slot {
            Some(count) => count.votes += 1,
            None => invalid += 1,
        }
    }

    let valid = counts.iter().map(|count| count.votes).sum();
    ElectionTally {
        candidates: counts,
        valid,
        invalid,
    }
}

pub async fn tally_poll(
    storage: &Storage,
    poll_id: ElectionPollId,
) -> Result<ElectionTally, VotingError> {
    let candidates = storage.list_candidates(poll_id).await.map_err(internal)?;
    let records = storage
        .list_votes(PollRef::Election(poll_id))
        .await
        .map_err(internal)?;
    Ok(tally(&candidates, &records))
}

#[cfg(test)]
#[path = "tests/tally_tests.rs"]
mod tests;
