use serde::{Deserialize, Serialize};

use crate::domain::{Keypad, KeypadId, Overlay, PollRef, Session, VotingMode, VotingResult};

/// Form fields posted by the vote collector for every keypad event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeypadCallbackForm {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub sn: Option<String>,
    #[serde(default)]
    pub battery: Option<String>,
    #[serde(default)]
    pub votes: Option<String>,
    #[serde(default)]
    pub elapsed: Option<String>,
}

/// Running totals the vote collector reports alongside each vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteProgress {
    pub votes_received: i64,
    pub elapsed_seconds: i64,
}

/// Text answered to the vote collector for a keypad callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    VoteSubmitted,
    VoteRejected,
    VoteInvalid,
    SpeakerAdded,
    SpeakerRemoved,
    InvalidEntry,
    UserUnknown,
    KeypadNotRegistered,
    NoAgendaItem,
    Acknowledged,
}

impl CallbackOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::VoteSubmitted => "Vote submitted",
            Self::VoteRejected => "Vote rejected",
            Self::VoteInvalid => "Vote invalid",
            Self::SpeakerAdded => "Added to list of speakers",
            Self::SpeakerRemoved => "Removed from list of speakers",
            Self::InvalidEntry => "Invalid entry",
            Self::UserUnknown => "User unknown",
            Self::KeypadNotRegistered => "Keypad not registered",
            Self::NoAgendaItem => "No agenda item selected",
            Self::Acknowledged => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub votes: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `MM:SS`
    pub elapsed: String,
    pub elapsed_seconds: i64,
    pub votes_received: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    pub votes: VotingResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusResponse {
    pub device: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizeResponse {
    pub detail: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub mode: VotingMode,
    pub target_id: i64,
    pub is_active: bool,
    pub expected_voter_count: i64,
    pub received_vote_count: i64,
    pub elapsed_seconds: i64,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            mode: session.mode(),
            target_id: session.target_id(),
            is_active: session.is_active,
            expected_voter_count: session.expected_voter_count,
            received_vote_count: session.received_vote_count,
            elapsed_seconds: session.elapsed_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionChanged {
        session: SessionResponse,
    },
    OverlayChanged {
        overlay: Option<Overlay>,
    },
    VoteReceived {
        poll: PollRef,
        keypad_id: KeypadId,
        votes_received: i64,
    },
    KeypadUpdated {
        keypad: Keypad,
    },
    VotesAnonymized {
        poll: PollRef,
    },
}

/// Formats a duration in seconds the way the operator console shows it.
pub fn format_elapsed(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", (seconds / 60) % 60, seconds % 60)
}
