use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(MotionPollId);
id_newtype!(ElectionPollId);
id_newtype!(CandidateId);
id_newtype!(AgendaItemId);
id_newtype!(SpeakerId);
id_newtype!(VoteRecordId);

/// Hardware identifier printed on a keypad and reported by the vote collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeypadId(pub String);

impl KeypadId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeypadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const UNKNOWN_BATTERY_LEVEL: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    #[default]
    None,
    MotionVote,
    ElectionVote,
    SpeakerList,
    ConnectivityTest,
}

impl VotingMode {
    pub fn is_vote(self) -> bool {
        matches!(self, Self::MotionVote | Self::ElectionVote)
    }
}

/// What a voting session collects for. Each mode carries the entity it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "id", rename_all = "snake_case")]
pub enum VotingTarget {
    MotionVote(MotionPollId),
    ElectionVote(ElectionPollId),
    SpeakerList(AgendaItemId),
    ConnectivityTest,
}

impl VotingTarget {
    pub fn mode(&self) -> VotingMode {
        match self {
            Self::MotionVote(_) => VotingMode::MotionVote,
            Self::ElectionVote(_) => VotingMode::ElectionVote,
            Self::SpeakerList(_) => VotingMode::SpeakerList,
            Self::ConnectivityTest => VotingMode::ConnectivityTest,
        }
    }

    /// Numeric id of the targeted entity, `0` when the mode has none.
    pub fn target_id(&self) -> i64 {
        match self {
            Self::MotionVote(id) => id.0,
            Self::ElectionVote(id) => id.0,
            Self::SpeakerList(id) => id.0,
            Self::ConnectivityTest => 0,
        }
    }

    pub fn poll(&self) -> Option<PollRef> {
        match self {
            Self::MotionVote(id) => Some(PollRef::Motion(*id)),
            Self::ElectionVote(id) => Some(PollRef::Election(*id)),
            Self::SpeakerList(_) | Self::ConnectivityTest => None,
        }
    }
}

impl From<PollRef> for VotingTarget {
    fn from(value: PollRef) -> Self {
        match value {
            PollRef::Motion(id) => Self::MotionVote(id),
            PollRef::Election(id) => Self::ElectionVote(id),
        }
    }
}

/// A poll that collects vote records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PollRef {
    Motion(MotionPollId),
    Election(ElectionPollId),
}

impl PollRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Motion(_) => "motion",
            Self::Election(_) => "election",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Motion(id) => id.0,
            Self::Election(id) => id.0,
        }
    }
}

impl fmt::Display for PollRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionMethod {
    YesNoAbstain,
    YesNo,
    Votes,
}

impl ElectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::YesNoAbstain => "yes_no_abstain",
            Self::YesNo => "yes_no",
            Self::Votes => "votes",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yes_no_abstain" => Some(Self::YesNoAbstain),
            "yes_no" => Some(Self::YesNo),
            "votes" => Some(Self::Votes),
            _ => None,
        }
    }
}

/// Which keypad buttons a poll accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAxis {
    YesNoAbstain,
    Candidates { count: usize },
}

/// A stored keypad answer: one of the yes/no/abstain buttons or a digit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum VoteValue {
    Yes,
    No,
    Abstain,
    Key(u8),
}

impl VoteValue {
    pub fn as_string(&self) -> String {
        match self {
            Self::Yes => "Y".into(),
            Self::No => "N".into(),
            Self::Abstain => "A".into(),
            Self::Key(key) => key.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Y" => Some(Self::Yes),
            "N" => Some(Self::No),
            "A" => Some(Self::Abstain),
            key => {
                let mut chars = key.chars();
                match (chars.next().and_then(|c| c.to_digit(10)), chars.next()) {
                    (Some(digit), None) => u8::try_from(digit).ok().map(Self::Key),
                    _ => None,
                }
            }
        }
    }
}

impl From<VoteValue> for String {
    fn from(value: VoteValue) -> Self {
        value.as_string()
    }
}

impl TryFrom<String> for VoteValue {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unsupported vote value '{value}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypad {
    pub keypad_id: KeypadId,
    pub user_id: Option<UserId>,
    pub seat_number: Option<String>,
    pub in_range: bool,
    pub battery_level: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionPoll {
    pub poll_id: MotionPollId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionPoll {
    pub poll_id: ElectionPollId,
    pub title: String,
    pub method: ElectionMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub poll_id: ElectionPollId,
    pub user_id: Option<UserId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub item_id: AgendaItemId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub speaker_id: SpeakerId,
    pub item_id: AgendaItemId,
    pub user_id: UserId,
    pub weight: i64,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub record_id: VoteRecordId,
    pub poll: PollRef,
    pub keypad_id: Option<KeypadId>,
    pub value: VoteValue,
    pub candidate_id: Option<CandidateId>,
    pub serial_number: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The singleton record of the current or most recent collection activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub target: Option<VotingTarget>,
    pub is_active: bool,
    pub expected_voter_count: i64,
    pub received_vote_count: i64,
    pub elapsed_seconds: i64,
    /// Bumped by every start; tells apart two runs on the same target.
    #[serde(default)]
    pub run: u64,
}

impl Session {
    pub fn mode(&self) -> VotingMode {
        match (self.is_active, self.target) {
            (true, Some(target)) => target.mode(),
            _ => VotingMode::None,
        }
    }

    pub fn target_id(&self) -> i64 {
        self.target.map(|target| target.target_id()).unwrap_or(0)
    }

    /// The target of the session while it is collecting.
    pub fn active_target(&self) -> Option<VotingTarget> {
        self.target.filter(|_| self.is_active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCount {
    pub candidate_id: CandidateId,
    pub votes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElectionTally {
    pub candidates: Vec<CandidateCount>,
    pub valid: i64,
    pub invalid: i64,
}

impl ElectionTally {
    pub fn votes_for(&self, candidate_id: CandidateId) -> Option<i64> {
        self.candidates
            .iter()
            .find(|count| count.candidate_id == candidate_id)
            .map(|count| count.votes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VotingResult {
    YesNoAbstain { yes: i64, no: i64, abstain: i64 },
    Candidates(ElectionTally),
}

/// What the presentation layer should show while a session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Overlay {
    VotingPrompt {
        axis: PromptAxis,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        choices: Vec<PromptChoice>,
    },
    VotingIcon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptAxis {
    YesNoAbstain,
    Candidates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptChoice {
    pub key: u8,
    pub label: String,
}
