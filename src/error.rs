use thiserror::Error;

use crate::state::{MatchId, MatchStatus, PlayerId, TeamId};

pub type ScoringResult<T> = Result<T, ScoringError>;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("rejected in current state: {0}")]
    State(#[from] StateError),
    #[error("concurrent write: {0}")]
    Concurrency(#[from] ConcurrencyError),
    #[error("storage failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl ScoringError {
    /// Validation and state errors mean the caller must re-prompt; the others may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency(_) | Self::Persistence(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("player slot not assigned: {0}")]
    MissingPlayers(Slot),
    #[error("striker and non-striker are both player {0}")]
    SameBatter(PlayerId),
    #[error("player {0} bowled the previous over")]
    ConsecutiveOvers(PlayerId),
    #[error("runs must be between 0 and 6, got {0}")]
    RunsOutOfRange(u8),
    #[error("player {player} is not in the squad of team {team}")]
    NotInSquad { player: PlayerId, team: TeamId },
    #[error("player {0} has already been dismissed this innings")]
    AlreadyDismissed(PlayerId),
    #[error("player {0} is currently batting")]
    AlreadyBatting(PlayerId),
    #[error("team {0} is not part of this match")]
    UnknownTeam(TeamId),
    #[error("overs limit must be between 1 and 50, got {0}")]
    InvalidOvers(u32),
    #[error("a match needs two distinct teams")]
    SameTeams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Striker,
    NonStriker,
    Bowler,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Slot::Striker => "striker",
            Slot::NonStriker => "non-striker",
            Slot::Bowler => "bowler",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    #[error("match {0} already exists")]
    MatchAlreadyExists(MatchId),
    #[error("match is {0:?}, expected it to be live")]
    NotLive(MatchStatus),
    #[error("toss already recorded")]
    TossAlreadyRecorded,
    #[error("innings {0} has already ended")]
    AlreadyEnded(u8),
    #[error("a wicket fell; a new batter must be assigned first")]
    AwaitingBatter,
    #[error("the over is complete; a new bowler must be selected first")]
    AwaitingBowler,
    #[error("wicket declared with no striker assigned")]
    WicketWithoutStriker,
    #[error("both batting positions are already filled")]
    NoVacancy,
    #[error("match {0} is already completed")]
    MatchCompleted(MatchId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    #[error("another delivery for match {0} is being processed")]
    DeliveryInFlight(MatchId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::WriteFailed(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Corrupt(err.to_string())
    }
}

impl From<rusqlite::Error> for ScoringError {
    fn from(err: rusqlite::Error) -> Self {
        ScoringError::Persistence(err.into())
    }
}
