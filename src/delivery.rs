//! Pure state transition for one ball: classify, count, rotate strike, track the over, and
//! decide whether the innings is over. No I/O happens here; the engine persists the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ScoringResult, Slot, StateError, ValidationError};
use crate::extras::{self, BallType, ExtraKind};
use crate::over::{self, OverOutcome};
use crate::result;
use crate::state::{
    ActiveState, DeliveryEvent, DeliveryKey, Dismissal, Innings, InningsEnd, MatchId, PlayerId,
    WicketKind,
};

/// What the scorer declared for one ball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInput {
    pub key: DeliveryKey,
    pub ball: BallType,
    pub runs: u8,
    pub wicket: Option<WicketKind>,
}

impl DeliveryInput {
    pub fn new(key: DeliveryKey, ball: BallType, runs: u8) -> Self {
        Self {
            key,
            ball,
            runs,
            wicket: None,
        }
    }

    pub fn with_wicket(mut self, kind: WicketKind) -> Self {
        self.wicket = Some(kind);
        self
    }

    /// Recovers what the scorer declared from a recorded event.
    pub fn from_event(event: &DeliveryEvent) -> Self {
        let (ball, runs) = match event.extra {
            ExtraKind::None => (BallType::Run, event.batter_runs),
            ExtraKind::Wide => (
                BallType::Wide,
                event.extra_runs.saturating_sub(extras::WIDE_PENALTY),
            ),
            ExtraKind::NoBall => (BallType::NoBall, event.batter_runs),
            ExtraKind::Bye => (BallType::Bye, event.extra_runs),
            ExtraKind::LegBye => (BallType::LegBye, event.extra_runs),
        };
        Self {
            key: event.key,
            ball,
            runs: u8::try_from(runs).unwrap_or(u8::MAX),
            wicket: event.wicket.map(|w| w.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub innings: Innings,
    pub active: ActiveState,
    pub event: DeliveryEvent,
    pub over: OverOutcome,
    pub innings_end: Option<InningsEnd>,
}

/// Checks everything that must hold before a ball can be bowled. Returns the three players
/// in (striker, non-striker, bowler) order.
pub fn check_ready(
    innings: &Innings,
    active: &ActiveState,
    is_wicket: bool,
) -> ScoringResult<(PlayerId, PlayerId, PlayerId)> {
    if innings.is_ended() {
        return Err(StateError::AlreadyEnded(innings.number).into());
    }
    if active.awaiting_batter {
        return Err(StateError::AwaitingBatter.into());
    }
    if active.awaiting_bowler {
        return Err(StateError::AwaitingBowler.into());
    }
    let Some(striker) = active.striker else {
        if is_wicket {
            return Err(StateError::WicketWithoutStriker.into());
        }
        return Err(ValidationError::MissingPlayers(Slot::Striker).into());
    };
    let non_striker = active
        .non_striker
        .ok_or(ValidationError::MissingPlayers(Slot::NonStriker))?;
    let bowler = active
        .bowler
        .ok_or(ValidationError::MissingPlayers(Slot::Bowler))?;
    if striker == non_striker {
        return Err(ValidationError::SameBatter(striker).into());
    }
    Ok((striker, non_striker, bowler))
}

/// Applies one delivery. On error nothing has changed: the inputs are borrowed, never mutated.
pub fn apply_delivery(
    match_id: MatchId,
    innings: &Innings,
    active: &ActiveState,
    input: DeliveryInput,
    recorded_at: DateTime<Utc>,
) -> ScoringResult<Transition> {
    let is_wicket = input.wicket.is_some();
    let (striker, non_striker, bowler) = check_ready(innings, active, is_wicket)?;
    let effect = extras::classify(input.ball, input.runs, is_wicket)?;

    let (over_no, ball_in_over) = over::event_position(innings.legal_balls, effect.is_legal_ball);

    let mut next = innings.clone();
    let mut next_active = active.clone();

    next.runs += effect.runs_to_total;
    if effect.is_legal_ball {
        next.legal_balls += 1;
    }
    if effect.swaps_strike {
        next_active.swap_strike();
    }

    let wicket = input.wicket.map(|kind| Dismissal {
        kind,
        player: striker,
    });
    if wicket.is_some() {
        next.wickets += 1;
        next.dismissed.push(striker);
        next_active.striker = None;
        next_active.awaiting_batter = true;
    }

    let over_outcome = over::track_over(&mut next_active, next.legal_balls, effect.is_legal_ball);

    let innings_end = result::innings_end(&next);
    if innings_end.is_some() {
        next.ended = innings_end;
        // Nothing is pending once the innings is closed.
        next_active.awaiting_batter = false;
        next_active.awaiting_bowler = false;
    }

    let event = DeliveryEvent {
        match_id,
        key: input.key,
        innings_no: innings.number,
        over_no,
        ball_in_over,
        striker,
        non_striker,
        bowler,
        batter_runs: effect.batter_runs,
        extra_runs: effect.extra_runs,
        extra: effect.extra,
        wicket,
        recorded_at,
    };

    Ok(Transition {
        innings: next,
        active: next_active,
        event,
        over: over_outcome,
        innings_end,
    })
}
