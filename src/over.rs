//! Over and ball arithmetic, plus the end-of-over strike/bowler bookkeeping.
//!
//! Everything here is derived from the legal-ball counter alone. Wides and no-balls never move
//! it, so they never move the displayed ball number either.

use crate::state::{ActiveState, PlayerId};

pub const BALLS_PER_OVER: u32 = 6;

/// Completed overs, i.e. the over number shown as "O" in "O.B".
pub fn display_over(legal_balls: u32) -> u32 {
    legal_balls / BALLS_PER_OVER
}

/// Ball number within the current over: 6 right after an over completes, otherwise
/// `legal_balls % 6`.
pub fn ball_in_over(legal_balls: u32) -> u32 {
    if over_completed(legal_balls) {
        BALLS_PER_OVER
    } else {
        legal_balls % BALLS_PER_OVER
    }
}

pub fn over_completed(legal_balls: u32) -> bool {
    legal_balls > 0 && legal_balls % BALLS_PER_OVER == 0
}

/// "O.B" notation as printed on a scorecard (12 legal balls is "2.0", 13 is "2.1").
pub fn overs_notation(legal_balls: u32) -> String {
    format!(
        "{}.{}",
        legal_balls / BALLS_PER_OVER,
        legal_balls % BALLS_PER_OVER
    )
}

/// Position stamped on a delivery event as (over index, ball in over).
///
/// A legal ball takes the position the counter reaches after it; a non-legal ball is stamped
/// with the position of the next legal ball so it groups with the over it was bowled in.
pub fn event_position(legal_balls_before: u32, is_legal: bool) -> (u32, u32) {
    if is_legal {
        let after = legal_balls_before + 1;
        ((after - 1) / BALLS_PER_OVER, ball_in_over(after))
    } else {
        (
            legal_balls_before / BALLS_PER_OVER,
            legal_balls_before % BALLS_PER_OVER + 1,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverOutcome {
    Continues,
    Completed { bowler: PlayerId },
}

/// Runs after a legal delivery has been counted. On over completion the batters change ends
/// (regardless of any parity swap already applied on the same ball) and the finishing bowler
/// is parked as `last_bowler` until a different bowler is chosen.
pub fn track_over(active: &mut ActiveState, legal_balls: u32, is_legal: bool) -> OverOutcome {
    if !is_legal || !over_completed(legal_balls) {
        return OverOutcome::Continues;
    }
    active.swap_strike();
    let bowler = active.bowler.take();
    active.last_bowler = bowler;
    active.awaiting_bowler = true;
    match bowler {
        Some(bowler) => OverOutcome::Completed { bowler },
        None => OverOutcome::Continues,
    }
}
