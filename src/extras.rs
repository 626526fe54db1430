use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_RUNS_PER_BALL: u8 = 6;
pub const WIDE_PENALTY: u32 = 1;
pub const NO_BALL_PENALTY: u32 = 1;

/// Outcome declared by the scorer for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallType {
    Run,
    Wide,
    NoBall,
    Bye,
    LegBye,
}

/// Extra classification stored on the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraKind {
    #[default]
    None,
    Wide,
    NoBall,
    Bye,
    LegBye,
}

impl ExtraKind {
    pub fn is_legal(self) -> bool {
        !matches!(self, ExtraKind::Wide | ExtraKind::NoBall)
    }

    /// Extras the bowler is charged for. Byes and leg-byes are not the bowler's fault.
    pub fn charged_to_bowler(self) -> bool {
        matches!(self, ExtraKind::Wide | ExtraKind::NoBall)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtraKind::None => "none",
            ExtraKind::Wide => "wide",
            ExtraKind::NoBall => "no_ball",
            ExtraKind::Bye => "bye",
            ExtraKind::LegBye => "leg_bye",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(ExtraKind::None),
            "wide" => Some(ExtraKind::Wide),
            "no_ball" => Some(ExtraKind::NoBall),
            "bye" => Some(ExtraKind::Bye),
            "leg_bye" => Some(ExtraKind::LegBye),
            _ => None,
        }
    }
}

impl From<BallType> for ExtraKind {
    fn from(ball: BallType) -> Self {
        match ball {
            BallType::Run => ExtraKind::None,
            BallType::Wide => ExtraKind::Wide,
            BallType::NoBall => ExtraKind::NoBall,
            BallType::Bye => ExtraKind::Bye,
            BallType::LegBye => ExtraKind::LegBye,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallEffect {
    pub runs_to_total: u32,
    pub is_legal_ball: bool,
    pub swaps_strike: bool,
    pub batter_runs: u32,
    pub extra_runs: u32,
    pub extra: ExtraKind,
}

/// Maps a declared outcome to its effect on the score, the ball count and the strike.
///
/// A wicket suppresses the parity swap: the striker's slot is vacated instead and the
/// survivor stays where they are.
pub fn classify(ball: BallType, runs: u8, is_wicket: bool) -> Result<BallEffect, ValidationError> {
    if runs > MAX_RUNS_PER_BALL {
        return Err(ValidationError::RunsOutOfRange(runs));
    }
    let runs = u32::from(runs);
    let odd = runs % 2 == 1;

    let (batter_runs, extra_runs, parity_swap) = match ball {
        BallType::Run => (runs, 0, odd),
        BallType::Wide => (0, WIDE_PENALTY + runs, false),
        BallType::NoBall => (runs, NO_BALL_PENALTY, odd),
        BallType::Bye | BallType::LegBye => (0, runs, odd),
    };
    let extra = ExtraKind::from(ball);

    Ok(BallEffect {
        runs_to_total: batter_runs + extra_runs,
        is_legal_ball: extra.is_legal(),
        swaps_strike: parity_swap && !is_wicket,
        batter_runs,
        extra_runs,
        extra,
    })
}
