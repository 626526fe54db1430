//! A simulated scorer: drives the engine ball by ball the way a scorer at the ground would,
//! with randomised outcomes. Used by the default binary and the integration tests.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::delivery::DeliveryInput;
use crate::engine::{DeliveryReceipt, MatchSetup, ScoringEngine};
use crate::error::{ScoringError, ScoringResult, StateError};
use crate::extras::BallType;
use crate::state::{
    ActiveState, DeliveryKey, Innings, MatchId, MatchResult, MatchStatus, PlayerId, TeamId,
    TeamSide, TossDecision, WicketKind,
};
use crate::store::Store;

const SQUAD_SIZE: u32 = 11;
/// The last five names on each team sheet take turns with the ball.
const BOWLERS_PER_SIDE: usize = 5;
const SUBMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimSettings {
    pub seed: Option<u64>,
    pub delay: Duration,
}

/// Eleven players numbered `team_id * 100 + 1 ..= team_id * 100 + 11`, in batting order.
pub fn seed_side(id: TeamId, name: &str) -> TeamSide {
    let base = id * 100;
    TeamSide::new(id, name).with_roster((1..=SQUAD_SIZE).map(|n| base + n).collect())
}

pub fn spawn_simulated_match<S: Store + 'static>(
    engine: Arc<ScoringEngine<S>>,
    setup: MatchSetup,
    settings: SimSettings,
) -> JoinHandle<ScoringResult<Option<MatchResult>>> {
    thread::spawn(move || {
        let match_id = setup.id;
        engine.create_match(setup)?;
        SimScorer::new(settings).play(&engine, match_id)
    })
}

pub struct SimScorer {
    rng: StdRng,
    next_key: DeliveryKey,
    delay: Duration,
}

impl SimScorer {
    pub fn new(settings: SimSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            next_key: 1,
            delay: settings.delay,
        }
    }

    /// Tosses, then bowls until the match completes. Expects a freshly created match.
    pub fn play<S: Store>(
        &mut self,
        engine: &ScoringEngine<S>,
        match_id: MatchId,
    ) -> ScoringResult<Option<MatchResult>> {
        let view = engine.match_view(match_id)?;
        let winner = if self.rng.gen_bool(0.5) {
            view.info.home.id
        } else {
            view.info.away.id
        };
        let decision = if self.rng.gen_bool(0.5) {
            TossDecision::Bat
        } else {
            TossDecision::Bowl
        };
        engine.record_toss(match_id, winner, decision)?;

        loop {
            let view = engine.match_view(match_id)?;
            if view.info.status == MatchStatus::Completed {
                return Ok(view.info.result);
            }
            let (Some(innings), Some(active)) = (view.current_innings(), view.active.as_ref())
            else {
                return Err(StateError::NotLive(view.info.status).into());
            };
            let batting = view
                .info
                .team(innings.batting_team)
                .map(|t| t.roster.clone())
                .unwrap_or_default();
            let bowling = view
                .info
                .team(innings.bowling_team)
                .map(|t| t.roster.clone())
                .unwrap_or_default();

            if active.striker.is_none() && active.non_striker.is_none() {
                let mut openers = next_batters(&batting, innings, active);
                let (Some(a), Some(b)) = (openers.next(), openers.next()) else {
                    return Err(StateError::NoVacancy.into());
                };
                engine.set_openers(match_id, a, b)?;
                continue;
            }
            if active.awaiting_batter {
                let Some(next) = next_batters(&batting, innings, active).next() else {
                    return Err(StateError::NoVacancy.into());
                };
                engine.set_new_batter(match_id, next)?;
                continue;
            }
            if active.awaiting_bowler || active.bowler.is_none() {
                let bowler = self.pick_bowler(&bowling, active.last_bowler);
                engine.set_bowler(match_id, bowler)?;
                continue;
            }

            let input = self.random_delivery();
            self.submit(engine, match_id, input)?;
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
    }

    fn submit<S: Store>(
        &mut self,
        engine: &ScoringEngine<S>,
        match_id: MatchId,
        input: DeliveryInput,
    ) -> ScoringResult<DeliveryReceipt> {
        let mut last_err: Option<ScoringError> = None;
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match engine.submit_delivery(match_id, input) {
                Ok(receipt) => {
                    self.next_key += 1;
                    return Ok(receipt);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        "match {match_id}: attempt {attempt} for key {} failed: {err}",
                        input.key
                    );
                    thread::sleep(Duration::from_millis(20 * attempt as u64));
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Err(StateError::MatchNotFound(match_id).into()),
        }
    }

    fn pick_bowler(&mut self, roster: &[PlayerId], last: Option<PlayerId>) -> PlayerId {
        let start = roster.len().saturating_sub(BOWLERS_PER_SIDE);
        let pool: Vec<PlayerId> = roster[start..]
            .iter()
            .copied()
            .filter(|p| Some(*p) != last)
            .collect();
        if pool.is_empty() {
            // A one-player attack would be refused by the engine anyway.
            return roster.first().copied().unwrap_or_default();
        }
        pool[self.rng.gen_range(0..pool.len())]
    }

    /// Draws one ball from rough T20 frequencies.
    pub fn random_delivery(&mut self) -> DeliveryInput {
        let key = self.next_key;
        let roll: f64 = self.rng.r#gen();
        let (ball, runs) = if roll < 0.04 {
            (BallType::Wide, u8::from(self.rng.gen_bool(0.1)))
        } else if roll < 0.055 {
            (BallType::NoBall, self.batter_runs())
        } else if roll < 0.065 {
            (BallType::Bye, self.rng.gen_range(1..=2))
        } else if roll < 0.085 {
            (BallType::LegBye, self.rng.gen_range(1..=2))
        } else {
            (BallType::Run, self.batter_runs())
        };
        let mut input = DeliveryInput::new(key, ball, runs);
        if self.rng.gen_bool(0.045) {
            let kind = match ball {
                BallType::Wide => WicketKind::Stumped,
                BallType::NoBall | BallType::Bye | BallType::LegBye => WicketKind::RunOut,
                BallType::Run => match self.rng.gen_range(0..10) {
                    0..=2 => WicketKind::Bowled,
                    3..=6 => WicketKind::Caught,
                    7 => WicketKind::Lbw,
                    8 => WicketKind::RunOut,
                    _ => WicketKind::Stumped,
                },
            };
            input = input.with_wicket(kind);
        }
        debug!("sim ball {key}: {ball:?} {runs}");
        input
    }

    fn batter_runs(&mut self) -> u8 {
        match self.rng.gen_range(0..100) {
            0..=34 => 0,
            35..=69 => 1,
            70..=79 => 2,
            80..=81 => 3,
            82..=93 => 4,
            _ => 6,
        }
    }
}

fn next_batters<'a>(
    roster: &'a [PlayerId],
    innings: &'a Innings,
    active: &'a ActiveState,
) -> impl Iterator<Item = PlayerId> + 'a {
    roster
        .iter()
        .copied()
        .filter(move |p| !innings.dismissed.contains(p) && !active.is_batting(*p))
}
