#![allow(dead_code)]

use cricket_live::delivery::DeliveryInput;
use cricket_live::engine::{DeliveryReceipt, MatchSetup, ScoringEngine};
use cricket_live::error::ScoringResult;
use cricket_live::extras::BallType;
use cricket_live::fake_feed::seed_side;
use cricket_live::state::{
    DeliveryKey, MatchId, MatchStatus, TossDecision, WicketCapPolicy, WicketKind,
};
use cricket_live::store::{MemoryStore, Store};

pub const MATCH: MatchId = 1;
pub const HOME: u32 = 1;
pub const AWAY: u32 = 2;

pub fn setup(overs: u32) -> MatchSetup {
    MatchSetup {
        id: MATCH,
        home: seed_side(HOME, "Home XI"),
        away: seed_side(AWAY, "Away XI"),
        overs_limit: overs,
    }
}

/// Drives one match through the engine, filling batter and bowler vacancies the way a scorer
/// would: next name on the team sheet, and the two opening bowlers taking alternate overs.
pub struct Harness<S: Store = MemoryStore> {
    pub engine: ScoringEngine<S>,
    pub next_key: DeliveryKey,
}

impl Harness<MemoryStore> {
    /// Home bats first; openers and first bowler are not yet set.
    pub fn new(overs: u32) -> Self {
        Self::with_store(MemoryStore::new(), overs)
    }
}

impl<S: Store> Harness<S> {
    pub fn with_store(store: S, overs: u32) -> Self {
        let engine = ScoringEngine::new(store, WicketCapPolicy::Roster);
        engine.create_match(setup(overs)).unwrap();
        engine.record_toss(MATCH, HOME, TossDecision::Bat).unwrap();
        Self { engine, next_key: 1 }
    }

    /// Fills whatever the engine is waiting on before the next ball.
    pub fn prepare(&self) {
        let view = self.engine.match_view(MATCH).unwrap();
        if view.info.status != MatchStatus::Live {
            return;
        }
        let innings = view.current_innings().unwrap().clone();
        let active = view.active.clone().unwrap();
        let roster = view.info.team(innings.batting_team).unwrap().roster.clone();
        let mut available = roster
            .iter()
            .copied()
            .filter(|p| !innings.dismissed.contains(p) && !active.is_batting(*p));

        if active.striker.is_none() && active.non_striker.is_none() {
            let a = available.next().unwrap();
            let b = available.next().unwrap();
            self.engine.set_openers(MATCH, a, b).unwrap();
        } else if active.awaiting_batter {
            let next = available.next().unwrap();
            self.engine.set_new_batter(MATCH, next).unwrap();
        }
        if active.awaiting_bowler || active.bowler.is_none() {
            let base = innings.bowling_team * 100;
            let bowler = if active.last_bowler == Some(base + 10) {
                base + 11
            } else {
                base + 10
            };
            self.engine.set_bowler(MATCH, bowler).unwrap();
        }
    }

    pub fn submit(
        &mut self,
        ball: BallType,
        runs: u8,
        wicket: Option<WicketKind>,
    ) -> ScoringResult<DeliveryReceipt> {
        self.prepare();
        let mut input = DeliveryInput::new(self.next_key, ball, runs);
        if let Some(kind) = wicket {
            input = input.with_wicket(kind);
        }
        let receipt = self.engine.submit_delivery(MATCH, input)?;
        self.next_key += 1;
        Ok(receipt)
    }

    pub fn ball(&mut self, ball: BallType, runs: u8) -> DeliveryReceipt {
        self.submit(ball, runs, None).unwrap()
    }

    pub fn wicket(&mut self, kind: WicketKind) -> DeliveryReceipt {
        self.submit(BallType::Run, 0, Some(kind)).unwrap()
    }

    pub fn repeat(&mut self, n: usize, ball: BallType, runs: u8) -> DeliveryReceipt {
        let mut last = None;
        for _ in 0..n {
            last = Some(self.ball(ball, runs));
        }
        last.unwrap()
    }

    /// First innings: 24 sixes and 5 singles, then dots to the end of 20 overs. Target 150.
    pub fn post_149_in_twenty(&mut self) -> DeliveryReceipt {
        self.repeat(24, BallType::Run, 6);
        self.repeat(5, BallType::Run, 1);
        self.repeat(91, BallType::Run, 0)
    }
}
