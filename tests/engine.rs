mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use cricket_live::delivery::DeliveryInput;
use cricket_live::engine::ScoringEngine;
use cricket_live::error::{
    ConcurrencyError, PersistenceError, ScoringError, Slot, StateError, ValidationError,
};
use cricket_live::extras::BallType;
use cricket_live::fake_feed::seed_side;
use cricket_live::over::OverOutcome;
use cricket_live::state::{
    DeliveryEvent, DeliveryKey, InningsEnd, MatchId, MatchRecord, MatchStatus, Notification,
    ScoreSnapshot, TeamId, TossDecision, WicketCapPolicy, WicketKind,
};
use cricket_live::store::{
    AppendOutcome, EventStore, MatchStore, MemoryStore, SnapshotStore, Store, StoreResult,
};

use common::{AWAY, HOME, Harness, MATCH, setup};

fn fresh_engine() -> ScoringEngine<MemoryStore> {
    let engine = ScoringEngine::new(MemoryStore::new(), WicketCapPolicy::Roster);
    engine.create_match(setup(2)).unwrap();
    engine.record_toss(MATCH, AWAY, TossDecision::Bowl).unwrap();
    engine
}

fn ready_engine() -> ScoringEngine<MemoryStore> {
    let engine = fresh_engine();
    engine.set_openers(MATCH, 101, 102).unwrap();
    engine.set_bowler(MATCH, 210).unwrap();
    engine
}

fn single(key: DeliveryKey) -> DeliveryInput {
    DeliveryInput::new(key, BallType::Run, 1)
}

#[test]
fn toss_decides_who_bats() {
    let engine = fresh_engine();
    let view = engine.match_view(MATCH).unwrap();
    assert_eq!(view.info.status, MatchStatus::Live);
    // Away won and chose to bowl, so home bats first.
    assert_eq!(view.innings[0].batting_team, HOME);
    assert_eq!(view.innings[0].wicket_cap, 10);
    assert_eq!(view.innings[0].ball_limit, 12);

    let err = engine.record_toss(MATCH, HOME, TossDecision::Bat).unwrap_err();
    assert!(matches!(err, ScoringError::State(StateError::TossAlreadyRecorded)));
}

#[test]
fn match_setup_is_validated() {
    let engine = ScoringEngine::new(MemoryStore::new(), WicketCapPolicy::Fixed);
    let mut bad = setup(0);
    assert!(matches!(
        engine.create_match(bad.clone()).unwrap_err(),
        ScoringError::Validation(ValidationError::InvalidOvers(0))
    ));
    bad.overs_limit = 20;
    bad.away = seed_side(HOME, "Mirror");
    assert!(matches!(
        engine.create_match(bad).unwrap_err(),
        ScoringError::Validation(ValidationError::SameTeams)
    ));

    engine.create_match(setup(20)).unwrap();
    assert!(matches!(
        engine.create_match(setup(20)).unwrap_err(),
        ScoringError::State(StateError::MatchAlreadyExists(MATCH))
    ));
    assert!(matches!(
        engine.record_toss(MATCH, 9, TossDecision::Bat).unwrap_err(),
        ScoringError::Validation(ValidationError::UnknownTeam(9))
    ));
    assert!(matches!(
        engine.match_view(77).unwrap_err(),
        ScoringError::State(StateError::MatchNotFound(77))
    ));
}

#[test]
fn short_roster_lowers_the_wicket_cap() {
    let engine = ScoringEngine::new(MemoryStore::new(), WicketCapPolicy::Roster);
    let mut s = setup(5);
    s.home = s.home.with_roster(vec![101, 102, 103, 104]);
    engine.create_match(s).unwrap();
    let innings = engine.record_toss(MATCH, HOME, TossDecision::Bat).unwrap();
    assert_eq!(innings.wicket_cap, 3);
}

#[test]
fn delivery_needs_all_three_players() {
    let engine = fresh_engine();
    let err = engine.submit_delivery(MATCH, single(1)).unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Validation(ValidationError::MissingPlayers(Slot::Striker))
    ));

    let wicket = DeliveryInput::new(1, BallType::Run, 0).with_wicket(WicketKind::Bowled);
    let err = engine.submit_delivery(MATCH, wicket).unwrap_err();
    assert!(matches!(err, ScoringError::State(StateError::WicketWithoutStriker)));

    engine.set_openers(MATCH, 101, 102).unwrap();
    let err = engine.submit_delivery(MATCH, single(1)).unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Validation(ValidationError::MissingPlayers(Slot::Bowler))
    ));
    assert!(engine.events(MATCH, None).unwrap().is_empty());
}

#[test]
fn openers_are_checked() {
    let engine = fresh_engine();
    assert!(matches!(
        engine.set_openers(MATCH, 101, 101).unwrap_err(),
        ScoringError::Validation(ValidationError::SameBatter(101))
    ));
    assert!(matches!(
        engine.set_openers(MATCH, 101, 205).unwrap_err(),
        ScoringError::Validation(ValidationError::NotInSquad { player: 205, team: HOME })
    ));
    engine.set_openers(MATCH, 101, 102).unwrap();
    assert!(matches!(
        engine.set_openers(MATCH, 103, 104).unwrap_err(),
        ScoringError::State(StateError::NoVacancy)
    ));
}

#[test]
fn rejected_input_changes_nothing() {
    let engine = ready_engine();
    let err = engine
        .submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 7))
        .unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Validation(ValidationError::RunsOutOfRange(7))
    ));
    assert!(!err.is_retryable());
    assert!(engine.events(MATCH, None).unwrap().is_empty());
    assert_eq!(engine.snapshot(MATCH, HOME).unwrap(), None);

    // The same key is still free for the corrected ball.
    let receipt = engine.submit_delivery(MATCH, single(1)).unwrap();
    assert!(!receipt.replayed);
    assert_eq!(receipt.snapshot.runs, 1);
}

#[test]
fn wicket_blocks_until_new_batter() {
    let engine = ready_engine();
    let wicket = DeliveryInput::new(1, BallType::Run, 0).with_wicket(WicketKind::Bowled);
    let receipt = engine.submit_delivery(MATCH, wicket).unwrap();
    assert_eq!(receipt.snapshot.wickets, 1);
    assert_eq!(receipt.snapshot.legal_balls, 1);

    let view = engine.match_view(MATCH).unwrap();
    let active = view.active.unwrap();
    assert_eq!(active.striker, None);
    assert!(active.awaiting_batter);

    let err = engine.submit_delivery(MATCH, single(2)).unwrap_err();
    assert!(matches!(err, ScoringError::State(StateError::AwaitingBatter)));

    assert!(matches!(
        engine.set_new_batter(MATCH, 101).unwrap_err(),
        ScoringError::Validation(ValidationError::AlreadyDismissed(101))
    ));
    assert!(matches!(
        engine.set_new_batter(MATCH, 102).unwrap_err(),
        ScoringError::Validation(ValidationError::AlreadyBatting(102))
    ));
    let active = engine.set_new_batter(MATCH, 103).unwrap();
    assert_eq!(active.striker, Some(103));
    assert!(!active.awaiting_batter);
    assert!(matches!(
        engine.set_new_batter(MATCH, 104).unwrap_err(),
        ScoringError::State(StateError::NoVacancy)
    ));

    engine.submit_delivery(MATCH, single(2)).unwrap();
}

#[test]
fn over_end_requires_a_different_bowler() {
    let engine = ready_engine();
    for key in 1..=5 {
        engine
            .submit_delivery(MATCH, DeliveryInput::new(key, BallType::Run, 0))
            .unwrap();
    }
    let sixth = engine.submit_delivery(MATCH, single(6)).unwrap();
    assert_eq!(
        sixth.over,
        cricket_live::over::OverOutcome::Completed { bowler: 210 }
    );
    // Single on the last ball plus the change of ends: 101 keeps strike.
    let active = engine.match_view(MATCH).unwrap().active.unwrap();
    assert_eq!(active.striker, Some(101));
    assert!(active.awaiting_bowler);

    let err = engine.submit_delivery(MATCH, single(7)).unwrap_err();
    assert!(matches!(err, ScoringError::State(StateError::AwaitingBowler)));
    assert!(matches!(
        engine.set_bowler(MATCH, 210).unwrap_err(),
        ScoringError::Validation(ValidationError::ConsecutiveOvers(210))
    ));
    assert!(matches!(
        engine.set_bowler(MATCH, 105).unwrap_err(),
        ScoringError::Validation(ValidationError::NotInSquad { player: 105, team: AWAY })
    ));
    engine.set_bowler(MATCH, 211).unwrap();
    let r = engine.submit_delivery(MATCH, single(7)).unwrap();
    assert_eq!((r.event.over_no, r.event.ball_in_over), (1, 1));
    assert_eq!(r.event.bowler, 211);
}

#[test]
fn resubmitting_a_key_is_not_reapplied() {
    let engine = ready_engine();
    let first = engine.submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 4)).unwrap();
    let again = engine.submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 4)).unwrap();

    assert!(again.replayed);
    assert_eq!(again.event_id, first.event_id);
    assert_eq!(again.snapshot.runs, 4);
    assert_eq!(engine.events(MATCH, None).unwrap().len(), 1);
    assert_eq!(engine.snapshot(MATCH, HOME).unwrap().unwrap().runs, 4);
}

#[test]
fn failed_append_can_be_retried_with_the_same_key() {
    let engine = ready_engine();
    engine.store().fail_next_appends(1);
    let err = engine.submit_delivery(MATCH, single(1)).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, ScoringError::Persistence(PersistenceError::WriteFailed(_))));
    assert!(engine.events(MATCH, None).unwrap().is_empty());

    let receipt = engine.submit_delivery(MATCH, single(1)).unwrap();
    assert!(!receipt.replayed);
    assert_eq!(receipt.snapshot.runs, 1);
    assert_eq!(engine.events(MATCH, None).unwrap().len(), 1);
}

#[test]
fn interrupted_commit_is_finished_by_the_retry() {
    let engine = ready_engine();
    engine.submit_delivery(MATCH, single(1)).unwrap();

    engine.store().fail_next_saves(1);
    let err = engine
        .submit_delivery(MATCH, DeliveryInput::new(2, BallType::Run, 4))
        .unwrap_err();
    assert!(err.is_retryable());
    // The ball is in the log but the match record has not caught up yet.
    assert_eq!(engine.events(MATCH, None).unwrap().len(), 2);
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].runs, 1);

    let receipt = engine
        .submit_delivery(MATCH, DeliveryInput::new(2, BallType::Run, 4))
        .unwrap();
    assert!(receipt.replayed);
    assert_eq!(receipt.snapshot.runs, 5);
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].runs, 5);

    // A third submission of the same key changes nothing.
    let again = engine
        .submit_delivery(MATCH, DeliveryInput::new(2, BallType::Run, 4))
        .unwrap();
    assert!(again.replayed);
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].runs, 5);
    assert_eq!(engine.events(MATCH, None).unwrap().len(), 2);
}

#[test]
fn next_ball_after_interrupted_commit_catches_up_first() {
    let engine = ready_engine();
    engine.store().fail_next_saves(1);
    assert!(engine.submit_delivery(MATCH, single(1)).is_err());

    let receipt = engine.submit_delivery(MATCH, DeliveryInput::new(2, BallType::Run, 2)).unwrap();
    assert_eq!(receipt.snapshot.runs, 3);
    assert_eq!(receipt.snapshot.legal_balls, 2);
    let view = engine.match_view(MATCH).unwrap();
    assert_eq!(view.innings[0].runs, 3);
    // The single put 102 on strike; the two kept them there.
    assert_eq!(view.active.unwrap().striker, Some(102));
}

#[test]
fn bowler_change_after_interrupted_over_end_keeps_the_logged_bowler() {
    let engine = ready_engine();
    for key in 1..=5 {
        engine
            .submit_delivery(MATCH, DeliveryInput::new(key, BallType::Run, 0))
            .unwrap();
    }
    engine.store().fail_next_saves(1);
    assert!(
        engine
            .submit_delivery(MATCH, DeliveryInput::new(6, BallType::Run, 0))
            .is_err()
    );

    // The sixth ball is committed before the change is applied.
    let active = engine.set_bowler(MATCH, 211).unwrap();
    assert_eq!(active.last_bowler, Some(210));
    assert_eq!(active.bowler, Some(211));
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].legal_balls, 6);

    let retry = engine
        .submit_delivery(MATCH, DeliveryInput::new(6, BallType::Run, 0))
        .unwrap();
    assert!(retry.replayed);
    assert_eq!(retry.over, OverOutcome::Completed { bowler: 210 });
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].legal_balls, 6);

    let err = engine.set_bowler(MATCH, 210).unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Validation(ValidationError::ConsecutiveOvers(210))
    ));
    let next = engine.submit_delivery(MATCH, single(7)).unwrap();
    assert_eq!((next.event.over_no, next.event.bowler), (1, 211));
}

#[test]
fn new_batter_after_interrupted_wicket_fills_the_logged_vacancy() {
    let engine = ready_engine();
    engine.store().fail_next_saves(1);
    let wicket = DeliveryInput::new(1, BallType::Run, 0).with_wicket(WicketKind::Bowled);
    assert!(engine.submit_delivery(MATCH, wicket).is_err());

    let active = engine.set_new_batter(MATCH, 103).unwrap();
    assert_eq!(active.striker, Some(103));
    assert_eq!(active.non_striker, Some(102));

    let retry = engine.submit_delivery(MATCH, wicket).unwrap();
    assert!(retry.replayed);
    let view = engine.match_view(MATCH).unwrap();
    assert_eq!(view.innings[0].wickets, 1);
    assert!(view.innings[0].dismissed.contains(&101));
}

#[test]
fn replaying_an_older_key_reports_the_score_at_that_ball() {
    let engine = ready_engine();
    engine
        .submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 4))
        .unwrap();
    engine
        .submit_delivery(MATCH, DeliveryInput::new(2, BallType::Run, 2))
        .unwrap();

    let again = engine
        .submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 4))
        .unwrap();
    assert!(again.replayed);
    assert_eq!(again.snapshot.runs, 4);
    assert_eq!(again.snapshot.legal_balls, 1);
    assert_eq!(engine.snapshot(MATCH, HOME).unwrap().unwrap().runs, 6);
}

#[test]
fn replaying_an_older_key_while_behind_catches_up_the_newest() {
    let engine = ready_engine();
    engine
        .submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 4))
        .unwrap();
    engine.store().fail_next_saves(1);
    assert!(
        engine
            .submit_delivery(MATCH, DeliveryInput::new(2, BallType::Run, 2))
            .is_err()
    );

    let again = engine
        .submit_delivery(MATCH, DeliveryInput::new(1, BallType::Run, 4))
        .unwrap();
    assert!(again.replayed);
    assert_eq!(again.snapshot.runs, 4);
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].runs, 6);
}

/// Memory store whose next append parks until the test releases it.
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedStore {
    fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Self {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (store, entered_rx, release_tx)
    }
}

impl EventStore for GatedStore {
    fn append(&self, event: &DeliveryEvent) -> StoreResult<AppendOutcome> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.append(event)
    }

    fn find_by_key(
        &self,
        match_id: MatchId,
        key: DeliveryKey,
    ) -> StoreResult<Option<DeliveryEvent>> {
        self.inner.find_by_key(match_id, key)
    }

    fn query(&self, match_id: MatchId, innings_no: Option<u8>) -> StoreResult<Vec<DeliveryEvent>> {
        self.inner.query(match_id, innings_no)
    }

    fn count(&self, match_id: MatchId) -> StoreResult<u64> {
        self.inner.count(match_id)
    }
}

impl SnapshotStore for GatedStore {
    fn upsert(&self, snapshot: &ScoreSnapshot) -> StoreResult<()> {
        self.inner.upsert(snapshot)
    }

    fn read(&self, match_id: MatchId, team_id: TeamId) -> StoreResult<Option<ScoreSnapshot>> {
        self.inner.read(match_id, team_id)
    }

    fn list(&self, match_id: MatchId) -> StoreResult<Vec<ScoreSnapshot>> {
        self.inner.list(match_id)
    }
}

impl MatchStore for GatedStore {
    fn load(&self, match_id: MatchId) -> StoreResult<Option<MatchRecord>> {
        self.inner.load(match_id)
    }

    fn save(&self, record: &MatchRecord) -> StoreResult<()> {
        self.inner.save(record)
    }
}

impl Store for GatedStore {
    fn reset_match(&self, record: &MatchRecord) -> StoreResult<()> {
        self.inner.reset_match(record)
    }
}

#[test]
fn overlapping_writes_are_rejected_not_interleaved() {
    let (store, entered, release) = GatedStore::new();
    let h = Harness::with_store(store, 2);
    h.prepare();
    let engine = Arc::new(h.engine);

    engine.store().armed.store(true, Ordering::SeqCst);
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.submit_delivery(MATCH, single(1)))
    };
    entered.recv().unwrap();

    let err = engine.submit_delivery(MATCH, single(2)).unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Concurrency(ConcurrencyError::DeliveryInFlight(MATCH))
    ));
    assert!(err.is_retryable());
    assert!(matches!(
        engine.reset_match(MATCH).unwrap_err(),
        ScoringError::Concurrency(_)
    ));
    // Reads are not blocked by the writer.
    assert_eq!(engine.match_view(MATCH).unwrap().innings[0].legal_balls, 0);

    release.send(()).unwrap();
    let receipt = writer.join().unwrap().unwrap();
    assert_eq!(receipt.snapshot.legal_balls, 1);

    let next = engine.submit_delivery(MATCH, single(2)).unwrap();
    assert_eq!(next.snapshot.legal_balls, 2);
    assert_eq!(engine.events(MATCH, None).unwrap().len(), 2);
}

#[test]
fn other_matches_are_not_blocked() {
    let (store, entered, release) = GatedStore::new();
    let h = Harness::with_store(store, 2);
    h.prepare();
    let engine = Arc::new(h.engine);
    let mut other = setup(2);
    other.id = 2;
    engine.create_match(other).unwrap();

    engine.store().armed.store(true, Ordering::SeqCst);
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.submit_delivery(MATCH, single(1)))
    };
    entered.recv().unwrap();
    engine.record_toss(2, HOME, TossDecision::Bat).unwrap();
    release.send(()).unwrap();
    writer.join().unwrap().unwrap();
}

#[test]
fn reset_wipes_everything_or_nothing() {
    let mut h = Harness::new(2);
    h.repeat(4, BallType::Run, 2);

    h.engine.store().fail_next_saves(1);
    let err = h.engine.reset_match(MATCH).unwrap_err();
    assert!(matches!(err, ScoringError::Persistence(_)));
    let view = h.engine.match_view(MATCH).unwrap();
    assert_eq!(view.info.status, MatchStatus::Live);
    assert_eq!(view.innings[0].runs, 8);
    assert_eq!(h.engine.events(MATCH, None).unwrap().len(), 4);

    let info = h.engine.reset_match(MATCH).unwrap();
    assert_eq!(info.status, MatchStatus::Scheduled);
    assert_eq!(info.toss, None);
    let view = h.engine.match_view(MATCH).unwrap();
    assert!(view.innings.is_empty());
    assert!(view.active.is_none());
    assert!(view.snapshots.is_empty());
    assert!(h.engine.events(MATCH, None).unwrap().is_empty());

    // Keys are free again after a reset.
    h.engine.record_toss(MATCH, HOME, TossDecision::Bat).unwrap();
    h.next_key = 1;
    let r = h.ball(BallType::Run, 1);
    assert!(!r.replayed);
    assert_eq!(r.snapshot.runs, 1);
}

#[test]
fn subscribers_hear_every_transition() {
    let mut h = Harness::new(1);
    let rx = h.engine.subscribe();

    h.repeat(6, BallType::Run, 0);
    h.ball(BallType::Run, 4);
    h.engine.reset_match(MATCH).unwrap();

    let seen: Vec<Notification> = rx.try_iter().collect();
    let applied = seen
        .iter()
        .filter(|n| matches!(n, Notification::DeliveryApplied { .. }))
        .count();
    assert_eq!(applied, 7);
    assert!(seen.iter().any(|n| matches!(
        n,
        Notification::InningsEnded { innings_no: 1, reason: InningsEnd::OversComplete, .. }
    )));
    assert!(seen.iter().any(|n| matches!(
        n,
        Notification::InningsEnded { innings_no: 2, reason: InningsEnd::TargetReached, .. }
    )));
    assert!(seen.iter().any(|n| matches!(n, Notification::MatchCompleted { .. })));
    assert!(matches!(seen.last(), Some(Notification::MatchReset { match_id: MATCH })));
    assert!(seen.iter().all(|n| n.match_id() == MATCH));
}

#[test]
fn dropped_subscribers_do_not_break_publishing() {
    let mut h = Harness::new(2);
    drop(h.engine.subscribe());
    let rx = h.engine.subscribe();
    h.ball(BallType::Run, 1);
    assert_eq!(rx.try_iter().count(), 1);
}

#[test]
fn player_queries_fold_the_log() {
    let mut h = Harness::new(2);
    h.ball(BallType::Run, 4);
    h.ball(BallType::Wide, 0);
    h.ball(BallType::Run, 6);
    h.ball(BallType::Bye, 1);

    let stats = h
        .engine
        .player_stats(MATCH, 101, 1, cricket_live::aggregate::Role::Batter)
        .unwrap();
    let cricket_live::aggregate::PlayerStats::Batting(bat) = stats else {
        panic!("expected batting stats");
    };
    assert_eq!(bat.runs, 10);
    assert_eq!(bat.balls_faced, 3);
    assert_eq!(bat.fours, 1);
    assert_eq!(bat.sixes, 1);

    let stats = h
        .engine
        .player_stats(MATCH, 210, 1, cricket_live::aggregate::Role::Bowler)
        .unwrap();
    let cricket_live::aggregate::PlayerStats::Bowling(bowl) = stats else {
        panic!("expected bowling stats");
    };
    assert_eq!(bowl.runs_conceded, 11);
    assert_eq!(bowl.legal_balls, 3);
    assert_eq!(bowl.wides, 1);
}

#[test]
fn reconcile_repairs_a_drifted_snapshot() {
    let mut h = Harness::new(2);
    h.repeat(3, BallType::Run, 2);
    assert_eq!(h.engine.reconcile_snapshots(MATCH).unwrap(), 0);

    let mut drifted = h.engine.snapshot(MATCH, HOME).unwrap().unwrap();
    drifted.runs = 99;
    h.engine.store().upsert(&drifted).unwrap();

    assert_eq!(h.engine.reconcile_snapshots(MATCH).unwrap(), 1);
    assert_eq!(h.engine.snapshot(MATCH, HOME).unwrap().unwrap().runs, 6);
}
