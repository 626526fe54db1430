//! The write side: one engine instance serves many matches, serialising writes per match.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use chrono::Utc;
use log::{debug, info, warn};

use crate::aggregate::{self, PlayerStats, Role, Scorecard};
use crate::delivery::{self, DeliveryInput, Transition};
use crate::error::{
    ConcurrencyError, PersistenceError, ScoringError, ScoringResult, Slot, StateError,
    ValidationError,
};
use crate::over::{self, OverOutcome};
use crate::result;
use crate::state::{
    ActiveState, DeliveryEvent, EventId, Innings, InningsEnd, MAX_OVERS, Match, MatchId,
    MatchRecord, MatchResult, MatchStatus, MatchView, Notification, PlayerId, ScoreSnapshot,
    TeamId, TeamSide, Toss, TossDecision, WicketCapPolicy,
};
use crate::store::{AppendOutcome, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSetup {
    pub id: MatchId,
    pub home: TeamSide,
    pub away: TeamSide,
    pub overs_limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub event_id: EventId,
    pub event: DeliveryEvent,
    pub snapshot: ScoreSnapshot,
    pub over: OverOutcome,
    pub innings_end: Option<InningsEnd>,
    pub result: Option<MatchResult>,
    /// True when the key had already been recorded and nothing new was applied.
    pub replayed: bool,
}

pub struct ScoringEngine<S: Store> {
    store: S,
    policy: WicketCapPolicy,
    locks: Mutex<HashMap<MatchId, Arc<Mutex<()>>>>,
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl<S: Store> ScoringEngine<S> {
    pub fn new(store: S, policy: WicketCapPolicy) -> Self {
        Self {
            store,
            policy,
            locks: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> WicketCapPolicy {
        self.policy
    }

    /// Every notification published after this call is delivered to the returned receiver.
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, notification: Notification) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers are pruned on the next publish.
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    fn match_lock(&self, match_id: MatchId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(match_id).or_default().clone()
    }

    /// Runs `work` while holding the match's write slot. Slots claimed for ids with no match
    /// behind them are dropped again once nobody else holds them.
    fn with_slot<T>(
        &self,
        match_id: MatchId,
        work: impl FnOnce() -> ScoringResult<T>,
    ) -> ScoringResult<T> {
        let lock = self.match_lock(match_id);
        let out = {
            let _guard = Self::claim(&lock, match_id)?;
            work()
        };
        drop(lock);
        if matches!(out, Err(ScoringError::State(StateError::MatchNotFound(_)))) {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Clones are only handed out under this mutex, so a count of one means idle.
            if locks
                .get(&match_id)
                .is_some_and(|slot| Arc::strong_count(slot) == 1)
            {
                locks.remove(&match_id);
            }
        }
        out
    }

    /// Claims the single write slot for a match, or rejects immediately if it is taken.
    fn claim<'a>(lock: &'a Mutex<()>, match_id: MatchId) -> ScoringResult<MutexGuard<'a, ()>> {
        match lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => {
                warn!("match {match_id}: write rejected, another write is in flight");
                Err(ConcurrencyError::DeliveryInFlight(match_id).into())
            }
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn load(&self, match_id: MatchId) -> ScoringResult<MatchRecord> {
        self.store
            .load(match_id)?
            .ok_or_else(|| StateError::MatchNotFound(match_id).into())
    }

    /// Loads the record, first completing any delivery that reached the log but not the record.
    fn load_current(&self, match_id: MatchId) -> ScoringResult<MatchRecord> {
        let record = self.load(match_id)?;
        if self.store.count(match_id)? <= record.applied_events {
            return Ok(record);
        }
        let pending = self
            .store
            .query(match_id, None)?
            .pop()
            .ok_or_else(|| PersistenceError::Corrupt(format!("match {match_id}: empty log")))?;
        self.finish_pending(record, pending)?;
        self.load(match_id)
    }

    /// Runs `edit` against the record under the match's write slot and saves the result.
    fn edit_record<T>(
        &self,
        match_id: MatchId,
        edit: impl FnOnce(&mut MatchRecord) -> ScoringResult<T>,
    ) -> ScoringResult<T> {
        self.with_slot(match_id, || {
            let mut record = self.load_current(match_id)?;
            let out = edit(&mut record)?;
            record.info.updated_at = Utc::now();
            self.store.save(&record)?;
            Ok(out)
        })
    }

    pub fn create_match(&self, setup: MatchSetup) -> ScoringResult<Match> {
        if !(1..=MAX_OVERS).contains(&setup.overs_limit) {
            return Err(ValidationError::InvalidOvers(setup.overs_limit).into());
        }
        if setup.home.id == setup.away.id {
            return Err(ValidationError::SameTeams.into());
        }
        let match_id = setup.id;
        self.with_slot(match_id, || {
            if self.store.load(match_id)?.is_some() {
                return Err(StateError::MatchAlreadyExists(match_id).into());
            }
            let now = Utc::now();
            let info = Match {
                id: match_id,
                home: setup.home,
                away: setup.away,
                overs_limit: setup.overs_limit,
                toss: None,
                status: MatchStatus::Scheduled,
                winner: None,
                result: None,
                created_at: now,
                updated_at: now,
            };
            self.store.save(&MatchRecord::new(info.clone()))?;
            info!(
                "match {}: created, {} v {}, {} overs",
                info.id, info.home.name, info.away.name, info.overs_limit
            );
            Ok(info)
        })
    }

    /// Records the toss and opens the first innings.
    pub fn record_toss(
        &self,
        match_id: MatchId,
        winner: TeamId,
        decision: TossDecision,
    ) -> ScoringResult<Innings> {
        let policy = self.policy;
        self.edit_record(match_id, |record| {
            match record.info.status {
                MatchStatus::Scheduled => {}
                MatchStatus::Live => return Err(StateError::TossAlreadyRecorded.into()),
                MatchStatus::Completed => return Err(StateError::MatchCompleted(match_id).into()),
            }
            let opponent = record
                .info
                .opponent(winner)
                .ok_or(ValidationError::UnknownTeam(winner))?;
            let (batting, bowling) = match decision {
                TossDecision::Bat => (winner, opponent.id),
                TossDecision::Bowl => (opponent.id, winner),
            };
            let batting_side = record
                .info
                .team(batting)
                .ok_or(ValidationError::UnknownTeam(batting))?;
            let innings = Innings::first(
                batting,
                bowling,
                policy.cap_for(batting_side),
                record.info.balls_per_innings(),
            );
            record.info.toss = Some(Toss { winner, decision });
            record.info.status = MatchStatus::Live;
            record.innings = vec![innings.clone()];
            record.active = Some(ActiveState::default());
            info!(
                "match {match_id}: {} won the toss and chose to {decision:?}",
                record.info.team_name(winner)
            );
            Ok(innings)
        })
    }

    /// Sets both batters at the start of an innings.
    pub fn set_openers(
        &self,
        match_id: MatchId,
        striker: PlayerId,
        non_striker: PlayerId,
    ) -> ScoringResult<ActiveState> {
        self.edit_record(match_id, |record| {
            let (innings, active) = live_parts(record, match_id)?;
            if active.striker.is_some() || active.non_striker.is_some() {
                return Err(StateError::NoVacancy.into());
            }
            if striker == non_striker {
                return Err(ValidationError::SameBatter(striker).into());
            }
            let side = batting_side(&record.info, &innings)?;
            for player in [striker, non_striker] {
                check_new_batter(side, &innings, active, player)?;
            }
            let active = live_active_mut(record)?;
            active.striker = Some(striker);
            active.non_striker = Some(non_striker);
            active.awaiting_batter = false;
            debug!("match {match_id}: openers {striker} and {non_striker}");
            Ok(active.clone())
        })
    }

    /// Fills the position vacated by a wicket.
    pub fn set_new_batter(
        &self,
        match_id: MatchId,
        player: PlayerId,
    ) -> ScoringResult<ActiveState> {
        self.edit_record(match_id, |record| {
            let (innings, active) = live_parts(record, match_id)?;
            let side = batting_side(&record.info, &innings)?;
            check_new_batter(side, &innings, active, player)?;
            let active = live_active_mut(record)?;
            match (active.striker, active.non_striker) {
                (None, Some(_)) => active.striker = Some(player),
                (Some(_), None) => active.non_striker = Some(player),
                (None, None) => {
                    return Err(ValidationError::MissingPlayers(Slot::NonStriker).into());
                }
                (Some(_), Some(_)) => return Err(StateError::NoVacancy.into()),
            }
            active.awaiting_batter = false;
            debug!("match {match_id}: new batter {player}");
            Ok(active.clone())
        })
    }

    /// Chooses the bowler for the next over. The bowler of the previous over is refused.
    pub fn set_bowler(&self, match_id: MatchId, bowler: PlayerId) -> ScoringResult<ActiveState> {
        self.edit_record(match_id, |record| {
            let (innings, active) = live_parts(record, match_id)?;
            let side = record
                .info
                .team(innings.bowling_team)
                .ok_or(ValidationError::UnknownTeam(innings.bowling_team))?;
            if !side.has_player(bowler) {
                return Err(ValidationError::NotInSquad {
                    player: bowler,
                    team: side.id,
                }
                .into());
            }
            if active.last_bowler == Some(bowler) {
                return Err(ValidationError::ConsecutiveOvers(bowler).into());
            }
            if active.is_batting(bowler) {
                return Err(ValidationError::AlreadyBatting(bowler).into());
            }
            let active = live_active_mut(record)?;
            active.bowler = Some(bowler);
            active.awaiting_bowler = false;
            debug!("match {match_id}: bowler {bowler}");
            Ok(active.clone())
        })
    }

    /// Processes one ball. At most one call per match runs at a time; an overlapping call is
    /// rejected with a concurrency error and changes nothing.
    pub fn submit_delivery(
        &self,
        match_id: MatchId,
        input: DeliveryInput,
    ) -> ScoringResult<DeliveryReceipt> {
        self.with_slot(match_id, || {
            let record = self.load(match_id)?;
            if let Some(existing) = self.store.find_by_key(match_id, input.key)? {
                return self.resume(record, existing);
            }
            let record = self.load_current(match_id)?;

            let (innings, active) = live_parts(&record, match_id)?;
            let transition =
                delivery::apply_delivery(match_id, &innings, active, input, Utc::now())?;
            let event_id = self.store.append(&transition.event)?.id();
            self.commit(record, transition, event_id)
        })
    }

    /// Handles a key that is already in the log: either the record already reflects it, or
    /// the previous attempt died between append and save and the commit is finished now.
    fn resume(
        &self,
        mut record: MatchRecord,
        existing: DeliveryEvent,
    ) -> ScoringResult<DeliveryReceipt> {
        let match_id = record.info.id;
        if self.store.count(match_id)? > record.applied_events {
            let newest = self.store.query(match_id, None)?.pop();
            if newest.as_ref().map(|e| e.key) == Some(existing.key) {
                let mut receipt = self.finish_pending(record, existing)?;
                receipt.replayed = true;
                return Ok(receipt);
            }
            record = self.load_current(match_id)?;
        }

        warn!(
            "match {match_id}: delivery key {} already recorded, not re-applied",
            existing.key
        );
        let log = self.store.query(match_id, Some(existing.innings_no))?;
        let innings = record
            .innings(existing.innings_no)
            .ok_or_else(|| {
                PersistenceError::Corrupt(format!("innings {} missing", existing.innings_no))
            })?;
        let closed_innings = log.last().map(|e| e.key) == Some(existing.key);
        let innings_end = if closed_innings { innings.ended } else { None };
        let result = match innings_end {
            Some(_) if !innings.first_innings => record.info.result,
            _ => None,
        };
        let over = if existing.is_legal() && existing.ball_in_over == over::BALLS_PER_OVER {
            OverOutcome::Completed {
                bowler: existing.bowler,
            }
        } else {
            OverOutcome::Continues
        };
        // The score as it stood right after this ball, not the latest one.
        let upto = log
            .iter()
            .position(|e| e.key == existing.key)
            .map_or(log.len(), |i| i + 1);
        let snapshot = aggregate::snapshot_from_log(
            match_id,
            innings.batting_team,
            &log[..upto],
            existing.innings_no,
        );
        Ok(DeliveryReceipt {
            event_id: self.event_id_of(&existing)?,
            event: existing,
            snapshot,
            over,
            innings_end,
            result,
            replayed: true,
        })
    }

    /// Re-derives the transition for the newest logged delivery and commits it.
    fn finish_pending(
        &self,
        record: MatchRecord,
        pending: DeliveryEvent,
    ) -> ScoringResult<DeliveryReceipt> {
        let match_id = record.info.id;
        let newest = self.store.query(match_id, None)?.last().map(|e| e.key);
        if newest != Some(pending.key) {
            return Err(PersistenceError::Corrupt(format!(
                "match {match_id}: record lags the log but key {} is not the newest delivery",
                pending.key
            ))
            .into());
        }
        info!(
            "match {match_id}: completing interrupted commit of key {}",
            pending.key
        );
        let (innings, active) = live_parts(&record, match_id)?;
        // The players on the logged ball are authoritative over the record's lineup.
        let before = ActiveState {
            striker: Some(pending.striker),
            non_striker: Some(pending.non_striker),
            bowler: Some(pending.bowler),
            last_bowler: active.last_bowler,
            awaiting_batter: false,
            awaiting_bowler: false,
        };
        let mut transition = delivery::apply_delivery(
            match_id,
            &innings,
            &before,
            DeliveryInput::from_event(&pending),
            pending.recorded_at,
        )?;
        transition.event = pending;
        let event_id = self.event_id_of(&transition.event)?;
        self.commit(record, transition, event_id)
    }

    fn event_id_of(&self, event: &DeliveryEvent) -> ScoringResult<EventId> {
        // Appending a key that exists is a no-op that reports the stored id.
        match self.store.append(event)? {
            AppendOutcome::Duplicate(id) | AppendOutcome::Appended(id) => Ok(id),
        }
    }

    fn commit(
        &self,
        mut record: MatchRecord,
        transition: Transition,
        event_id: EventId,
    ) -> ScoringResult<DeliveryReceipt> {
        let match_id = record.info.id;
        let Transition {
            innings,
            active,
            event,
            over,
            innings_end,
        } = transition;

        let snapshot = ScoreSnapshot::of_innings(match_id, &innings);
        let mut match_result = None;

        if let Some(slot) = record.current_innings_mut() {
            *slot = innings.clone();
        }
        record.active = Some(active);
        record.applied_events += 1;
        record.info.updated_at = Utc::now();

        if innings_end.is_some() {
            if innings.first_innings {
                let chasing = record
                    .info
                    .team(innings.bowling_team)
                    .ok_or(ValidationError::UnknownTeam(innings.bowling_team))?;
                let second = Innings::second(&innings, self.policy.cap_for(chasing));
                info!(
                    "match {match_id}: innings 1 closed at {}, target {}",
                    snapshot.display(),
                    second.target.unwrap_or_default()
                );
                record.innings.push(second);
                record.active = Some(ActiveState::default());
            } else {
                match_result = result::match_result(&innings);
                record.info.status = MatchStatus::Completed;
                record.info.result = match_result;
                record.info.winner = match_result.and_then(|r| r.winner());
                record.active = None;
                info!("match {match_id}: completed, {match_result:?}");
            }
        }

        self.store.upsert(&snapshot)?;
        self.store.save(&record)?;

        debug!(
            "match {match_id}: {} -> {}",
            crate::state::describe_ball(&event),
            snapshot.display()
        );

        self.publish(Notification::DeliveryApplied {
            match_id,
            event: event.clone(),
            snapshot: snapshot.clone(),
        });
        if let Some(reason) = innings_end {
            self.publish(Notification::InningsEnded {
                match_id,
                innings_no: innings.number,
                reason,
                snapshot: snapshot.clone(),
            });
        }
        if let Some(result) = match_result {
            self.publish(Notification::MatchCompleted { match_id, result });
        }

        Ok(DeliveryReceipt {
            event_id,
            event,
            snapshot,
            over,
            innings_end,
            result: match_result,
            replayed: false,
        })
    }

    /// Wipes events, snapshots and active state and returns the match to Scheduled. Either
    /// everything is wiped or nothing is.
    pub fn reset_match(&self, match_id: MatchId) -> ScoringResult<Match> {
        self.with_slot(match_id, || {
            let record = self.load(match_id)?;

            let mut info = record.info;
            info.toss = None;
            info.status = MatchStatus::Scheduled;
            info.winner = None;
            info.result = None;
            info.updated_at = Utc::now();
            let fresh = MatchRecord::new(info.clone());

            if let Err(err) = self.store.reset_match(&fresh) {
                warn!("match {match_id}: reset failed, match left unchanged: {err}");
                return Err(err.into());
            }
            info!("match {match_id}: reset to scheduled");
            self.publish(Notification::MatchReset { match_id });
            Ok(info)
        })
    }

    pub fn match_view(&self, match_id: MatchId) -> ScoringResult<MatchView> {
        let record = self.load(match_id)?;
        let snapshots = self.store.list(match_id)?;
        Ok(MatchView {
            info: record.info,
            innings: record.innings,
            active: record.active,
            snapshots,
        })
    }

    pub fn events(
        &self,
        match_id: MatchId,
        innings_no: Option<u8>,
    ) -> ScoringResult<Vec<DeliveryEvent>> {
        Ok(self.store.query(match_id, innings_no)?)
    }

    pub fn snapshot(
        &self,
        match_id: MatchId,
        team_id: TeamId,
    ) -> ScoringResult<Option<ScoreSnapshot>> {
        Ok(self.store.read(match_id, team_id)?)
    }

    pub fn player_stats(
        &self,
        match_id: MatchId,
        player: PlayerId,
        innings_no: u8,
        role: Role,
    ) -> ScoringResult<PlayerStats> {
        let events = self.store.query(match_id, Some(innings_no))?;
        Ok(aggregate::player_stats(&events, player, innings_no, role))
    }

    pub fn scorecard(&self, match_id: MatchId, innings_no: u8) -> ScoringResult<Scorecard> {
        let events = self.store.query(match_id, Some(innings_no))?;
        Ok(aggregate::scorecard(&events, innings_no))
    }

    /// Recomputes every snapshot of the match from its log and rewrites any that drifted.
    /// Returns how many were rewritten.
    pub fn reconcile_snapshots(&self, match_id: MatchId) -> ScoringResult<usize> {
        self.with_slot(match_id, || {
            let record = self.load_current(match_id)?;
            let log = self.store.query(match_id, None)?;
            let mut rewritten = 0;
            for innings in &record.innings {
                let folded = aggregate::snapshot_from_log(
                    match_id,
                    innings.batting_team,
                    &log,
                    innings.number,
                );
                if self.store.read(match_id, innings.batting_team)?.as_ref() != Some(&folded) {
                    self.store.upsert(&folded)?;
                    rewritten += 1;
                }
            }
            if rewritten > 0 {
                warn!("match {match_id}: rewrote {rewritten} drifted snapshot(s)");
            }
            Ok(rewritten)
        })
    }
}

fn live_parts(record: &MatchRecord, match_id: MatchId) -> ScoringResult<(Innings, &ActiveState)> {
    match record.info.status {
        MatchStatus::Live => {}
        MatchStatus::Completed => return Err(StateError::MatchCompleted(match_id).into()),
        status => return Err(StateError::NotLive(status).into()),
    }
    let innings = record
        .current_innings()
        .cloned()
        .ok_or(StateError::NotLive(record.info.status))?;
    let active = record
        .active
        .as_ref()
        .ok_or(StateError::AlreadyEnded(innings.number))?;
    Ok((innings, active))
}

fn live_active_mut(record: &mut MatchRecord) -> ScoringResult<&mut ActiveState> {
    let status = record.info.status;
    record
        .active
        .as_mut()
        .ok_or_else(|| StateError::NotLive(status).into())
}

fn batting_side<'a>(info: &'a Match, innings: &Innings) -> ScoringResult<&'a TeamSide> {
    info.team(innings.batting_team)
        .ok_or_else(|| ValidationError::UnknownTeam(innings.batting_team).into())
}

fn check_new_batter(
    side: &TeamSide,
    innings: &Innings,
    active: &ActiveState,
    player: PlayerId,
) -> ScoringResult<()> {
    if !side.has_player(player) {
        return Err(ValidationError::NotInSquad {
            player,
            team: side.id,
        }
        .into());
    }
    if innings.dismissed.contains(&player) {
        return Err(ValidationError::AlreadyDismissed(player).into());
    }
    if active.is_batting(player) {
        return Err(ValidationError::AlreadyBatting(player).into());
    }
    Ok(())
}
