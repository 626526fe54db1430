//! Storage seams the engine depends on, plus an in-process implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::PersistenceError;
use crate::state::{
    DeliveryEvent, DeliveryKey, EventId, MatchId, MatchRecord, ScoreSnapshot, TeamId,
};

pub type StoreResult<T> = Result<T, PersistenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(EventId),
    /// The key was already in the log; nothing was written.
    Duplicate(EventId),
}

impl AppendOutcome {
    pub fn id(self) -> EventId {
        match self {
            AppendOutcome::Appended(id) | AppendOutcome::Duplicate(id) => id,
        }
    }
}

/// Append-only delivery log, ordered by creation.
pub trait EventStore: Send + Sync {
    /// Idempotent on `(match_id, key)`.
    fn append(&self, event: &DeliveryEvent) -> StoreResult<AppendOutcome>;
    fn find_by_key(
        &self,
        match_id: MatchId,
        key: DeliveryKey,
    ) -> StoreResult<Option<DeliveryEvent>>;
    fn query(&self, match_id: MatchId, innings_no: Option<u8>) -> StoreResult<Vec<DeliveryEvent>>;
    fn count(&self, match_id: MatchId) -> StoreResult<u64>;
}

pub trait SnapshotStore: Send + Sync {
    fn upsert(&self, snapshot: &ScoreSnapshot) -> StoreResult<()>;
    fn read(&self, match_id: MatchId, team_id: TeamId) -> StoreResult<Option<ScoreSnapshot>>;
    fn list(&self, match_id: MatchId) -> StoreResult<Vec<ScoreSnapshot>>;
}

pub trait MatchStore: Send + Sync {
    fn load(&self, match_id: MatchId) -> StoreResult<Option<MatchRecord>>;
    fn save(&self, record: &MatchRecord) -> StoreResult<()>;
}

pub trait Store: EventStore + SnapshotStore + MatchStore {
    /// Deletes the match's events and snapshots and writes `record` in their place, all or
    /// nothing.
    fn reset_match(&self, record: &MatchRecord) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: EventId,
    events: HashMap<MatchId, Vec<(EventId, DeliveryEvent)>>,
    snapshots: HashMap<(MatchId, TeamId), ScoreSnapshot>,
    matches: HashMap<MatchId, MatchRecord>,
}

/// Everything behind one `RwLock`, so a reset swaps all three tables at once.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    failing_appends: AtomicUsize,
    failing_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` appends fail after writing nothing.
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` match-record saves fail after writing nothing.
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read_inner(&self) -> StoreResult<RwLockReadGuard<'_, MemoryInner>> {
        self.inner
            .read()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write_inner(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryInner>> {
        self.inner
            .write()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl EventStore for MemoryStore {
    fn append(&self, event: &DeliveryEvent) -> StoreResult<AppendOutcome> {
        if Self::take_failure(&self.failing_appends) {
            return Err(PersistenceError::WriteFailed("injected append failure".to_string()));
        }
        let mut inner = self.write_inner()?;
        if let Some((id, _)) = inner
            .events
            .get(&event.match_id)
            .and_then(|log| log.iter().find(|(_, e)| e.key == event.key))
        {
            return Ok(AppendOutcome::Duplicate(*id));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .events
            .entry(event.match_id)
            .or_default()
            .push((id, event.clone()));
        Ok(AppendOutcome::Appended(id))
    }

    fn find_by_key(
        &self,
        match_id: MatchId,
        key: DeliveryKey,
    ) -> StoreResult<Option<DeliveryEvent>> {
        let inner = self.read_inner()?;
        Ok(inner
            .events
            .get(&match_id)
            .and_then(|log| log.iter().find(|(_, e)| e.key == key))
            .map(|(_, e)| e.clone()))
    }

    fn query(&self, match_id: MatchId, innings_no: Option<u8>) -> StoreResult<Vec<DeliveryEvent>> {
        let inner = self.read_inner()?;
        let Some(log) = inner.events.get(&match_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .filter(|(_, e)| innings_no.is_none_or(|n| e.innings_no == n))
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn count(&self, match_id: MatchId) -> StoreResult<u64> {
        let inner = self.read_inner()?;
        Ok(inner.events.get(&match_id).map_or(0, |log| log.len() as u64))
    }
}

impl SnapshotStore for MemoryStore {
    fn upsert(&self, snapshot: &ScoreSnapshot) -> StoreResult<()> {
        let mut inner = self.write_inner()?;
        inner
            .snapshots
            .insert((snapshot.match_id, snapshot.team_id), snapshot.clone());
        Ok(())
    }

    fn read(&self, match_id: MatchId, team_id: TeamId) -> StoreResult<Option<ScoreSnapshot>> {
        let inner = self.read_inner()?;
        Ok(inner.snapshots.get(&(match_id, team_id)).cloned())
    }

    fn list(&self, match_id: MatchId) -> StoreResult<Vec<ScoreSnapshot>> {
        let inner = self.read_inner()?;
        let mut out: Vec<ScoreSnapshot> = inner
            .snapshots
            .values()
            .filter(|s| s.match_id == match_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.innings_no);
        Ok(out)
    }
}

impl MatchStore for MemoryStore {
    fn load(&self, match_id: MatchId) -> StoreResult<Option<MatchRecord>> {
        let inner = self.read_inner()?;
        Ok(inner.matches.get(&match_id).cloned())
    }

    fn save(&self, record: &MatchRecord) -> StoreResult<()> {
        if Self::take_failure(&self.failing_saves) {
            return Err(PersistenceError::WriteFailed("injected save failure".to_string()));
        }
        let mut inner = self.write_inner()?;
        inner.matches.insert(record.info.id, record.clone());
        Ok(())
    }
}

impl Store for MemoryStore {
    fn reset_match(&self, record: &MatchRecord) -> StoreResult<()> {
        if Self::take_failure(&self.failing_saves) {
            return Err(PersistenceError::WriteFailed("injected reset failure".to_string()));
        }
        let match_id = record.info.id;
        let mut inner = self.write_inner()?;
        inner.events.remove(&match_id);
        inner.snapshots.retain(|(m, _), _| *m != match_id);
        inner.matches.insert(match_id, record.clone());
        Ok(())
    }
}
