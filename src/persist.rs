use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::PersistenceError;
use crate::extras::ExtraKind;
use crate::state::{
    DeliveryEvent, DeliveryKey, Dismissal, MatchId, MatchRecord, ScoreSnapshot, TeamId, WicketKind,
};
use crate::store::{AppendOutcome, EventStore, MatchStore, SnapshotStore, Store, StoreResult};

const DATA_DIR: &str = "cricket_live";
const DB_FILE: &str = "scores.sqlite";

pub fn default_db_path() -> Option<PathBuf> {
    // Prefer XDG data dir.
    if let Ok(base) = std::env::var("XDG_DATA_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(DATA_DIR).join(DB_FILE));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(DATA_DIR)
            .join(DB_FILE),
    )
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            status TEXT NOT NULL,
            record_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS deliveries (
            event_id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER NOT NULL,
            delivery_key INTEGER NOT NULL,
            innings_no INTEGER NOT NULL,
            over_no INTEGER NOT NULL,
            ball_in_over INTEGER NOT NULL,
            striker INTEGER NOT NULL,
            non_striker INTEGER NOT NULL,
            bowler INTEGER NOT NULL,
            batter_runs INTEGER NOT NULL,
            extra_runs INTEGER NOT NULL,
            extra_kind TEXT NOT NULL,
            wicket_kind TEXT NULL,
            dismissed INTEGER NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE (match_id, delivery_key)
        );
        CREATE INDEX IF NOT EXISTS idx_deliveries_match ON deliveries(match_id, innings_no);

        CREATE TABLE IF NOT EXISTS snapshots (
            match_id INTEGER NOT NULL,
            team_id INTEGER NOT NULL,
            innings_no INTEGER NOT NULL,
            runs INTEGER NOT NULL,
            wickets INTEGER NOT NULL,
            legal_balls INTEGER NOT NULL,
            overs TEXT NOT NULL,
            PRIMARY KEY (match_id, team_id)
        );
        "#,
    )
}

/// SQLite-backed store. One connection behind a mutex; rusqlite connections are not `Sync`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn).context("create sqlite schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn).context("create sqlite schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| {
                PersistenceError::Unavailable("sqlite connection lock poisoned".to_string())
            })
    }

    /// Match ids with a stored record, newest first.
    pub fn match_ids(&self) -> StoreResult<Vec<MatchId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT match_id FROM matches ORDER BY updated_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(|id| id as MatchId).collect())
    }
}

const DELIVERY_COLUMNS: &str = "match_id, delivery_key, innings_no, over_no, ball_in_over, \
     striker, non_striker, bowler, batter_runs, extra_runs, extra_kind, wicket_kind, dismissed, \
     recorded_at";

struct DeliveryRow {
    match_id: i64,
    key: i64,
    innings_no: i64,
    over_no: i64,
    ball_in_over: i64,
    striker: i64,
    non_striker: i64,
    bowler: i64,
    batter_runs: i64,
    extra_runs: i64,
    extra_kind: String,
    wicket_kind: Option<String>,
    dismissed: Option<i64>,
    recorded_at: String,
}

impl DeliveryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            match_id: row.get(0)?,
            key: row.get(1)?,
            innings_no: row.get(2)?,
            over_no: row.get(3)?,
            ball_in_over: row.get(4)?,
            striker: row.get(5)?,
            non_striker: row.get(6)?,
            bowler: row.get(7)?,
            batter_runs: row.get(8)?,
            extra_runs: row.get(9)?,
            extra_kind: row.get(10)?,
            wicket_kind: row.get(11)?,
            dismissed: row.get(12)?,
            recorded_at: row.get(13)?,
        })
    }

    fn into_event(self) -> StoreResult<DeliveryEvent> {
        let extra = ExtraKind::parse(&self.extra_kind)
            .ok_or_else(|| PersistenceError::Corrupt(format!("extra kind {}", self.extra_kind)))?;
        let wicket = match (self.wicket_kind, self.dismissed) {
            (Some(kind), Some(player)) => {
                let kind = WicketKind::parse(&kind)
                    .ok_or_else(|| PersistenceError::Corrupt(format!("wicket kind {kind}")))?;
                Some(Dismissal {
                    kind,
                    player: player as u32,
                })
            }
            (None, None) => None,
            _ => {
                return Err(PersistenceError::Corrupt(
                    "wicket kind without dismissed player".to_string(),
                ));
            }
        };
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|err| PersistenceError::Corrupt(format!("recorded_at: {err}")))?
            .with_timezone(&Utc);
        Ok(DeliveryEvent {
            match_id: self.match_id as MatchId,
            key: self.key as DeliveryKey,
            innings_no: self.innings_no as u8,
            over_no: self.over_no as u32,
            ball_in_over: self.ball_in_over as u32,
            striker: self.striker as u32,
            non_striker: self.non_striker as u32,
            bowler: self.bowler as u32,
            batter_runs: self.batter_runs as u32,
            extra_runs: self.extra_runs as u32,
            extra,
            wicket,
            recorded_at,
        })
    }
}

impl EventStore for SqliteStore {
    fn append(&self, event: &DeliveryEvent) -> StoreResult<AppendOutcome> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO deliveries({DELIVERY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(match_id, delivery_key) DO NOTHING"
            ),
            params![
                event.match_id as i64,
                event.key as i64,
                event.innings_no as i64,
                event.over_no as i64,
                event.ball_in_over as i64,
                event.striker as i64,
                event.non_striker as i64,
                event.bowler as i64,
                event.batter_runs as i64,
                event.extra_runs as i64,
                event.extra.as_str(),
                event.wicket.map(|w| w.kind.as_str()),
                event.wicket.map(|w| w.player as i64),
                event.recorded_at.to_rfc3339(),
            ],
        )?;
        if inserted == 1 {
            return Ok(AppendOutcome::Appended(conn.last_insert_rowid() as u64));
        }
        let existing: i64 = conn.query_row(
            "SELECT event_id FROM deliveries WHERE match_id = ?1 AND delivery_key = ?2",
            params![event.match_id as i64, event.key as i64],
            |row| row.get(0),
        )?;
        Ok(AppendOutcome::Duplicate(existing as u64))
    }

    fn find_by_key(
        &self,
        match_id: MatchId,
        key: DeliveryKey,
    ) -> StoreResult<Option<DeliveryEvent>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {DELIVERY_COLUMNS} FROM deliveries \
                     WHERE match_id = ?1 AND delivery_key = ?2"
                ),
                params![match_id as i64, key as i64],
                DeliveryRow::from_row,
            )
            .optional()?;
        row.map(DeliveryRow::into_event).transpose()
    }

    fn query(&self, match_id: MatchId, innings_no: Option<u8>) -> StoreResult<Vec<DeliveryEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
             WHERE match_id = ?1 AND (?2 IS NULL OR innings_no = ?2)
             ORDER BY event_id"
        ))?;
        let rows = stmt
            .query_map(
                params![match_id as i64, innings_no.map(i64::from)],
                DeliveryRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(DeliveryRow::into_event).collect()
    }

    fn count(&self, match_id: MatchId) -> StoreResult<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM deliveries WHERE match_id = ?1",
            params![match_id as i64],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

impl SnapshotStore for SqliteStore {
    fn upsert(&self, snapshot: &ScoreSnapshot) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO snapshots(match_id, team_id, innings_no, runs, wickets, legal_balls, overs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(match_id, team_id) DO UPDATE SET
                innings_no = excluded.innings_no,
                runs = excluded.runs,
                wickets = excluded.wickets,
                legal_balls = excluded.legal_balls,
                overs = excluded.overs",
            params![
                snapshot.match_id as i64,
                snapshot.team_id as i64,
                snapshot.innings_no as i64,
                snapshot.runs as i64,
                snapshot.wickets as i64,
                snapshot.legal_balls as i64,
                snapshot.overs,
            ],
        )?;
        Ok(())
    }

    fn read(&self, match_id: MatchId, team_id: TeamId) -> StoreResult<Option<ScoreSnapshot>> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                "SELECT match_id, team_id, innings_no, runs, wickets, legal_balls, overs
                 FROM snapshots WHERE match_id = ?1 AND team_id = ?2",
                params![match_id as i64, team_id as i64],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn list(&self, match_id: MatchId) -> StoreResult<Vec<ScoreSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT match_id, team_id, innings_no, runs, wickets, legal_balls, overs
             FROM snapshots WHERE match_id = ?1 ORDER BY innings_no",
        )?;
        let rows = stmt
            .query_map(params![match_id as i64], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<ScoreSnapshot> {
    Ok(ScoreSnapshot {
        match_id: row.get::<_, i64>(0)? as MatchId,
        team_id: row.get::<_, i64>(1)? as TeamId,
        innings_no: row.get::<_, i64>(2)? as u8,
        runs: row.get::<_, i64>(3)? as u32,
        wickets: row.get::<_, i64>(4)? as u32,
        legal_balls: row.get::<_, i64>(5)? as u32,
        overs: row.get(6)?,
    })
}

fn save_record(conn: &Connection, record: &MatchRecord) -> StoreResult<()> {
    let json = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO matches(match_id, status, record_json, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(match_id) DO UPDATE SET
            status = excluded.status,
            record_json = excluded.record_json,
            updated_at = excluded.updated_at",
        params![
            record.info.id as i64,
            format!("{:?}", record.info.status),
            json,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl MatchStore for SqliteStore {
    fn load(&self, match_id: MatchId) -> StoreResult<Option<MatchRecord>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT record_json FROM matches WHERE match_id = ?1",
                params![match_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, record: &MatchRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        save_record(&conn, record)
    }
}

impl Store for SqliteStore {
    fn reset_match(&self, record: &MatchRecord) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let match_id = record.info.id as i64;
        // Dropping the transaction without commit rolls everything back.
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM deliveries WHERE match_id = ?1", params![match_id])?;
        tx.execute("DELETE FROM snapshots WHERE match_id = ?1", params![match_id])?;
        save_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }
}
