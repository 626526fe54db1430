use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extras::ExtraKind;
use crate::over;

pub type MatchId = u64;
pub type TeamId = u32;
pub type PlayerId = u32;
pub type EventId = u64;
/// Client-supplied delivery sequence number, used to make retried appends safe.
pub type DeliveryKey = u64;

pub const MAX_WICKETS: u32 = 10;
pub const MAX_OVERS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Scheduled,
    Live,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TossDecision {
    Bat,
    Bowl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toss {
    pub winner: TeamId,
    pub decision: TossDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSide {
    pub id: TeamId,
    pub name: String,
    /// Empty when the squad was never registered with the engine.
    #[serde(default)]
    pub roster: Vec<PlayerId>,
}

impl TeamSide {
    pub fn new(id: TeamId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            roster: Vec::new(),
        }
    }

    pub fn with_roster(mut self, roster: Vec<PlayerId>) -> Self {
        self.roster = roster;
        self
    }

    pub fn has_player(&self, player: PlayerId) -> bool {
        self.roster.is_empty() || self.roster.contains(&player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WicketCapPolicy {
    Fixed,
    #[default]
    Roster,
}

impl WicketCapPolicy {
    pub fn cap_for(self, side: &TeamSide) -> u32 {
        match self {
            WicketCapPolicy::Fixed => MAX_WICKETS,
            WicketCapPolicy::Roster if side.roster.len() >= 2 => {
                (side.roster.len() as u32 - 1).min(MAX_WICKETS)
            }
            WicketCapPolicy::Roster => MAX_WICKETS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    WonByRuns { winner: TeamId, margin: u32 },
    WonByWickets { winner: TeamId, margin: u32 },
    Tie,
}

impl MatchResult {
    pub fn winner(&self) -> Option<TeamId> {
        match self {
            MatchResult::WonByRuns { winner, .. } | MatchResult::WonByWickets { winner, .. } => {
                Some(*winner)
            }
            MatchResult::Tie => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub home: TeamSide,
    pub away: TeamSide,
    pub overs_limit: u32,
    pub toss: Option<Toss>,
    pub status: MatchStatus,
    pub winner: Option<TeamId>,
    pub result: Option<MatchResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn balls_per_innings(&self) -> u32 {
        self.overs_limit * over::BALLS_PER_OVER
    }

    pub fn team(&self, id: TeamId) -> Option<&TeamSide> {
        [&self.home, &self.away].into_iter().find(|t| t.id == id)
    }

    pub fn opponent(&self, id: TeamId) -> Option<&TeamSide> {
        if self.home.id == id {
            Some(&self.away)
        } else if self.away.id == id {
            Some(&self.home)
        } else {
            None
        }
    }

    pub fn team_name(&self, id: TeamId) -> &str {
        self.team(id).map(|t| t.name.as_str()).unwrap_or("?")
    }

    pub fn result_line(&self) -> String {
        match self.result {
            Some(MatchResult::WonByRuns { winner, margin }) => {
                format!("{} won by {margin} runs", self.team_name(winner))
            }
            Some(MatchResult::WonByWickets { winner, margin }) => {
                format!("{} won by {margin} wickets", self.team_name(winner))
            }
            Some(MatchResult::Tie) => "Match tied".to_string(),
            None => match self.status {
                MatchStatus::Completed => "No result".to_string(),
                _ => "In progress".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InningsEnd {
    AllOut,
    OversComplete,
    TargetReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Innings {
    pub number: u8,
    pub batting_team: TeamId,
    pub bowling_team: TeamId,
    pub runs: u32,
    pub wickets: u32,
    pub legal_balls: u32,
    pub first_innings: bool,
    pub target: Option<u32>,
    pub wicket_cap: u32,
    pub ball_limit: u32,
    pub ended: Option<InningsEnd>,
    #[serde(default)]
    pub dismissed: Vec<PlayerId>,
}

impl Innings {
    pub fn first(
        batting_team: TeamId,
        bowling_team: TeamId,
        wicket_cap: u32,
        ball_limit: u32,
    ) -> Self {
        Self {
            number: 1,
            batting_team,
            bowling_team,
            runs: 0,
            wickets: 0,
            legal_balls: 0,
            first_innings: true,
            target: None,
            wicket_cap,
            ball_limit,
            ended: None,
            dismissed: Vec::new(),
        }
    }

    /// Sets up the chase: sides swap and the target is the first-innings total plus one.
    pub fn second(previous: &Innings, wicket_cap: u32) -> Self {
        Self {
            number: 2,
            batting_team: previous.bowling_team,
            bowling_team: previous.batting_team,
            runs: 0,
            wickets: 0,
            legal_balls: 0,
            first_innings: false,
            target: Some(previous.runs + 1),
            wicket_cap,
            ball_limit: previous.ball_limit,
            ended: None,
            dismissed: Vec::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_some()
    }

    pub fn overs(&self) -> String {
        over::overs_notation(self.legal_balls)
    }

    pub fn balls_remaining(&self) -> u32 {
        self.ball_limit.saturating_sub(self.legal_balls)
    }

    pub fn runs_needed(&self) -> Option<u32> {
        self.target.map(|t| t.saturating_sub(self.runs))
    }

    pub fn run_rate(&self) -> Option<f64> {
        if self.legal_balls == 0 {
            return None;
        }
        Some(self.runs as f64 * over::BALLS_PER_OVER as f64 / self.legal_balls as f64)
    }

    pub fn required_rate(&self) -> Option<f64> {
        let needed = self.runs_needed()?;
        let remaining = self.balls_remaining();
        if remaining == 0 {
            return None;
        }
        Some(needed as f64 * over::BALLS_PER_OVER as f64 / remaining as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveState {
    pub striker: Option<PlayerId>,
    pub non_striker: Option<PlayerId>,
    pub bowler: Option<PlayerId>,
    pub last_bowler: Option<PlayerId>,
    pub awaiting_batter: bool,
    pub awaiting_bowler: bool,
}

impl ActiveState {
    pub fn swap_strike(&mut self) {
        std::mem::swap(&mut self.striker, &mut self.non_striker);
    }

    pub fn is_batting(&self, player: PlayerId) -> bool {
        self.striker == Some(player) || self.non_striker == Some(player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WicketKind {
    Bowled,
    Caught,
    Lbw,
    RunOut,
    Stumped,
    HitWicket,
}

impl WicketKind {
    /// Run-outs are not credited to the bowler.
    pub fn credited_to_bowler(self) -> bool {
        !matches!(self, WicketKind::RunOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WicketKind::Bowled => "bowled",
            WicketKind::Caught => "caught",
            WicketKind::Lbw => "lbw",
            WicketKind::RunOut => "run_out",
            WicketKind::Stumped => "stumped",
            WicketKind::HitWicket => "hit_wicket",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bowled" => Some(WicketKind::Bowled),
            "caught" => Some(WicketKind::Caught),
            "lbw" => Some(WicketKind::Lbw),
            "run_out" => Some(WicketKind::RunOut),
            "stumped" => Some(WicketKind::Stumped),
            "hit_wicket" => Some(WicketKind::HitWicket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dismissal {
    pub kind: WicketKind,
    pub player: PlayerId,
}

/// One recorded ball. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub match_id: MatchId,
    pub key: DeliveryKey,
    pub innings_no: u8,
    pub over_no: u32,
    pub ball_in_over: u32,
    pub striker: PlayerId,
    pub non_striker: PlayerId,
    pub bowler: PlayerId,
    pub batter_runs: u32,
    pub extra_runs: u32,
    pub extra: ExtraKind,
    pub wicket: Option<Dismissal>,
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn total_runs(&self) -> u32 {
        self.batter_runs + self.extra_runs
    }

    pub fn is_legal(&self) -> bool {
        self.extra.is_legal()
    }

    pub fn runs_conceded(&self) -> u32 {
        if self.extra.charged_to_bowler() {
            self.batter_runs + self.extra_runs
        } else {
            self.batter_runs
        }
    }

    pub fn bowler_wicket(&self) -> bool {
        self.wicket.is_some_and(|w| w.kind.credited_to_bowler())
    }
}

/// Denormalized per-team, per-innings score. Always equal to a fold over the innings' events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub match_id: MatchId,
    pub team_id: TeamId,
    pub innings_no: u8,
    pub runs: u32,
    pub wickets: u32,
    pub legal_balls: u32,
    pub overs: String,
}

impl ScoreSnapshot {
    pub fn of_innings(match_id: MatchId, innings: &Innings) -> Self {
        Self {
            match_id,
            team_id: innings.batting_team,
            innings_no: innings.number,
            runs: innings.runs,
            wickets: innings.wickets,
            legal_balls: innings.legal_balls,
            overs: innings.overs(),
        }
    }

    pub fn display(&self) -> String {
        format!("{}/{} ({} ov)", self.runs, self.wickets, self.overs)
    }
}

/// Everything the match store holds for one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub info: Match,
    pub innings: Vec<Innings>,
    pub active: Option<ActiveState>,
    /// Number of logged deliveries whose effects are reflected in this record. Lags the log
    /// by one only if a commit was interrupted after the append.
    #[serde(default)]
    pub applied_events: u64,
}

impl MatchRecord {
    pub fn new(info: Match) -> Self {
        Self {
            info,
            innings: Vec::new(),
            active: None,
            applied_events: 0,
        }
    }

    pub fn current_innings(&self) -> Option<&Innings> {
        self.innings.last()
    }

    pub fn current_innings_mut(&mut self) -> Option<&mut Innings> {
        self.innings.last_mut()
    }

    pub fn innings(&self, number: u8) -> Option<&Innings> {
        self.innings.iter().find(|i| i.number == number)
    }
}

/// Read-side view of a match, as relayed to spectators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchView {
    pub info: Match,
    pub innings: Vec<Innings>,
    pub active: Option<ActiveState>,
    pub snapshots: Vec<ScoreSnapshot>,
}

impl MatchView {
    pub fn current_innings(&self) -> Option<&Innings> {
        self.innings.last()
    }
}

/// Published by the engine after each committed transition.
#[derive(Debug, Clone)]
pub enum Notification {
    DeliveryApplied {
        match_id: MatchId,
        event: DeliveryEvent,
        snapshot: ScoreSnapshot,
    },
    InningsEnded {
        match_id: MatchId,
        innings_no: u8,
        reason: InningsEnd,
        snapshot: ScoreSnapshot,
    },
    MatchCompleted {
        match_id: MatchId,
        result: MatchResult,
    },
    MatchReset {
        match_id: MatchId,
    },
}

impl Notification {
    pub fn match_id(&self) -> MatchId {
        match self {
            Notification::DeliveryApplied { match_id, .. }
            | Notification::InningsEnded { match_id, .. }
            | Notification::MatchCompleted { match_id, .. }
            | Notification::MatchReset { match_id } => *match_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TickerEntry {
    pub scores: HashMap<u8, ScoreSnapshot>,
    pub last_ball: Option<String>,
    pub result: Option<MatchResult>,
    pub deliveries_seen: usize,
}

/// Spectator-side view folded from notifications, the way a relay keeps its live ticker.
#[derive(Debug, Clone, Default)]
pub struct Ticker {
    pub matches: HashMap<MatchId, TickerEntry>,
    pub logs: Vec<String>,
}

const TICKER_LOG_CAP: usize = 200;

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push(msg.into());
        if self.logs.len() > TICKER_LOG_CAP {
            let drain_count = self.logs.len() - TICKER_LOG_CAP;
            self.logs.drain(..drain_count);
        }
    }

    pub fn score(&self, match_id: MatchId, innings_no: u8) -> Option<&ScoreSnapshot> {
        self.matches.get(&match_id)?.scores.get(&innings_no)
    }
}

pub fn apply_notification(ticker: &mut Ticker, notification: Notification) {
    match notification {
        Notification::DeliveryApplied {
            match_id,
            event,
            snapshot,
        } => {
            let entry = ticker.matches.entry(match_id).or_default();
            // Snapshots only move forward within an innings; drop anything older than what we hold.
            let stale = entry
                .scores
                .get(&snapshot.innings_no)
                .is_some_and(|held| {
                    held.legal_balls > snapshot.legal_balls || held.runs > snapshot.runs
                });
            entry.deliveries_seen += 1;
            entry.last_ball = Some(describe_ball(&event));
            if !stale {
                entry.scores.insert(snapshot.innings_no, snapshot);
            }
        }
        Notification::InningsEnded {
            match_id,
            innings_no,
            reason,
            snapshot,
        } => {
            ticker
                .matches
                .entry(match_id)
                .or_default()
                .scores
                .insert(innings_no, snapshot.clone());
            ticker.push_log(format!(
                "[INFO] Match {match_id}: innings {innings_no} closed at {} ({reason:?})",
                snapshot.display()
            ));
        }
        Notification::MatchCompleted { match_id, result } => {
            ticker.matches.entry(match_id).or_default().result = Some(result);
            ticker.push_log(format!("[INFO] Match {match_id}: completed, {result:?}"));
        }
        Notification::MatchReset { match_id } => {
            ticker.matches.remove(&match_id);
            ticker.push_log(format!("[WARN] Match {match_id}: reset by scorer"));
        }
    }
}

pub fn describe_ball(event: &DeliveryEvent) -> String {
    let mut text = format!("{}.{} ", event.over_no, event.ball_in_over);
    match event.extra {
        ExtraKind::None => text.push_str(&event.batter_runs.to_string()),
        ExtraKind::Wide => text.push_str(&format!("{}wd", event.extra_runs)),
        ExtraKind::NoBall => text.push_str(&format!("nb+{}", event.batter_runs)),
        ExtraKind::Bye => text.push_str(&format!("{}b", event.extra_runs)),
        ExtraKind::LegBye => text.push_str(&format!("{}lb", event.extra_runs)),
    }
    if let Some(w) = event.wicket {
        text.push_str(&format!(" W ({})", w.kind.as_str()));
    }
    text
}
