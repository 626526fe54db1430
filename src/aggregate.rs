//! Read-side statistics. Every number here is recomputed from the ordered event log on each
//! call; nothing is carried between calls.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::extras::ExtraKind;
use crate::over;
use crate::state::{DeliveryEvent, MatchId, PlayerId, ScoreSnapshot, TeamId, WicketKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Batter,
    Bowler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissalInfo {
    pub kind: WicketKind,
    pub bowler: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattingStats {
    pub player: PlayerId,
    pub innings_no: u8,
    pub runs: u32,
    pub balls_faced: u32,
    pub fours: u32,
    pub sixes: u32,
    pub dismissal: Option<DismissalInfo>,
}

impl BattingStats {
    pub fn is_out(&self) -> bool {
        self.dismissal.is_some()
    }

    pub fn strike_rate(&self) -> Option<f64> {
        if self.balls_faced == 0 {
            return None;
        }
        Some(self.runs as f64 * 100.0 / self.balls_faced as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BowlingStats {
    pub player: PlayerId,
    pub innings_no: u8,
    pub runs_conceded: u32,
    pub legal_balls: u32,
    pub wickets: u32,
    pub maidens: u32,
    pub wides: u32,
    pub no_balls: u32,
}

impl BowlingStats {
    /// Runs conceded per six legal balls; `None` before the bowler has completed a legal ball.
    pub fn economy(&self) -> Option<f64> {
        if self.legal_balls == 0 {
            return None;
        }
        Some(self.runs_conceded as f64 * over::BALLS_PER_OVER as f64 / self.legal_balls as f64)
    }

    pub fn overs(&self) -> String {
        over::overs_notation(self.legal_balls)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayerStats {
    Batting(BattingStats),
    Bowling(BowlingStats),
}

pub fn player_stats(
    events: &[DeliveryEvent],
    player: PlayerId,
    innings_no: u8,
    role: Role,
) -> PlayerStats {
    match role {
        Role::Batter => PlayerStats::Batting(batting_stats(events, player, innings_no)),
        Role::Bowler => PlayerStats::Bowling(bowling_stats(events, player, innings_no)),
    }
}

fn in_innings(events: &[DeliveryEvent], innings_no: u8) -> impl Iterator<Item = &DeliveryEvent> {
    events.iter().filter(move |e| e.innings_no == innings_no)
}

pub fn batting_stats(events: &[DeliveryEvent], player: PlayerId, innings_no: u8) -> BattingStats {
    let mut stats = BattingStats {
        player,
        innings_no,
        runs: 0,
        balls_faced: 0,
        fours: 0,
        sixes: 0,
        dismissal: None,
    };
    for event in in_innings(events, innings_no) {
        if let Some(w) = event.wicket
            && w.player == player
        {
            stats.dismissal = Some(DismissalInfo {
                kind: w.kind,
                bowler: event.bowler,
            });
        }
        if event.striker != player {
            continue;
        }
        // A wide is never a ball faced; a no-ball is.
        if event.extra != ExtraKind::Wide {
            stats.balls_faced += 1;
        }
        stats.runs += event.batter_runs;
        match event.batter_runs {
            4 => stats.fours += 1,
            6 => stats.sixes += 1,
            _ => {}
        }
    }
    stats
}

pub fn bowling_stats(events: &[DeliveryEvent], player: PlayerId, innings_no: u8) -> BowlingStats {
    let mut stats = BowlingStats {
        player,
        innings_no,
        runs_conceded: 0,
        legal_balls: 0,
        wickets: 0,
        maidens: 0,
        wides: 0,
        no_balls: 0,
    };
    let mut over_runs: Option<(u32, u32, u32)> = None;
    for event in in_innings(events, innings_no).filter(|e| e.bowler == player) {
        stats.runs_conceded += event.runs_conceded();
        if event.is_legal() {
            stats.legal_balls += 1;
        }
        if event.bowler_wicket() {
            stats.wickets += 1;
        }
        match event.extra {
            ExtraKind::Wide => stats.wides += 1,
            ExtraKind::NoBall => stats.no_balls += 1,
            _ => {}
        }

        // (over index, legal balls, runs conceded) for the over in progress.
        let (idx, balls, runs) = match over_runs {
            Some((idx, balls, runs)) if idx == event.over_no => (idx, balls, runs),
            _ => (event.over_no, 0, 0),
        };
        let balls = balls + u32::from(event.is_legal());
        let runs = runs + event.runs_conceded();
        if balls == over::BALLS_PER_OVER && runs == 0 {
            stats.maidens += 1;
        }
        over_runs = Some((idx, balls, runs));
    }
    stats
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtrasBreakdown {
    pub wides: u32,
    pub no_balls: u32,
    pub byes: u32,
    pub leg_byes: u32,
}

impl ExtrasBreakdown {
    pub fn total(&self) -> u32 {
        self.wides + self.no_balls + self.byes + self.leg_byes
    }
}

pub fn extras_breakdown(events: &[DeliveryEvent], innings_no: u8) -> ExtrasBreakdown {
    let mut out = ExtrasBreakdown::default();
    for event in in_innings(events, innings_no) {
        match event.extra {
            ExtraKind::None => {}
            ExtraKind::Wide => out.wides += event.extra_runs,
            ExtraKind::NoBall => out.no_balls += event.extra_runs,
            ExtraKind::Bye => out.byes += event.extra_runs,
            ExtraKind::LegBye => out.leg_byes += event.extra_runs,
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InningsTotals {
    pub runs: u32,
    pub wickets: u32,
    pub legal_balls: u32,
}

impl InningsTotals {
    pub fn overs(&self) -> String {
        over::overs_notation(self.legal_balls)
    }
}

/// Folds an innings' events into its running totals.
pub fn innings_totals(events: &[DeliveryEvent], innings_no: u8) -> InningsTotals {
    in_innings(events, innings_no).fold(InningsTotals::default(), |mut acc, event| {
        acc.runs += event.total_runs();
        acc.wickets += u32::from(event.wicket.is_some());
        acc.legal_balls += u32::from(event.is_legal());
        acc
    })
}

/// Rebuilds the snapshot cache entry for one innings purely from the log.
pub fn snapshot_from_log(
    match_id: MatchId,
    team_id: TeamId,
    events: &[DeliveryEvent],
    innings_no: u8,
) -> ScoreSnapshot {
    let totals = innings_totals(events, innings_no);
    ScoreSnapshot {
        match_id,
        team_id,
        innings_no,
        runs: totals.runs,
        wickets: totals.wickets,
        legal_balls: totals.legal_balls,
        overs: totals.overs(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallOfWicket {
    pub wicket_no: u32,
    pub runs: u32,
    pub player: PlayerId,
    pub overs: String,
}

pub fn fall_of_wickets(events: &[DeliveryEvent], innings_no: u8) -> Vec<FallOfWicket> {
    let mut runs = 0;
    let mut legal = 0;
    let mut out = Vec::new();
    for event in in_innings(events, innings_no) {
        runs += event.total_runs();
        legal += u32::from(event.is_legal());
        if let Some(w) = event.wicket {
            out.push(FallOfWicket {
                wicket_no: out.len() as u32 + 1,
                runs,
                player: w.player,
                overs: over::overs_notation(legal),
            });
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverSummary {
    pub over_no: u32,
    pub bowler: PlayerId,
    pub runs: u32,
    pub wickets: u32,
}

/// Runs and wickets per over, in bowling order.
pub fn over_summaries(events: &[DeliveryEvent], innings_no: u8) -> Vec<OverSummary> {
    let mut out: Vec<OverSummary> = Vec::new();
    for event in in_innings(events, innings_no) {
        match out.last_mut() {
            Some(last) if last.over_no == event.over_no => {
                last.runs += event.total_runs();
                last.wickets += u32::from(event.wicket.is_some());
            }
            _ => out.push(OverSummary {
                over_no: event.over_no,
                bowler: event.bowler,
                runs: event.total_runs(),
                wickets: u32::from(event.wicket.is_some()),
            }),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub innings_no: u8,
    pub batting: Vec<BattingStats>,
    pub bowling: Vec<BowlingStats>,
    pub extras: ExtrasBreakdown,
    pub totals: InningsTotals,
    pub fall_of_wickets: Vec<FallOfWicket>,
}

/// Players in order of first appearance. Non-strikers count: a batter run out without facing
/// still appears.
fn appearance_order(events: &[DeliveryEvent], innings_no: u8, role: Role) -> Vec<PlayerId> {
    let mut seen = Vec::new();
    for event in in_innings(events, innings_no) {
        let candidates = match role {
            Role::Batter => [Some(event.striker), Some(event.non_striker)],
            Role::Bowler => [Some(event.bowler), None],
        };
        for player in candidates.into_iter().flatten() {
            if !seen.contains(&player) {
                seen.push(player);
            }
        }
    }
    seen
}

impl Scorecard {
    /// Plain-text card, one line per batter and bowler.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Innings {}: {}/{} ({} ov)\n",
            self.innings_no,
            self.totals.runs,
            self.totals.wickets,
            self.totals.overs()
        );
        for bat in &self.batting {
            let how = match bat.dismissal {
                Some(d) => format!("{} b {}", d.kind.as_str(), d.bowler),
                None => "not out".to_string(),
            };
            let sr = bat
                .strike_rate()
                .map(|sr| format!("{sr:.1}"))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  {:>6} {:<18} {:>3} ({:>3}) 4s {} 6s {} sr {}\n",
                bat.player, how, bat.runs, bat.balls_faced, bat.fours, bat.sixes, sr
            ));
        }
        let e = &self.extras;
        out.push_str(&format!(
            "  extras {} (w {}, nb {}, b {}, lb {})\n",
            e.total(),
            e.wides,
            e.no_balls,
            e.byes,
            e.leg_byes
        ));
        if !self.fall_of_wickets.is_empty() {
            let fow = self
                .fall_of_wickets
                .iter()
                .map(|f| format!("{}-{} ({}, {})", f.wicket_no, f.runs, f.player, f.overs))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("  fow: {fow}\n"));
        }
        for bowl in &self.bowling {
            let econ = bowl
                .economy()
                .map(|e| format!("{e:.2}"))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  {:>6} {:>5}-{}-{:>3}-{} econ {}\n",
                bowl.player,
                bowl.overs(),
                bowl.maidens,
                bowl.runs_conceded,
                bowl.wickets,
                econ
            ));
        }
        out
    }
}

pub fn scorecard(events: &[DeliveryEvent], innings_no: u8) -> Scorecard {
    let batters = appearance_order(events, innings_no, Role::Batter);
    let bowlers = appearance_order(events, innings_no, Role::Bowler);

    let batting = batters
        .par_iter()
        .map(|player| batting_stats(events, *player, innings_no))
        .collect();
    let bowling = bowlers
        .par_iter()
        .map(|player| bowling_stats(events, *player, innings_no))
        .collect();

    Scorecard {
        innings_no,
        batting,
        bowling,
        extras: extras_breakdown(events, innings_no),
        totals: innings_totals(events, innings_no),
        fall_of_wickets: fall_of_wickets(events, innings_no),
    }
}
