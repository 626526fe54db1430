use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use cricket_live::aggregate::Scorecard;
use cricket_live::config;
use cricket_live::engine::ScoringEngine;
use cricket_live::persist::{self, SqliteStore};
use cricket_live::state::{MatchId, MatchView};

#[derive(Serialize)]
struct Report {
    view: MatchView,
    scorecards: Vec<Scorecard>,
    result: String,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let db_path = parse_value_arg(&args, "--db")
        .map(PathBuf::from)
        .or_else(|| config::config().db_path.clone())
        .or_else(persist::default_db_path)
        .context("unable to resolve sqlite path")?;
    let json = args.iter().any(|a| a == "--json");
    let reconcile = args.iter().any(|a| a == "--reconcile");

    let store = SqliteStore::open(&db_path)?;
    let match_id: MatchId = match parse_value_arg(&args, "--match") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid match id {raw:?}"))?,
        None => store
            .match_ids()?
            .first()
            .copied()
            .ok_or_else(|| anyhow!("no matches stored in {}", db_path.display()))?,
    };

    let engine = ScoringEngine::new(store, config::config().wicket_policy);
    if reconcile {
        let fixed = engine.reconcile_snapshots(match_id)?;
        eprintln!("reconciled {fixed} snapshot(s)");
    }

    let view = engine.match_view(match_id)?;
    let scorecards = view
        .innings
        .iter()
        .map(|innings| engine.scorecard(match_id, innings.number))
        .collect::<Result<Vec<_>, _>>()?;
    let result = view.info.result_line();

    if json {
        let report = Report {
            view,
            scorecards,
            result,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Match {}: {} v {} ({} overs)",
        view.info.id, view.info.home.name, view.info.away.name, view.info.overs_limit
    );
    for (innings, card) in view.innings.iter().zip(&scorecards) {
        println!();
        println!("{}", view.info.team_name(innings.batting_team));
        print!("{}", card.render());
        if let Some(target) = innings.target {
            println!("  target {target}");
        }
    }
    println!();
    println!("{result}");
    Ok(())
}

fn parse_value_arg(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
