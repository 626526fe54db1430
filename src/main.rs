use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use cricket_live::config;
use cricket_live::engine::{MatchSetup, ScoringEngine};
use cricket_live::fake_feed::{self, SimSettings};
use cricket_live::persist::SqliteStore;
use cricket_live::state::{Ticker, apply_notification};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = config::config();
    let store = match &cfg.db_path {
        Some(path) => SqliteStore::open(path)
            .with_context(|| format!("opening score database at {}", path.display()))?,
        None => SqliteStore::open_in_memory()?,
    };
    let match_id = store.match_ids()?.into_iter().max().unwrap_or(0) + 1;
    let engine = Arc::new(ScoringEngine::new(store, cfg.wicket_policy));
    let rx = engine.subscribe();

    let setup = MatchSetup {
        id: match_id,
        home: fake_feed::seed_side(1, "Northern Strikers"),
        away: fake_feed::seed_side(2, "Southern Chargers"),
        overs_limit: cfg.overs_limit,
    };
    info!(
        "simulating match {match_id} ({} overs) into {}",
        cfg.overs_limit,
        cfg.db_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string())
    );
    let handle = fake_feed::spawn_simulated_match(
        Arc::clone(&engine),
        setup,
        SimSettings {
            seed: cfg.sim_seed,
            delay: cfg.sim_delay,
        },
    );

    let mut ticker = Ticker::new();
    let mut printed_logs = 0;
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(notification) => {
                apply_notification(&mut ticker, notification);
                if let Some(entry) = ticker.matches.get(&match_id)
                    && let Some(ball) = &entry.last_ball
                    && entry.deliveries_seen % 6 == 0
                {
                    let score = entry
                        .scores
                        .keys()
                        .max()
                        .and_then(|n| entry.scores.get(n))
                        .map(|s| s.display())
                        .unwrap_or_default();
                    println!("{ball:<18} {score}");
                }
                for line in &ticker.logs[printed_logs..] {
                    println!("{line}");
                }
                printed_logs = ticker.logs.len();
            }
            Err(_) if handle.is_finished() => break,
            Err(_) => {}
        }
    }

    let outcome = handle
        .join()
        .map_err(|_| anyhow!("simulation thread panicked"))??;

    let view = engine.match_view(match_id)?;
    for innings in &view.innings {
        let card = engine.scorecard(match_id, innings.number)?;
        println!();
        println!("{}", view.info.team_name(innings.batting_team));
        print!("{}", card.render());
    }
    println!();
    if outcome != view.info.result {
        warn!("match {match_id}: simulator and store disagree on the result");
    }
    println!("{}", view.info.result_line());
    Ok(())
}
