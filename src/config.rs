use std::env;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::persist;
use crate::state::{MAX_OVERS, WicketCapPolicy};

const DEFAULT_OVERS: u32 = 20;

static CONFIG: OnceCell<EngineConfig> = OnceCell::new();

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub db_path: Option<PathBuf>,
    pub overs_limit: u32,
    pub wicket_policy: WicketCapPolicy,
    pub sim_seed: Option<u64>,
    pub sim_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: persist::default_db_path(),
            overs_limit: DEFAULT_OVERS,
            wicket_policy: WicketCapPolicy::Roster,
            sim_seed: None,
            sim_delay: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let db_path = env::var("CRICKET_DB_PATH")
            .ok()
            .filter(|val| !val.trim().is_empty())
            .map(PathBuf::from)
            .or_else(persist::default_db_path);
        let overs_limit = env::var("CRICKET_OVERS")
            .ok()
            .and_then(|val| val.parse::<u32>().ok())
            .unwrap_or(DEFAULT_OVERS)
            .clamp(1, MAX_OVERS);
        let wicket_policy = env::var("CRICKET_WICKET_POLICY")
            .ok()
            .and_then(|val| parse_wicket_policy(&val))
            .unwrap_or_default();
        let sim_seed = env::var("CRICKET_SIM_SEED")
            .ok()
            .and_then(|val| val.parse::<u64>().ok());
        let sim_delay = Duration::from_millis(
            env::var("CRICKET_SIM_DELAY_MS")
                .ok()
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(0)
                .min(5_000),
        );
        Self {
            db_path,
            overs_limit,
            wicket_policy,
            sim_seed,
            sim_delay,
        }
    }
}

pub fn parse_wicket_policy(raw: &str) -> Option<WicketCapPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "fixed" | "10" => Some(WicketCapPolicy::Fixed),
        "roster" | "squad" => Some(WicketCapPolicy::Roster),
        _ => None,
    }
}

/// Process-wide config, read from the environment on first use.
pub fn config() -> &'static EngineConfig {
    CONFIG.get_or_init(EngineConfig::from_env)
}
