use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::entities::creature::{MapId, TemplateId};
use crate::error::{Result, SimError};
use crate::world::loot::Rates;

const CONFIG_FILE: &str = "mapsim.yaml";

/// Tunables read from `mapsim.yaml`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub workers: usize,
    pub entity_tick_ms: u64,
    pub instance_tick_ms: u64,
    pub sleep_grace_secs: u64,
    pub drop_ttl_secs: u64,
    pub rates: Rates,
    pub max_level: u16,
    pub seed: u64,
    pub proc_summon: TemplateId,
    pub path_cache_capacity: usize,
    pub maps: Vec<MapId>,
    pub run_secs: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            entity_tick_ms: 400,
            instance_tick_ms: 1_000,
            sleep_grace_secs: 30,
            drop_ttl_secs: 180,
            rates: Rates::default(),
            max_level: 99,
            seed: 0,
            proc_summon: TemplateId(2371),
            path_cache_capacity: 256,
            maps: Vec::new(),
            run_secs: None,
        }
    }
}

impl SimConfig {
    pub fn entity_tick(&self) -> Duration {
        Duration::from_millis(self.entity_tick_ms.max(1))
    }

    pub fn instance_tick(&self) -> Duration {
        Duration::from_millis(self.instance_tick_ms.max(1))
    }

    pub fn sleep_grace(&self) -> Duration {
        Duration::from_secs(self.sleep_grace_secs)
    }

    pub fn drop_ttl(&self) -> Duration {
        Duration::from_secs(self.drop_ttl_secs)
    }

    pub fn run_duration(&self) -> Option<Duration> {
        self.run_secs.map(Duration::from_secs)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(workers) = parse_override(&lookup, "MAPSIM_WORKERS")? {
            self.workers = workers;
        }
        if let Some(seed) = parse_override(&lookup, "MAPSIM_SEED")? {
            self.seed = seed;
        }
        if let Some(rate) = parse_override(&lookup, "MAPSIM_XP_RATE")? {
            self.rates.xp = rate;
        }
        if let Some(rate) = parse_override(&lookup, "MAPSIM_DROP_RATE")? {
            self.rates.drop = rate;
        }
        if let Some(secs) = parse_override(&lookup, "MAPSIM_RUN_SECS")? {
            self.run_secs = Some(secs);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub sim: SimConfig,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        Self::from_args_with(args, |key| std::env::var(key).ok())
    }

    fn from_args_with(args: &[String], lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if args.len() < 2 {
            return Err(SimError::Usage(
                "mapsim <data-root> [config.yaml]".to_string(),
            ));
        }
        let root = Path::new(&args[1]).to_path_buf();
        let config_path = match args.get(2) {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(root.join(CONFIG_FILE)).filter(|path| path.is_file()),
        };
        let mut sim = match &config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|err| SimError::io(path, err))?;
                serde_yaml::from_str(&text).map_err(|err| SimError::yaml(path, err))?
            }
            None => SimConfig::default(),
        };
        sim.apply_overrides(lookup)?;
        Ok(Self {
            root,
            config_path,
            sim,
        })
    }
}

fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| SimError::Usage(format!("{key} has an invalid value '{trimmed}'")))
}
