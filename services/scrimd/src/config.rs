//! Scheduler configuration (env-driven).

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use anyhow::{bail, ensure, Context, Result};
use chrono_tz::Tz;

use crate::dispatch::DeliveryBudget;
use scrimd_roster::{RosterLimits, DEFAULT_MAIN_LIMIT, DEFAULT_RESERVE_LIMIT};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the scrim table is persisted.
    pub state_file: PathBuf,

    /// Main and reserve roster capacities.
    pub limits: RosterLimits,

    /// How long after the start instant the reserve call-up fires.
    pub reserve_delay: Duration,

    /// Zone labels participants may announce times in.
    pub zones: BTreeMap<String, Tz>,

    /// Per-participant notification delivery budget.
    pub delivery: DeliveryBudget,

    /// File of presence status lines, re-read every rotation.
    pub presence_file: PathBuf,

    /// How often presence rotates.
    pub presence_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let state_file = std::env::var("SCRIMD_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("scrims.json"));

        let main_limit: usize = std::env::var("SCRIMD_MAIN_LIMIT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SCRIMD_MAIN_LIMIT must be an integer.")?
            .unwrap_or(DEFAULT_MAIN_LIMIT);

        let reserve_limit: usize = std::env::var("SCRIMD_RESERVE_LIMIT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SCRIMD_RESERVE_LIMIT must be an integer.")?
            .unwrap_or(DEFAULT_RESERVE_LIMIT);

        let reserve_delay_secs: u64 = std::env::var("SCRIMD_RESERVE_DELAY_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SCRIMD_RESERVE_DELAY_SECS must be an integer (seconds).")?
            .unwrap_or(300);
        // A zero delay would give both triggers the same deadline; the
        // reserve fire could then land first and be dropped by the
        // ordering guard.
        ensure!(
            reserve_delay_secs >= 1,
            "SCRIMD_RESERVE_DELAY_SECS must be at least 1."
        );

        let zones = match std::env::var("SCRIMD_ZONES") {
            Ok(spec) => parse_zones(&spec)?,
            Err(_) => default_zones(),
        };

        let delivery_timeout_ms: u64 = std::env::var("SCRIMD_DELIVERY_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SCRIMD_DELIVERY_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(5000);
        ensure!(
            delivery_timeout_ms >= 100,
            "SCRIMD_DELIVERY_TIMEOUT_MS must be at least 100."
        );

        let delivery_retries: u32 = std::env::var("SCRIMD_DELIVERY_RETRIES")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SCRIMD_DELIVERY_RETRIES must be an integer.")?
            .unwrap_or(2);

        let presence_file = std::env::var("SCRIMD_PRESENCE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("presence.json"));

        let presence_interval_secs: u64 = std::env::var("SCRIMD_PRESENCE_INTERVAL_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("SCRIMD_PRESENCE_INTERVAL_SECS must be an integer (seconds).")?
            .unwrap_or(600);
        ensure!(
            presence_interval_secs >= 1,
            "SCRIMD_PRESENCE_INTERVAL_SECS must be at least 1."
        );

        let log_level = std::env::var("SCRIMD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            state_file,
            limits: RosterLimits {
                main: main_limit,
                reserve: reserve_limit,
            },
            reserve_delay: Duration::from_secs(reserve_delay_secs),
            zones,
            delivery: DeliveryBudget {
                timeout: Duration::from_millis(delivery_timeout_ms),
                retries: delivery_retries,
                ..DeliveryBudget::default()
            },
            presence_file,
            presence_interval: Duration::from_secs(presence_interval_secs),
            log_level,
        })
    }
}

/// Parse a `LABEL=Area/City, LABEL=Area/City, ...` zone table.
fn parse_zones(spec: &str) -> Result<BTreeMap<String, Tz>> {
    let mut zones = BTreeMap::new();

    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (label, name) = entry
            .split_once('=')
            .with_context(|| format!("zone entry '{entry}' is not LABEL=Area/City"))?;
        let label = label.trim();
        let name = name.trim();
        if label.is_empty() {
            bail!("zone entry '{entry}' has an empty label");
        }
        let tz: Tz = name
            .parse()
            .map_err(|e| anyhow::anyhow!("unknown zone '{name}' for label '{label}': {e}"))?;
        if zones.insert(label.to_string(), tz).is_some() {
            bail!("zone label '{label}' appears twice");
        }
    }

    if zones.is_empty() {
        bail!("SCRIMD_ZONES has no zone entries");
    }
    Ok(zones)
}

fn default_zones() -> BTreeMap<String, Tz> {
    BTreeMap::from([
        ("UK".to_string(), chrono_tz::Europe::London),
        ("NY".to_string(), chrono_tz::America::New_York),
        ("Dallas".to_string(), chrono_tz::America::Chicago),
        ("California".to_string(), chrono_tz::America::Los_Angeles),
    ])
}
