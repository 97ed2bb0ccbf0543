//! Reconciliation configuration.
//!
//! Values come from the `local_settings` table (category `reconciliation`)
//! and can be overridden per process with `CASH_RECONCILE_*` environment
//! variables. Anything not set falls back to the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::db;
use crate::denominations::normalize_currency;
use crate::diagnostics;
use crate::error::{ReconcileError, Result};

pub const SETTINGS_CATEGORY: &str = "reconciliation";

const KEY_LOCAL_CURRENCY: &str = "local_currency";
const KEY_FETCH_TIMEOUT_MS: &str = "fetch_timeout_ms";
const KEY_DISPLAY_DECIMALS: &str = "display_decimals";

const ENV_CURRENCY: &str = "CASH_RECONCILE_CURRENCY";
const ENV_FETCH_TIMEOUT_MS: &str = "CASH_RECONCILE_FETCH_TIMEOUT_MS";
const ENV_DISPLAY_DECIMALS: &str = "CASH_RECONCILE_DISPLAY_DECIMALS";
const ENV_LOG_DIR: &str = "CASH_RECONCILE_LOG_DIR";

const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOG_FILTER: &str = "info,cash_session_reconciler=debug";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Currency whose counted total drives expected cash and over/short.
    pub local_currency: String,
    /// Upper bound for the whole upstream fetch fan-out.
    pub fetch_timeout: Duration,
    /// Fractional digits in the printed report (0..=2).
    pub display_decimals: u8,
    pub log_dir: PathBuf,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            local_currency: DEFAULT_CURRENCY.to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            display_decimals: 2,
            log_dir: diagnostics::get_log_dir(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ReconcileConfig {
    /// Defaults, then stored settings, then environment overrides.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut config = Self::default();
        config.apply_settings(conn)?;
        config.apply_env_overrides()?;
        info!(
            currency = %config.local_currency,
            fetch_timeout_ms = config.fetch_timeout.as_millis() as u64,
            display_decimals = config.display_decimals,
            "Reconciliation config loaded"
        );
        Ok(config)
    }

    pub fn apply_settings(&mut self, conn: &Connection) -> Result<()> {
        if let Some(currency) = db::get_setting(conn, SETTINGS_CATEGORY, KEY_LOCAL_CURRENCY)? {
            self.local_currency = parse_currency(KEY_LOCAL_CURRENCY, &currency)?;
        }
        if let Some(ms) = db::get_setting(conn, SETTINGS_CATEGORY, KEY_FETCH_TIMEOUT_MS)? {
            self.fetch_timeout = parse_timeout(KEY_FETCH_TIMEOUT_MS, &ms)?;
        }
        if let Some(decimals) = db::get_setting(conn, SETTINGS_CATEGORY, KEY_DISPLAY_DECIMALS)?
        {
            self.display_decimals = parse_decimals(KEY_DISPLAY_DECIMALS, &decimals)?;
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(currency) = std::env::var(ENV_CURRENCY) {
            self.local_currency = parse_currency(ENV_CURRENCY, &currency)?;
        }
        if let Ok(ms) = std::env::var(ENV_FETCH_TIMEOUT_MS) {
            self.fetch_timeout = parse_timeout(ENV_FETCH_TIMEOUT_MS, &ms)?;
        }
        if let Ok(decimals) = std::env::var(ENV_DISPLAY_DECIMALS) {
            self.display_decimals = parse_decimals(ENV_DISPLAY_DECIMALS, &decimals)?;
        }
        if let Ok(dir) = std::env::var(ENV_LOG_DIR) {
            if !dir.trim().is_empty() {
                self.log_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    /// Persist the settings-backed fields.
    pub fn save(&self, conn: &Connection) -> Result<()> {
        db::set_setting(conn, SETTINGS_CATEGORY, KEY_LOCAL_CURRENCY, &self.local_currency)?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            KEY_FETCH_TIMEOUT_MS,
            &self.fetch_timeout.as_millis().to_string(),
        )?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            KEY_DISPLAY_DECIMALS,
            &self.display_decimals.to_string(),
        )?;
        Ok(())
    }
}

fn parse_currency(source: &str, raw: &str) -> Result<String> {
    let code = normalize_currency(raw);
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ReconcileError::Config(format!(
            "{source}: '{raw}' is not a three-letter currency code"
        )));
    }
    Ok(code)
}

fn parse_timeout(source: &str, raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ReconcileError::Config(format!(
            "{source}: '{raw}' is not a positive number of milliseconds"
        ))),
    }
}

fn parse_decimals(source: &str, raw: &str) -> Result<u8> {
    match raw.trim().parse::<u8>() {
        Ok(d) if d <= 2 => Ok(d),
        _ => Err(ReconcileError::Config(format!(
            "{source}: '{raw}' must be 0, 1 or 2"
        ))),
    }
}
