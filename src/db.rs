//! Local SQLite database layer for cash session reconciliation.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings helpers,
//! and the shared connection state used by the session store and the SQLite
//! ledger source.
//!
//! Session and denomination money is stored as integer cents. The receipt,
//! payment and invoice tables are written by the sales and AR/AP subsystems
//! and keep their REAL amount columns; they are only ever read here.

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::error::{ReconcileError, Result};

/// Shared database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Wrap an already-configured connection (in-memory databases, tests).
    pub fn from_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ReconcileError::LockPoisoned)
    }
}

/// Storage format of every date column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/cashbook.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("cashbook.db");
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path)?;
    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open an in-memory database with the same pragmas and schema.
pub fn open_in_memory() -> Result<DbState> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    DbState::from_connection(conn, PathBuf::from(":memory:"))
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32, sql: &str) -> Result<()> {
    conn.execute_batch(sql).map_err(|source| {
        error!("Migration v{version} failed: {source}");
        ReconcileError::Migration { version, source }
    })
}

/// Migration v1: settings, cash sessions and denomination counts.
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply_migration(
        conn,
        1,
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- one cash session per business date
        CREATE TABLE IF NOT EXISTS cash_sessions (
            id TEXT PRIMARY KEY,
            session_date TEXT NOT NULL UNIQUE,
            opening_float_cents INTEGER NOT NULL DEFAULT 0,
            closing_float_target_cents INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- till counts, removed with their session
        CREATE TABLE IF NOT EXISTS denomination_counts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES cash_sessions(id) ON DELETE CASCADE,
            currency TEXT NOT NULL,
            denomination_cents INTEGER NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(session_id, currency, denomination_cents)
        );
        CREATE INDEX IF NOT EXISTS idx_denomination_counts_session
            ON denomination_counts(session_id);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    info!("Applied migration v1 (settings, cash sessions, denomination counts)");
    Ok(())
}

/// Migration v2: receipt, payment and invoice tables owned by the sales and
/// AR/AP subsystems.
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply_migration(
        conn,
        2,
        "
        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY,
            receipt_date TEXT NOT NULL,
            customer_name TEXT NOT NULL DEFAULT '',
            cash_amount REAL NOT NULL DEFAULT 0,
            cheque_amount REAL NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_receipts_date ON receipts(receipt_date);

        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            payment_date TEXT NOT NULL,
            payee_name TEXT NOT NULL DEFAULT '',
            cash_amount REAL NOT NULL DEFAULT 0,
            cheque_amount REAL NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_payments_date ON payments(payment_date);

        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            invoice_date TEXT NOT NULL,
            payment_status TEXT NOT NULL DEFAULT 'unpaid',
            discount REAL NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_invoices_date ON invoices(invoice_date);

        CREATE TABLE IF NOT EXISTS invoice_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
            description TEXT NOT NULL DEFAULT '',
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;

    info!("Applied migration v2 (receipts, payments, invoices)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value. `None` only when the key is not set; any
/// other failure is returned.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT setting_value FROM local_settings
             WHERE setting_category = ?1 AND setting_key = ?2",
            params![category, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )?;
    Ok(())
}

/// Read a `YYYY-MM-DD` text column as a date.
pub fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ===========================================================================
// Tests
// ===========================================================================
