//! Cash session lifecycle.
//!
//! A session is opened by an operator at day start with an opening float
//! and a closing float target. During till counting the operator records
//! denomination counts against it. Only notes and floats can be edited
//! afterwards, and deleting a session removes its counts with it. The
//! reconciliation engine never writes here.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState, DATE_FORMAT};
use crate::denominations::{normalize_currency, DenominationCount};
use crate::error::{ReconcileError, Result};
use crate::money::MoneyAmount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSession {
    pub session_id: String,
    pub date: NaiveDate,
    pub opening_float: MoneyAmount,
    pub closing_float_target: MoneyAmount,
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

/// Open the cash session for `date`. Fails with `DuplicateSession` if one
/// already exists for that day.
pub fn create_session(
    db: &DbState,
    date: NaiveDate,
    opening_float: MoneyAmount,
    closing_float_target: MoneyAmount,
    notes: Option<&str>,
) -> Result<CashSession> {
    ensure_float("opening float", opening_float)?;
    ensure_float("closing float target", closing_float_target)?;

    let conn = db.lock()?;
    let date_key = date.format(DATE_FORMAT).to_string();

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM cash_sessions WHERE session_date = ?1",
            params![date_key],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(ReconcileError::DuplicateSession(date_key));
    }

    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO cash_sessions (
            id, session_date, opening_float_cents, closing_float_target_cents,
            notes, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            session_id,
            date_key,
            opening_float.cents(),
            closing_float_target.cents(),
            notes,
            now,
        ],
    )?;

    info!(
        session_id = %session_id,
        date = %date_key,
        opening_float = %opening_float,
        "Cash session opened"
    );

    Ok(CashSession {
        session_id,
        date,
        opening_float,
        closing_float_target,
        notes: notes.map(str::to_string),
    })
}

pub fn get_session(db: &DbState, session_id: &str) -> Result<CashSession> {
    let conn = db.lock()?;
    query_session(&conn, "id = ?1", session_id)?
        .ok_or_else(|| ReconcileError::SessionNotFound(session_id.to_string()))
}

pub fn find_session_by_date(db: &DbState, date: NaiveDate) -> Result<Option<CashSession>> {
    let conn = db.lock()?;
    query_session(&conn, "session_date = ?1", &date.format(DATE_FORMAT).to_string())
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

pub fn update_session_floats(
    db: &DbState,
    session_id: &str,
    opening_float: MoneyAmount,
    closing_float_target: MoneyAmount,
) -> Result<CashSession> {
    ensure_float("opening float", opening_float)?;
    ensure_float("closing float target", closing_float_target)?;
    {
        let conn = db.lock()?;
        let changed = conn.execute(
            "UPDATE cash_sessions SET
                opening_float_cents = ?1,
                closing_float_target_cents = ?2,
                updated_at = ?3
             WHERE id = ?4",
            params![
                opening_float.cents(),
                closing_float_target.cents(),
                Utc::now().to_rfc3339(),
                session_id,
            ],
        )?;
        if changed == 0 {
            return Err(ReconcileError::SessionNotFound(session_id.to_string()));
        }
    }
    info!(session_id = %session_id, "Cash session floats updated");
    get_session(db, session_id)
}

pub fn update_session_notes(
    db: &DbState,
    session_id: &str,
    notes: Option<&str>,
) -> Result<CashSession> {
    {
        let conn = db.lock()?;
        let changed = conn.execute(
            "UPDATE cash_sessions SET notes = ?1, updated_at = ?2 WHERE id = ?3",
            params![notes, Utc::now().to_rfc3339(), session_id],
        )?;
        if changed == 0 {
            return Err(ReconcileError::SessionNotFound(session_id.to_string()));
        }
    }
    get_session(db, session_id)
}

/// Delete a session together with its denomination counts.
pub fn delete_session(db: &DbState, session_id: &str) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute("DELETE FROM cash_sessions WHERE id = ?1", params![session_id])?;
    if changed == 0 {
        return Err(ReconcileError::SessionNotFound(session_id.to_string()));
    }
    info!(session_id = %session_id, "Cash session deleted (counts cascaded)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Denomination counts
// ---------------------------------------------------------------------------

/// Record how many notes/coins of one face value were counted. Recounting
/// the same slot replaces the earlier quantity.
pub fn record_denomination_count(
    db: &DbState,
    session_id: &str,
    currency: &str,
    denomination: MoneyAmount,
    quantity: i64,
) -> Result<DenominationCount> {
    let currency = normalize_currency(currency);
    if quantity < 0 {
        return Err(ReconcileError::InvalidCount(format!(
            "{quantity} x {denomination} {currency} in session {session_id}"
        )));
    }
    if denomination.is_negative() || denomination.is_zero() {
        return Err(ReconcileError::InvalidAmount(format!(
            "denomination {denomination} {currency} must be positive"
        )));
    }
    if currency.is_empty() {
        return Err(ReconcileError::InvalidAmount(
            "denomination count is missing a currency".to_string(),
        ));
    }

    let conn = db.lock()?;
    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM cash_sessions WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(ReconcileError::SessionNotFound(session_id.to_string()));
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO denomination_counts (
            session_id, currency, denomination_cents, quantity, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(session_id, currency, denomination_cents) DO UPDATE SET
            quantity = excluded.quantity,
            updated_at = excluded.updated_at",
        params![session_id, currency, denomination.cents(), quantity, now],
    )?;

    Ok(DenominationCount {
        session_id: session_id.to_string(),
        currency,
        denomination,
        quantity,
    })
}

/// Counts for a session in entry order.
pub fn list_denomination_counts(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<DenominationCount>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, currency, denomination_cents, quantity
         FROM denomination_counts
         WHERE session_id = ?1
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(DenominationCount {
            session_id: row.get(0)?,
            currency: row.get(1)?,
            denomination: MoneyAmount::from_cents(row.get(2)?),
            quantity: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn query_session(
    conn: &Connection,
    where_clause: &str,
    param: &str,
) -> Result<Option<CashSession>> {
    let sql = format!(
        "SELECT id, session_date, opening_float_cents, closing_float_target_cents, notes
         FROM cash_sessions WHERE {where_clause}"
    );
    let session = conn
        .query_row(&sql, params![param], |row| {
            Ok(CashSession {
                session_id: row.get(0)?,
                date: db::date_column(row, 1)?,
                opening_float: MoneyAmount::from_cents(row.get(2)?),
                closing_float_target: MoneyAmount::from_cents(row.get(3)?),
                notes: row.get(4)?,
            })
        })
        .optional()?;
    Ok(session)
}

fn ensure_float(label: &str, amount: MoneyAmount) -> Result<()> {
    if amount.is_negative() {
        return Err(ReconcileError::InvalidAmount(format!(
            "{label} {amount} must not be negative"
        )));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> DbState {
        db::open_in_memory().expect("open in-memory db")
    }

    fn m(s: &str) -> MoneyAmount {
        MoneyAmount::parse(s).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_create_and_fetch_session() {
        let db = test_db();
        let created = create_session(&db, day(2), m("500"), m("450"), Some("busy day")).unwrap();

        let fetched = get_session(&db, &created.session_id).unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.closing_float_target, m("450"));

        let by_date = find_session_by_date(&db, day(2)).unwrap();
        assert_eq!(by_date, Some(created));
        assert_eq!(find_session_by_date(&db, day(3)).unwrap(), None);
    }

    #[test]
    fn test_one_session_per_date() {
        let db = test_db();
        create_session(&db, day(2), m("500"), m("500"), None).unwrap();
        let err = create_session(&db, day(2), m("100"), m("100"), None).unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateSession(d) if d == "2026-03-02"));
    }

    #[test]
    fn test_negative_float_rejected() {
        let db = test_db();
        let err = create_session(&db, day(2), m("-1"), m("0"), None).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAmount(_)));
    }

    #[test]
    fn test_edit_floats_and_notes() {
        let db = test_db();
        let s = create_session(&db, day(2), m("500"), m("500"), None).unwrap();

        let s2 = update_session_floats(&db, &s.session_id, m("480"), m("520")).unwrap();
        assert_eq!(s2.opening_float, m("480"));
        assert_eq!(s2.closing_float_target, m("520"));

        let s3 = update_session_notes(&db, &s.session_id, Some("till 2 jammed")).unwrap();
        assert_eq!(s3.notes.as_deref(), Some("till 2 jammed"));
        assert_eq!(s3.date, day(2));

        let err = update_session_notes(&db, "missing", None).unwrap_err();
        assert!(matches!(err, ReconcileError::SessionNotFound(_)));
    }

    #[test]
    fn test_recount_replaces_quantity() {
        let db = test_db();
        let s = create_session(&db, day(2), m("0"), m("0"), None).unwrap();
        record_denomination_count(&db, &s.session_id, "eur", m("20"), 3).unwrap();
        record_denomination_count(&db, &s.session_id, "EUR", m("20"), 5).unwrap();
        record_denomination_count(&db, &s.session_id, "EUR", m("0.50"), 4).unwrap();

        let conn = db.lock().unwrap();
        let counts = list_denomination_counts(&conn, &s.session_id).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].currency, "EUR");
        assert_eq!(counts[0].quantity, 5);
        assert_eq!(counts[1].denomination, m("0.50"));
    }

    #[test]
    fn test_negative_count_is_invalid_count() {
        let db = test_db();
        let s = create_session(&db, day(2), m("0"), m("0"), None).unwrap();
        let err = record_denomination_count(&db, &s.session_id, "EUR", m("10"), -2).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidCount(_)));
    }

    #[test]
    fn test_count_for_unknown_session() {
        let db = test_db();
        let err = record_denomination_count(&db, "nope", "EUR", m("10"), 1).unwrap_err();
        assert!(matches!(err, ReconcileError::SessionNotFound(_)));
    }

    #[test]
    fn test_delete_cascades_counts() {
        let db = test_db();
        let s = create_session(&db, day(2), m("0"), m("0"), None).unwrap();
        record_denomination_count(&db, &s.session_id, "EUR", m("10"), 1).unwrap();

        delete_session(&db, &s.session_id).unwrap();

        let conn = db.lock().unwrap();
        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM denomination_counts WHERE session_id = ?1",
                params![s.session_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(remaining, 0);
        drop(conn);

        assert!(matches!(
            get_session(&db, &s.session_id).unwrap_err(),
            ReconcileError::SessionNotFound(_)
        ));
    }
}
