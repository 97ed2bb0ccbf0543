//! Collaborator reads for reconciliation.
//!
//! The engine never touches storage. Everything it needs is fetched through
//! [`LedgerSource`]: the session itself, its denomination counts, and the
//! receipts, payments and cash invoices for the session's date. All reads
//! are independent, so the report pipeline issues them concurrently.

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::db::{self, DbState, DATE_FORMAT};
use crate::denominations::DenominationCount;
use crate::error::{ReconcileError, Result};
use crate::money::MoneyAmount;
use crate::sessions::{self, CashSession};
use crate::streams::{
    InvoiceLine, InvoiceRecord, InvoiceSettlement, PaymentRecord, ReceiptRecord,
};

/// Read-only access to the data a reconciliation consumes.
///
/// Implementations are called from blocking worker threads and must be
/// shareable across them.
pub trait LedgerSource: Send + Sync {
    fn fetch_session(&self, session_id: &str) -> Result<CashSession>;

    fn fetch_denomination_counts(&self, session_id: &str) -> Result<Vec<DenominationCount>>;

    fn fetch_receipts(&self, date: NaiveDate) -> Result<Vec<ReceiptRecord>>;

    fn fetch_payments(&self, date: NaiveDate) -> Result<Vec<PaymentRecord>>;

    /// Invoices dated `date`, each with the result of its detail lookup.
    fn fetch_cash_invoices(&self, date: NaiveDate) -> Result<Vec<InvoiceRecord>>;
}

/// [`LedgerSource`] over the local SQLite database.
pub struct SqliteLedgerSource {
    db: Arc<DbState>,
}

impl SqliteLedgerSource {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

impl LedgerSource for SqliteLedgerSource {
    fn fetch_session(&self, session_id: &str) -> Result<CashSession> {
        sessions::get_session(&self.db, session_id)
    }

    fn fetch_denomination_counts(&self, session_id: &str) -> Result<Vec<DenominationCount>> {
        let conn = self.db.lock()?;
        let counts = sessions::list_denomination_counts(&conn, session_id)?;
        debug!(session_id = %session_id, rows = counts.len(), "Fetched denomination counts");
        Ok(counts)
    }

    fn fetch_receipts(&self, date: NaiveDate) -> Result<Vec<ReceiptRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, receipt_date, cash_amount, cheque_amount, customer_name
             FROM receipts WHERE receipt_date = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![date_key(date)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                db::date_column(row, 1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            let (id, date, cash, cheque, customer_name) = row?;
            receipts.push(ReceiptRecord {
                cash_amount: column_amount("receipt", &id, cash)?,
                cheque_amount: column_amount("receipt", &id, cheque)?,
                id,
                date,
                customer_name,
            });
        }
        debug!(date = %date, rows = receipts.len(), "Fetched receipts");
        Ok(receipts)
    }

    fn fetch_payments(&self, date: NaiveDate) -> Result<Vec<PaymentRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, payment_date, cash_amount, cheque_amount, payee_name
             FROM payments WHERE payment_date = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![date_key(date)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                db::date_column(row, 1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut payments = Vec::new();
        for row in rows {
            let (id, date, cash, cheque, payee_name) = row?;
            payments.push(PaymentRecord {
                cash_amount: column_amount("payment", &id, cash)?,
                cheque_amount: column_amount("payment", &id, cheque)?,
                id,
                date,
                payee_name,
            });
        }
        debug!(date = %date, rows = payments.len(), "Fetched payments");
        Ok(payments)
    }

    fn fetch_cash_invoices(&self, date: NaiveDate) -> Result<Vec<InvoiceRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, invoice_date, payment_status, discount
             FROM invoices WHERE invoice_date = ?1 ORDER BY id",
        )?;
        let headers = stmt
            .query_map(params![date_key(date)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    db::date_column(row, 1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut invoices = Vec::with_capacity(headers.len());
        for (id, date, status, discount) in headers {
            let lines = fetch_invoice_lines(&conn, &id)?;
            invoices.push(InvoiceRecord {
                discount: column_amount("invoice", &id, discount)?,
                settlement: InvoiceSettlement::from_status(&status),
                id,
                date,
                lines,
            });
        }
        debug!(date = %date, rows = invoices.len(), "Fetched invoices");
        Ok(invoices)
    }
}

fn fetch_invoice_lines(conn: &Connection, invoice_id: &str) -> Result<Vec<InvoiceLine>> {
    let mut stmt = conn.prepare(
        "SELECT description, quantity, unit_price
         FROM invoice_lines WHERE invoice_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![invoice_id], |row: &Row<'_>| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut lines = Vec::new();
    for row in rows {
        let (description, quantity, unit_price) = row?;
        lines.push(InvoiceLine {
            description,
            quantity,
            unit_price: column_amount("invoice line of", invoice_id, unit_price)?,
        });
    }
    Ok(lines)
}

fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Convert a REAL amount column, naming the record in the error.
fn column_amount(kind: &str, id: &str, value: f64) -> Result<MoneyAmount> {
    MoneyAmount::from_f64(value).map_err(|e| match e {
        ReconcileError::InvalidAmount(detail) => {
            ReconcileError::InvalidAmount(format!("{kind} {id}: {detail}"))
        }
        other => other,
    })
}
