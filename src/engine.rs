//! Daily cash reconciliation.
//!
//! `reconcile` is a pure function of its arguments: no clock, no I/O, no
//! shared state. The same session and streams always give the same result,
//! so it can be re-run for every report request.
//!
//! ```text
//! expected_cash            = receipts_cash + cash_invoices - payments_cash
//! expected_cheques         = receipts_cheque
//! over_short               = counted_cash - expected_cash
//! amount_to_deliver_cash   = counted_cash - closing_float_target
//! difference_vs_registered = amount_to_deliver_cash - (expected_cash - opening_float)
//! ```
//!
//! The opening float is a standing balance, not a daily flow, so it stays out
//! of `expected_cash`. Payment cheque amounts are reported only.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::money::MoneyAmount;
use crate::sessions::CashSession;
use crate::streams::TransactionLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub counted_cash: MoneyAmount,
    pub expected_cash: MoneyAmount,
    pub expected_cheques: MoneyAmount,
    /// Positive: more cash found than the books predict. Negative: shortage.
    pub over_short: MoneyAmount,
    pub receipts_cash_total: MoneyAmount,
    pub receipts_cheque_total: MoneyAmount,
    pub payments_cash_total: MoneyAmount,
    /// Informational; never part of any other figure.
    pub payments_cheque_total: MoneyAmount,
    pub cash_invoices_total: MoneyAmount,
    pub amount_to_deliver_cash: MoneyAmount,
    /// Non-zero means the float drifted between sessions.
    pub difference_vs_registered: MoneyAmount,
}

/// Reconcile one session.
///
/// `counted_cash` is the denomination total in the session's local
/// currency; `None` means the till was never counted and the session is
/// rejected as `IncompleteSession`. Empty streams contribute zero.
pub fn reconcile(
    session: &CashSession,
    counted_cash: Option<MoneyAmount>,
    receipts: &[TransactionLine],
    payments: &[TransactionLine],
    cash_invoices: &[TransactionLine],
) -> Result<ReconciliationResult> {
    let counted_cash =
        counted_cash.ok_or_else(|| ReconcileError::IncompleteSession(session.session_id.clone()))?;

    let (receipts_cash_total, receipts_cheque_total) = stream_totals("receipt", receipts)?;
    let (payments_cash_total, payments_cheque_total) = stream_totals("payment", payments)?;
    let (cash_invoices_total, _) = stream_totals("invoice", cash_invoices)?;

    let expected_cash = receipts_cash_total
        .checked_add(cash_invoices_total)?
        .checked_sub(payments_cash_total)?;
    let expected_cheques = receipts_cheque_total;
    let over_short = counted_cash.checked_sub(expected_cash)?;
    let amount_to_deliver_cash = counted_cash.checked_sub(session.closing_float_target)?;
    let difference_vs_registered =
        amount_to_deliver_cash.checked_sub(expected_cash.checked_sub(session.opening_float)?)?;

    debug!(
        session_id = %session.session_id,
        date = %session.date,
        counted = %counted_cash,
        expected = %expected_cash,
        over_short = %over_short,
        to_deliver = %amount_to_deliver_cash,
        difference = %difference_vs_registered,
        "Session reconciled"
    );

    Ok(ReconciliationResult {
        counted_cash,
        expected_cash,
        expected_cheques,
        over_short,
        receipts_cash_total,
        receipts_cheque_total,
        payments_cash_total,
        payments_cheque_total,
        cash_invoices_total,
        amount_to_deliver_cash,
        difference_vs_registered,
    })
}

fn stream_totals(kind: &str, lines: &[TransactionLine]) -> Result<(MoneyAmount, MoneyAmount)> {
    let mut cash = MoneyAmount::ZERO;
    let mut cheque = MoneyAmount::ZERO;
    for line in lines {
        if line.cash_amount.is_negative() || line.cheque_amount.is_negative() {
            return Err(ReconcileError::InvalidAmount(format!(
                "{kind} {} has a negative portion (cash {}, cheque {})",
                line.id, line.cash_amount, line.cheque_amount
            )));
        }
        cash = cash.checked_add(line.cash_amount)?;
        cheque = cheque.checked_add(line.cheque_amount)?;
    }
    Ok((cash, cheque))
}
