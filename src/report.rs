//! Report assembly for the printed cash reconciliation sheet.
//!
//! Pure mapping from the reconciliation result and the raw line items onto
//! the structure the presentation layer renders. The serialized key names
//! (`CountedCash`, `OverShort`, `missingDetails`, ...) are a stability
//! contract with that layer and must not be renamed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::denominations::DenominationTally;
use crate::engine::ReconciliationResult;
use crate::error::Result;
use crate::money::MoneyAmount;
use crate::sessions::CashSession;
use crate::streams::{NormalizedStream, StreamWarning, TransactionLine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DenominationReportRow {
    pub currency: String,
    pub denomination: String,
    pub quantity: i64,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LineReportRow {
    pub id: String,
    pub cash_amount: String,
    pub cheque_amount: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportWarning {
    pub code: String,
    pub record_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CashReport {
    pub session_id: String,
    pub date: String,
    pub currency: String,
    pub opening_float: String,
    pub closing_float_target: String,
    pub notes: Option<String>,

    pub counted_cash: String,
    pub expected_cash: String,
    pub expected_cheques: String,
    pub over_short: String,
    pub receipts_cash_total: String,
    pub receipts_cheque_total: String,
    pub payments_cash_total: String,
    pub payments_cheque_total: String,
    pub cash_invoices_total: String,
    pub amount_to_deliver_cash: String,
    pub difference_vs_registered: String,

    pub other_currency_totals: BTreeMap<String, String>,
    pub denominations: Vec<DenominationReportRow>,
    pub receipts: Vec<LineReportRow>,
    pub payments: Vec<LineReportRow>,
    pub invoices: Vec<LineReportRow>,
    #[serde(rename = "missingDetails")]
    pub missing_details: Vec<String>,
    pub warnings: Vec<ReportWarning>,
    pub generated_at: String,
}

/// Everything the assembler maps from.
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    pub session: &'a CashSession,
    pub currency: &'a str,
    pub result: &'a ReconciliationResult,
    pub tally: &'a DenominationTally,
    pub receipts: &'a NormalizedStream,
    pub payments: &'a NormalizedStream,
    pub invoices: &'a NormalizedStream,
    pub generated_at: DateTime<Utc>,
    pub display_decimals: u8,
}

pub fn assemble_report(inputs: &ReportInputs<'_>) -> CashReport {
    let fmt = |amount: MoneyAmount| amount.format_with(inputs.display_decimals);
    let lines = |stream: &NormalizedStream| -> Vec<LineReportRow> {
        stream
            .lines
            .iter()
            .map(|line: &TransactionLine| LineReportRow {
                id: line.id.clone(),
                cash_amount: fmt(line.cash_amount),
                cheque_amount: fmt(line.cheque_amount),
                label: line.counterparty_label.clone(),
            })
            .collect()
    };
    let result = inputs.result;

    let warnings = [inputs.receipts, inputs.payments, inputs.invoices]
        .into_iter()
        .flat_map(|stream| stream.warnings.iter())
        .map(|w: &StreamWarning| ReportWarning {
            code: w.code.clone(),
            record_id: w.record_id.clone(),
            message: w.message.clone(),
        })
        .collect();

    CashReport {
        session_id: inputs.session.session_id.clone(),
        date: inputs.session.date.format("%Y-%m-%d").to_string(),
        currency: inputs.currency.to_string(),
        opening_float: fmt(inputs.session.opening_float),
        closing_float_target: fmt(inputs.session.closing_float_target),
        notes: inputs.session.notes.clone(),

        counted_cash: fmt(result.counted_cash),
        expected_cash: fmt(result.expected_cash),
        expected_cheques: fmt(result.expected_cheques),
        // Signed-off variances always keep cent precision
        over_short: result.over_short.to_string(),
        receipts_cash_total: fmt(result.receipts_cash_total),
        receipts_cheque_total: fmt(result.receipts_cheque_total),
        payments_cash_total: fmt(result.payments_cash_total),
        payments_cheque_total: fmt(result.payments_cheque_total),
        cash_invoices_total: fmt(result.cash_invoices_total),
        amount_to_deliver_cash: fmt(result.amount_to_deliver_cash),
        difference_vs_registered: result.difference_vs_registered.to_string(),

        other_currency_totals: inputs
            .tally
            .other_currencies(inputs.currency)
            .into_iter()
            .map(|(code, total)| (code, fmt(total)))
            .collect(),
        denominations: inputs
            .tally
            .rows
            .iter()
            .map(|row| DenominationReportRow {
                currency: row.currency.clone(),
                denomination: fmt(row.denomination),
                quantity: row.quantity,
                amount: fmt(row.amount),
            })
            .collect(),
        receipts: lines(inputs.receipts),
        payments: lines(inputs.payments),
        invoices: lines(inputs.invoices),
        missing_details: inputs.invoices.missing_details.clone(),
        warnings,
        generated_at: inputs.generated_at.to_rfc3339(),
    }
}

impl CashReport {
    /// JSON payload handed to the presentation layer.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
