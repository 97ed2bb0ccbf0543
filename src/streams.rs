//! Transaction stream adapters.
//!
//! Receipts, payments and cash invoices are recorded by unrelated
//! subsystems. Each adapter keeps the records for the target date and maps
//! them onto one [`TransactionLine`] shape so the engine can sum them
//! without knowing where they came from.
//!
//! Data-quality problems that should not block a reconciliation (a cheque
//! component on an outgoing payment, an invoice whose detail lookup came
//! back empty) are returned as [`StreamWarning`]s next to the lines.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};
use crate::money::MoneyAmount;

pub const WARN_PAYMENT_CHEQUE: &str = "payment_cheque_component";
pub const WARN_INVOICE_MISSING_DETAILS: &str = "invoice_missing_details";

/// Uniform shape every stream is normalized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub id: String,
    pub cash_amount: MoneyAmount,
    pub cheque_amount: MoneyAmount,
    pub counterparty_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub id: String,
    pub date: NaiveDate,
    pub cash_amount: MoneyAmount,
    pub cheque_amount: MoneyAmount,
    pub customer_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub date: NaiveDate,
    pub cash_amount: MoneyAmount,
    pub cheque_amount: MoneyAmount,
    pub payee_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSettlement {
    FullyCash,
    PartiallyPaid,
    NonCash,
    Unpaid,
}

impl InvoiceSettlement {
    /// Map a stored payment status. Unknown values are treated as unpaid so
    /// they never reach the cash total.
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "fully_cash" | "paid_cash" | "cash" => Self::FullyCash,
            "partial" | "partially_paid" => Self::PartiallyPaid,
            "card" | "transfer" | "non_cash" => Self::NonCash,
            _ => Self::Unpaid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: i64,
    pub unit_price: MoneyAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: String,
    pub date: NaiveDate,
    pub settlement: InvoiceSettlement,
    pub discount: MoneyAmount,
    /// Result of the detail lookup; empty when the lookup found nothing.
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamWarning {
    pub code: String,
    pub record_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedStream {
    pub lines: Vec<TransactionLine>,
    /// Invoice ids whose line-item detail was missing.
    pub missing_details: Vec<String>,
    pub warnings: Vec<StreamWarning>,
}

impl NormalizedStream {
    pub fn cash_total(&self) -> Result<MoneyAmount> {
        MoneyAmount::checked_sum(self.lines.iter().map(|l| l.cash_amount))
    }

    pub fn cheque_total(&self) -> Result<MoneyAmount> {
        MoneyAmount::checked_sum(self.lines.iter().map(|l| l.cheque_amount))
    }
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

pub fn adapt_receipts(
    records: &[ReceiptRecord],
    target_date: NaiveDate,
) -> Result<NormalizedStream> {
    let mut stream = NormalizedStream::default();
    for receipt in records.iter().filter(|r| r.date == target_date) {
        ensure_non_negative("receipt", &receipt.id, receipt.cash_amount, receipt.cheque_amount)?;
        stream.lines.push(TransactionLine {
            id: receipt.id.clone(),
            cash_amount: receipt.cash_amount,
            cheque_amount: receipt.cheque_amount,
            counterparty_label: receipt.customer_name.clone(),
        });
    }
    debug!(date = %target_date, receipts = stream.lines.len(), "Receipts normalized");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Payments are cash leaving the till. A cheque component is carried on the
/// line for display only and flagged; it is never taken out of cash.
pub fn adapt_payments(
    records: &[PaymentRecord],
    target_date: NaiveDate,
) -> Result<NormalizedStream> {
    let mut stream = NormalizedStream::default();
    for payment in records.iter().filter(|p| p.date == target_date) {
        ensure_non_negative("payment", &payment.id, payment.cash_amount, payment.cheque_amount)?;
        if !payment.cheque_amount.is_zero() {
            warn!(
                payment_id = %payment.id,
                cheque = %payment.cheque_amount,
                "Payment carries a cheque component; reported but not deducted"
            );
            stream.warnings.push(StreamWarning {
                code: WARN_PAYMENT_CHEQUE.to_string(),
                record_id: payment.id.clone(),
                message: format!(
                    "payment {} has a cheque component of {} that is not deducted from cash",
                    payment.id, payment.cheque_amount
                ),
            });
        }
        stream.lines.push(TransactionLine {
            id: payment.id.clone(),
            cash_amount: payment.cash_amount,
            cheque_amount: payment.cheque_amount,
            counterparty_label: payment.payee_name.clone(),
        });
    }
    debug!(date = %target_date, payments = stream.lines.len(), "Payments normalized");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Cash invoices
// ---------------------------------------------------------------------------

/// `subtotal - discount`; a discount above the subtotal is rejected, not
/// clamped.
pub fn invoice_calc_value(
    invoice_id: &str,
    subtotal: MoneyAmount,
    discount: MoneyAmount,
) -> Result<MoneyAmount> {
    if subtotal.is_negative() || discount.is_negative() {
        return Err(ReconcileError::InvalidAmount(format!(
            "invoice {invoice_id}: subtotal {subtotal} and discount {discount} must be non-negative"
        )));
    }
    if discount > subtotal {
        return Err(ReconcileError::InvalidInvoiceDiscount {
            invoice_id: invoice_id.to_string(),
            subtotal,
            discount,
        });
    }
    subtotal.checked_sub(discount)
}

fn invoice_subtotal(invoice: &InvoiceRecord) -> Result<MoneyAmount> {
    let mut subtotal = MoneyAmount::ZERO;
    for line in &invoice.lines {
        if line.quantity < 0 {
            return Err(ReconcileError::InvalidCount(format!(
                "invoice {} line '{}' has quantity {}",
                invoice.id, line.description, line.quantity
            )));
        }
        subtotal = subtotal.checked_add(line.unit_price.times(line.quantity)?)?;
    }
    Ok(subtotal)
}

pub fn adapt_cash_invoices(
    records: &[InvoiceRecord],
    target_date: NaiveDate,
) -> Result<NormalizedStream> {
    let mut stream = NormalizedStream::default();
    let same_day_cash = records
        .iter()
        .filter(|i| i.date == target_date && i.settlement == InvoiceSettlement::FullyCash);

    for invoice in same_day_cash {
        let calc_value = if invoice.lines.is_empty() {
            warn!(invoice_id = %invoice.id, "Invoice detail lookup returned no lines");
            stream.missing_details.push(invoice.id.clone());
            stream.warnings.push(StreamWarning {
                code: WARN_INVOICE_MISSING_DETAILS.to_string(),
                record_id: invoice.id.clone(),
                message: format!("invoice {} has no line items; counted as 0.00", invoice.id),
            });
            MoneyAmount::ZERO
        } else {
            let subtotal = invoice_subtotal(invoice)?;
            invoice_calc_value(&invoice.id, subtotal, invoice.discount)?
        };

        stream.lines.push(TransactionLine {
            id: invoice.id.clone(),
            cash_amount: calc_value,
            cheque_amount: MoneyAmount::ZERO,
            counterparty_label: invoice.id.clone(),
        });
    }
    debug!(
        date = %target_date,
        invoices = stream.lines.len(),
        missing_details = stream.missing_details.len(),
        "Cash invoices normalized"
    );
    Ok(stream)
}

fn ensure_non_negative(
    kind: &str,
    id: &str,
    cash: MoneyAmount,
    cheque: MoneyAmount,
) -> Result<()> {
    if cash.is_negative() || cheque.is_negative() {
        return Err(ReconcileError::InvalidAmount(format!(
            "{kind} {id} has negative cash {cash} or cheque {cheque}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn m(s: &str) -> MoneyAmount {
        MoneyAmount::parse(s).unwrap()
    }

    fn invoice(
        id: &str,
        date: NaiveDate,
        lines: Vec<InvoiceLine>,
        discount: &str,
    ) -> InvoiceRecord {
        InvoiceRecord {
            id: id.to_string(),
            date,
            settlement: InvoiceSettlement::FullyCash,
            discount: m(discount),
            lines,
        }
    }

    fn line(quantity: i64, price: &str) -> InvoiceLine {
        InvoiceLine {
            description: "item".to_string(),
            quantity,
            unit_price: m(price),
        }
    }

    #[test]
    fn test_receipts_keep_target_date_only() {
        let records = vec![
            ReceiptRecord {
                id: "R-1".into(),
                date: day(2),
                cash_amount: m("120"),
                cheque_amount: m("30"),
                customer_name: "Acme".into(),
            },
            ReceiptRecord {
                id: "R-2".into(),
                date: day(3),
                cash_amount: m("999"),
                cheque_amount: MoneyAmount::ZERO,
                customer_name: "Other day".into(),
            },
        ];
        let stream = adapt_receipts(&records, day(2)).unwrap();
        assert_eq!(stream.lines.len(), 1);
        assert_eq!(stream.lines[0].counterparty_label, "Acme");
        assert_eq!(stream.cash_total().unwrap(), m("120"));
        assert_eq!(stream.cheque_total().unwrap(), m("30"));
    }

    #[test]
    fn test_negative_receipt_amount_is_rejected() {
        let records = vec![ReceiptRecord {
            id: "R-9".into(),
            date: day(2),
            cash_amount: m("-1"),
            cheque_amount: MoneyAmount::ZERO,
            customer_name: "x".into(),
        }];
        let err = adapt_receipts(&records, day(2)).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAmount(_)));
    }

    #[test]
    fn test_payment_cheque_component_warns_but_is_kept() {
        let records = vec![PaymentRecord {
            id: "P-1".into(),
            date: day(2),
            cash_amount: m("100"),
            cheque_amount: m("25"),
            payee_name: "Supplier".into(),
        }];
        let stream = adapt_payments(&records, day(2)).unwrap();
        assert_eq!(stream.cash_total().unwrap(), m("100"));
        assert_eq!(stream.cheque_total().unwrap(), m("25"));
        assert_eq!(stream.warnings.len(), 1);
        assert_eq!(stream.warnings[0].code, WARN_PAYMENT_CHEQUE);
        assert_eq!(stream.warnings[0].record_id, "P-1");
    }

    #[test]
    fn test_payments_keep_target_date_only() {
        let records = vec![
            PaymentRecord {
                id: "P-1".into(),
                date: day(2),
                cash_amount: m("40"),
                cheque_amount: MoneyAmount::ZERO,
                payee_name: "Window cleaner".into(),
            },
            PaymentRecord {
                id: "P-2".into(),
                date: day(1),
                cash_amount: m("700"),
                cheque_amount: m("15"),
                payee_name: "Yesterday".into(),
            },
        ];
        let stream = adapt_payments(&records, day(2)).unwrap();
        assert_eq!(stream.lines.len(), 1);
        assert_eq!(stream.lines[0].id, "P-1");
        assert_eq!(stream.cash_total().unwrap(), m("40"));
        assert_eq!(stream.cheque_total().unwrap(), MoneyAmount::ZERO);
        // the other-day cheque is not flagged either
        assert!(stream.warnings.is_empty());
    }

    #[test]
    fn test_discount_equal_to_subtotal_is_zero() {
        assert_eq!(
            invoice_calc_value("I-1", m("150"), m("150")).unwrap(),
            MoneyAmount::ZERO
        );
    }

    #[test]
    fn test_discount_one_cent_over_subtotal_fails() {
        let err = invoice_calc_value("I-1", m("150"), m("150.01")).unwrap_err();
        match err {
            ReconcileError::InvalidInvoiceDiscount {
                invoice_id,
                subtotal,
                discount,
            } => {
                assert_eq!(invoice_id, "I-1");
                assert_eq!(subtotal, m("150"));
                assert_eq!(discount, m("150.01"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_cash_invoices_filter_status_and_date() {
        let mut partial = invoice("I-2", day(2), vec![line(1, "80")], "0");
        partial.settlement = InvoiceSettlement::PartiallyPaid;
        let mut card = invoice("I-4", day(2), vec![line(1, "35")], "0");
        card.settlement = InvoiceSettlement::NonCash;
        let mut unpaid = invoice("I-5", day(2), vec![line(3, "20")], "0");
        unpaid.settlement = InvoiceSettlement::Unpaid;
        let records = vec![
            invoice("I-1", day(2), vec![line(2, "50"), line(1, "60")], "10"),
            partial,
            invoice("I-3", day(1), vec![line(1, "500")], "0"),
            card,
            unpaid,
        ];
        let stream = adapt_cash_invoices(&records, day(2)).unwrap();
        assert_eq!(stream.lines.len(), 1);
        assert_eq!(stream.lines[0].id, "I-1");
        assert_eq!(stream.lines[0].counterparty_label, "I-1");
        assert_eq!(stream.cash_total().unwrap(), m("150"));
        assert!(stream.missing_details.is_empty());
    }

    #[test]
    fn test_missing_invoice_details_degrade_to_zero() {
        let records = vec![
            invoice("I-1", day(2), vec![line(1, "40")], "0"),
            invoice("I-EMPTY", day(2), vec![], "5"),
        ];
        let stream = adapt_cash_invoices(&records, day(2)).unwrap();
        assert_eq!(stream.lines.len(), 2);
        assert_eq!(stream.lines[1].cash_amount, MoneyAmount::ZERO);
        assert_eq!(stream.missing_details, vec!["I-EMPTY".to_string()]);
        assert_eq!(stream.warnings[0].code, WARN_INVOICE_MISSING_DETAILS);
        assert_eq!(stream.cash_total().unwrap(), m("40"));
    }

    #[test]
    fn test_overflowing_invoice_lines_are_invalid_amount() {
        let huge = MoneyAmount::from_cents(i64::MAX / 2 + 1);
        let lines = vec![
            InvoiceLine {
                description: "a".to_string(),
                quantity: 1,
                unit_price: huge,
            },
            InvoiceLine {
                description: "b".to_string(),
                quantity: 1,
                unit_price: huge,
            },
        ];
        let records = vec![invoice("I-1", day(2), lines, "0")];
        let err = adapt_cash_invoices(&records, day(2)).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAmount(_)));
    }

    #[test]
    fn test_negative_invoice_line_quantity_is_invalid_count() {
        let records = vec![invoice("I-1", day(2), vec![line(-1, "40")], "0")];
        let err = adapt_cash_invoices(&records, day(2)).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidCount(_)));
    }

    #[test]
    fn test_settlement_from_status() {
        assert_eq!(
            InvoiceSettlement::from_status(" Fully_Cash "),
            InvoiceSettlement::FullyCash
        );
        assert_eq!(
            InvoiceSettlement::from_status("partial"),
            InvoiceSettlement::PartiallyPaid
        );
        assert_eq!(InvoiceSettlement::from_status("card"), InvoiceSettlement::NonCash);
        assert_eq!(InvoiceSettlement::from_status("???"), InvoiceSettlement::Unpaid);
    }
}
