//! Denomination tally: turns counted notes/coins into per-currency totals.
//!
//! Display rows are sorted by currency, then by descending face value, so a
//! printed count sheet is identical for identical input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};
use crate::money::MoneyAmount;

/// One counted slot of the till as entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub session_id: String,
    pub currency: String,
    pub denomination: MoneyAmount,
    pub quantity: i64,
}

/// A counted slot with its computed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationRow {
    pub currency: String,
    pub denomination: MoneyAmount,
    pub quantity: i64,
    pub amount: MoneyAmount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenominationTally {
    pub totals: BTreeMap<String, MoneyAmount>,
    pub rows: Vec<DenominationRow>,
}

/// Trimmed, upper-cased currency code.
pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl DenominationTally {
    pub fn tally(counts: &[DenominationCount]) -> Result<Self> {
        let mut totals: BTreeMap<String, MoneyAmount> = BTreeMap::new();
        let mut rows = Vec::with_capacity(counts.len());

        for count in counts {
            let currency = normalize_currency(&count.currency);
            if count.quantity < 0 {
                return Err(ReconcileError::InvalidCount(format!(
                    "{} x {} {} in session {}",
                    count.quantity, count.denomination, currency, count.session_id
                )));
            }
            if count.denomination.is_negative() {
                return Err(ReconcileError::InvalidAmount(format!(
                    "negative denomination {} {} in session {}",
                    count.denomination, currency, count.session_id
                )));
            }

            let amount = count.denomination.times(count.quantity)?;
            let total = totals.entry(currency.clone()).or_default();
            *total = total.checked_add(amount)?;
            rows.push(DenominationRow {
                currency,
                denomination: count.denomination,
                quantity: count.quantity,
                amount,
            });
        }

        // Stable sort keeps entry order for duplicate slots.
        rows.sort_by(|a, b| {
            a.currency
                .cmp(&b.currency)
                .then_with(|| b.denomination.cmp(&a.denomination))
        });

        Ok(Self { totals, rows })
    }

    /// Counted total for `currency`, or `None` if nothing was counted in it.
    pub fn total_for(&self, currency: &str) -> Option<MoneyAmount> {
        self.totals.get(&normalize_currency(currency)).copied()
    }

    /// Totals for every currency other than `primary`.
    pub fn other_currencies(&self, primary: &str) -> BTreeMap<String, MoneyAmount> {
        let primary = normalize_currency(primary);
        self.totals
            .iter()
            .filter(|(code, _)| **code != primary)
            .map(|(code, total)| (code.clone(), *total))
            .collect()
    }
}
