//! Cash report pipeline.
//!
//! Looks the session up, fetches its denomination counts and the day's
//! receipts, payments and invoices concurrently, runs the adapters and the
//! engine, and assembles the printable report. The whole fetch phase shares
//! one deadline taken from [`ReconcileConfig::fetch_timeout`].

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::config::ReconcileConfig;
use crate::denominations::DenominationTally;
use crate::engine::reconcile;
use crate::error::{ReconcileError, Result};
use crate::report::{assemble_report, CashReport, ReportInputs};
use crate::source::LedgerSource;
use crate::streams::{adapt_cash_invoices, adapt_payments, adapt_receipts};

/// Build the cash report for `session_id`.
///
/// Read-only: nothing is written back to the source. Data problems
/// (`InvalidAmount`, `InvalidCount`, `InvalidInvoiceDiscount`,
/// `IncompleteSession`) are logged as warnings, everything else as errors.
pub async fn generate_cash_report(
    source: Arc<dyn LedgerSource>,
    session_id: &str,
    config: &ReconcileConfig,
) -> Result<CashReport> {
    let outcome = build_report(source, session_id, config).await;
    if let Err(e) = &outcome {
        if e.is_data_integrity() {
            warn!(session_id = %session_id, "Cash report rejected: {e}");
        } else {
            error!(session_id = %session_id, "Cash report failed: {e}");
        }
    }
    outcome
}

async fn build_report(
    source: Arc<dyn LedgerSource>,
    session_id: &str,
    config: &ReconcileConfig,
) -> Result<CashReport> {
    let deadline = Instant::now() + config.fetch_timeout;
    let timed_out = || ReconcileError::FetchTimeout(config.fetch_timeout.as_millis());

    let session = {
        let source = Arc::clone(&source);
        let id = session_id.to_string();
        timeout_at(deadline, run_blocking(move || source.fetch_session(&id)))
            .await
            .map_err(|_| timed_out())??
    };
    let date = session.date;

    let fan_out = async {
        tokio::try_join!(
            run_blocking({
                let source = Arc::clone(&source);
                let id = session.session_id.clone();
                move || source.fetch_denomination_counts(&id)
            }),
            run_blocking({
                let source = Arc::clone(&source);
                move || source.fetch_receipts(date)
            }),
            run_blocking({
                let source = Arc::clone(&source);
                move || source.fetch_payments(date)
            }),
            run_blocking({
                let source = Arc::clone(&source);
                move || source.fetch_cash_invoices(date)
            }),
        )
    };
    let (counts, receipts, payments, invoices) = timeout_at(deadline, fan_out)
        .await
        .map_err(|_| timed_out())??;

    let receipts = adapt_receipts(&receipts, date)?;
    let payments = adapt_payments(&payments, date)?;
    let invoices = adapt_cash_invoices(&invoices, date)?;
    let tally = DenominationTally::tally(&counts)?;

    let result = reconcile(
        &session,
        tally.total_for(&config.local_currency),
        &receipts.lines,
        &payments.lines,
        &invoices.lines,
    )?;

    let report = assemble_report(&ReportInputs {
        session: &session,
        currency: &config.local_currency,
        result: &result,
        tally: &tally,
        receipts: &receipts,
        payments: &payments,
        invoices: &invoices,
        generated_at: Utc::now(),
        display_decimals: config.display_decimals,
    });

    info!(
        session_id = %session.session_id,
        date = %date,
        over_short = %result.over_short,
        missing_details = report.missing_details.len(),
        warnings = report.warnings.len(),
        "Cash report generated"
    );
    Ok(report)
}

/// Run a blocking source read on the blocking pool.
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ReconcileError::FetchTask(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::db::{self, DbState};
    use crate::denominations::DenominationCount;
    use crate::money::MoneyAmount;
    use crate::sessions::{self, CashSession};
    use crate::source::tests::seed_day;
    use crate::source::SqliteLedgerSource;
    use crate::streams::{InvoiceRecord, PaymentRecord, ReceiptRecord};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn cents(value: i64) -> MoneyAmount {
        MoneyAmount::from_cents(value)
    }

    fn config() -> ReconcileConfig {
        ReconcileConfig {
            local_currency: "EUR".to_string(),
            fetch_timeout: Duration::from_secs(5),
            ..ReconcileConfig::default()
        }
    }

    fn open_counted_session(db: &DbState) -> CashSession {
        let session =
            sessions::create_session(db, day(), cents(20_000), cents(20_000), None).unwrap();
        for (face, qty) in [(5_000, 20), (2_000, 10), (1_000, 3)] {
            sessions::record_denomination_count(db, &session.session_id, "EUR", cents(face), qty)
                .unwrap();
        }
        sessions::record_denomination_count(db, &session.session_id, "usd", cents(500), 1)
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_end_to_end_over_short_from_sqlite() {
        let db = Arc::new(db::open_in_memory().unwrap());
        seed_day(&db, "2026-03-02");
        let session = open_counted_session(&db);
        let source: Arc<dyn LedgerSource> = Arc::new(SqliteLedgerSource::new(Arc::clone(&db)));

        let report = generate_cash_report(source, &session.session_id, &config())
            .await
            .unwrap();

        // receipts 300 + invoices 730 - payments 100
        assert_eq!(report.expected_cash, "930.00");
        assert_eq!(report.counted_cash, "1230.00");
        assert_eq!(report.over_short, "300.00");
        assert_eq!(report.expected_cheques, "150.00");
        assert_eq!(report.amount_to_deliver_cash, "1030.00");
        assert_eq!(report.difference_vs_registered, "300.00");
        assert_eq!(report.other_currency_totals.get("USD"), Some(&"5.00".to_string()));
        assert_eq!(report.missing_details, vec!["INV-3".to_string()]);
        assert_eq!(report.invoices.len(), 2);
        assert_eq!(report.receipts.len(), 2);
        assert_eq!(report.denominations.len(), 4);
    }

    #[tokio::test]
    async fn test_pipeline_matches_direct_calls() {
        let db = Arc::new(db::open_in_memory().unwrap());
        seed_day(&db, "2026-03-02");
        let session = open_counted_session(&db);
        let sqlite = SqliteLedgerSource::new(Arc::clone(&db));

        let counts = sqlite
            .fetch_denomination_counts(&session.session_id)
            .unwrap();
        let tally = DenominationTally::tally(&counts).unwrap();
        let receipts = adapt_receipts(&sqlite.fetch_receipts(day()).unwrap(), day()).unwrap();
        let payments = adapt_payments(&sqlite.fetch_payments(day()).unwrap(), day()).unwrap();
        let invoices =
            adapt_cash_invoices(&sqlite.fetch_cash_invoices(day()).unwrap(), day()).unwrap();
        let direct = reconcile(
            &session,
            tally.total_for("EUR"),
            &receipts.lines,
            &payments.lines,
            &invoices.lines,
        )
        .unwrap();

        let source: Arc<dyn LedgerSource> = Arc::new(sqlite);
        let report = generate_cash_report(source, &session.session_id, &config())
            .await
            .unwrap();
        assert_eq!(report.over_short, direct.over_short.to_string());
        assert_eq!(report.expected_cash, direct.expected_cash.to_string());
        assert_eq!(
            report.difference_vs_registered,
            direct.difference_vs_registered.to_string()
        );
    }

    #[tokio::test]
    async fn test_uncounted_session_is_incomplete() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let session =
            sessions::create_session(&db, day(), cents(10_000), cents(10_000), None).unwrap();
        sessions::record_denomination_count(&db, &session.session_id, "USD", cents(2_000), 2)
            .unwrap();
        let source: Arc<dyn LedgerSource> = Arc::new(SqliteLedgerSource::new(db));

        let err = generate_cash_report(source, &session.session_id, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::IncompleteSession(id) if id == session.session_id));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let source: Arc<dyn LedgerSource> = Arc::new(SqliteLedgerSource::new(db));

        let err = generate_cash_report(source, "nope", &config()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_discount_above_subtotal_aborts_report() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let session = open_counted_session(&db);
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO invoices (id, invoice_date, payment_status, discount)
                    VALUES ('INV-9', '2026-03-02', 'fully_cash', 60.0);
                 INSERT INTO invoice_lines (invoice_id, description, quantity, unit_price)
                    VALUES ('INV-9', 'Gloves', 1, 50.0);",
            )
            .unwrap();
        }
        let source: Arc<dyn LedgerSource> = Arc::new(SqliteLedgerSource::new(db));

        let err = generate_cash_report(source, &session.session_id, &config())
            .await
            .unwrap_err();
        assert!(err.is_data_integrity());
        assert!(matches!(err, ReconcileError::InvalidInvoiceDiscount { .. }));
    }

    // -----------------------------------------------------------------------
    // Scripted sources
    // -----------------------------------------------------------------------

    /// In-memory source with an optional delay or panic on the receipts read.
    struct ScriptedSource {
        receipts_delay: Duration,
        panic_on_receipts: bool,
    }

    impl ScriptedSource {
        fn session() -> CashSession {
            CashSession {
                session_id: "S-1".to_string(),
                date: day(),
                opening_float: MoneyAmount::ZERO,
                closing_float_target: MoneyAmount::ZERO,
                notes: None,
            }
        }
    }

    impl LedgerSource for ScriptedSource {
        fn fetch_session(&self, _session_id: &str) -> Result<CashSession> {
            Ok(Self::session())
        }

        fn fetch_denomination_counts(&self, session_id: &str) -> Result<Vec<DenominationCount>> {
            Ok(vec![DenominationCount {
                session_id: session_id.to_string(),
                currency: "EUR".to_string(),
                denomination: cents(1_000),
                quantity: 5,
            }])
        }

        fn fetch_receipts(&self, date: NaiveDate) -> Result<Vec<ReceiptRecord>> {
            if self.panic_on_receipts {
                panic!("receipts backend crashed");
            }
            std::thread::sleep(self.receipts_delay);
            Ok(vec![ReceiptRecord {
                id: "R-1".to_string(),
                date,
                cash_amount: cents(5_000),
                cheque_amount: MoneyAmount::ZERO,
                customer_name: "Walk-in".to_string(),
            }])
        }

        fn fetch_payments(&self, _date: NaiveDate) -> Result<Vec<PaymentRecord>> {
            Ok(Vec::new())
        }

        fn fetch_cash_invoices(&self, _date: NaiveDate) -> Result<Vec<InvoiceRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_scripted_source_balances() {
        let source: Arc<dyn LedgerSource> = Arc::new(ScriptedSource {
            receipts_delay: Duration::ZERO,
            panic_on_receipts: false,
        });
        let report = generate_cash_report(source, "S-1", &config()).await.unwrap();
        assert_eq!(report.over_short, "0.00");
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let source: Arc<dyn LedgerSource> = Arc::new(ScriptedSource {
            receipts_delay: Duration::from_millis(400),
            panic_on_receipts: false,
        });
        let config = ReconcileConfig {
            fetch_timeout: Duration::from_millis(50),
            ..config()
        };

        let err = generate_cash_report(source, "S-1", &config).await.unwrap_err();
        assert!(matches!(err, ReconcileError::FetchTimeout(50)));
        assert!(!err.is_data_integrity());
    }

    #[tokio::test]
    async fn test_panicking_read_is_fetch_task_error() {
        let source: Arc<dyn LedgerSource> = Arc::new(ScriptedSource {
            receipts_delay: Duration::ZERO,
            panic_on_receipts: true,
        });

        let err = generate_cash_report(source, "S-1", &config()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::FetchTask(_)));
    }
}
