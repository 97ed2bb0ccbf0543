//! The Small POS - Daily cash session reconciliation
//!
//! Reconciles the physically counted till against the day's recorded cash
//! receipts, cash payments and cash-settled invoices, and assembles the
//! printable cash report. Sessions and denomination counts are kept in the
//! local SQLite database; the transaction streams are read through
//! [`LedgerSource`].

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod cash_report;
pub mod config;
pub mod db;
pub mod denominations;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod money;
pub mod report;
pub mod sessions;
pub mod source;
pub mod streams;

pub use cash_report::generate_cash_report;
pub use config::ReconcileConfig;
pub use denominations::{DenominationCount, DenominationRow, DenominationTally};
pub use engine::{reconcile, ReconciliationResult};
pub use error::{ReconcileError, Result};
pub use money::MoneyAmount;
pub use report::{assemble_report, CashReport, ReportInputs};
pub use sessions::CashSession;
pub use source::{LedgerSource, SqliteLedgerSource};
pub use streams::{
    adapt_cash_invoices, adapt_payments, adapt_receipts, invoice_calc_value, NormalizedStream,
    StreamWarning, TransactionLine,
};

// ============================================================================
// Logging
// ============================================================================

/// Initialize structured logging (console + daily rolling file).
///
/// `RUST_LOG` wins over `config.log_filter`. The returned guard flushes the
/// file writer when dropped, so the caller keeps it for the process lifetime.
pub fn init_logging(config: &ReconcileConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ReconcileError::Config(format!("log filter '{}': {e}", config.log_filter)))?;

    // Prune before the appender opens today's file
    diagnostics::prune_old_logs(&config.log_dir);
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender =
        tracing_appender::rolling::daily(&config.log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ReconcileError::Config(format!("logging already initialized: {e}")))?;

    info!(
        "Cash reconciliation v{} logging to {}",
        env!("CARGO_PKG_VERSION"),
        config.log_dir.display()
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_dir_and_refuses_second_init() {
        let dir = std::env::temp_dir().join(format!("cashbook-init-{}", uuid::Uuid::new_v4()));
        let config = ReconcileConfig {
            log_dir: dir.clone(),
            ..ReconcileConfig::default()
        };

        let guard = init_logging(&config).unwrap();
        assert!(dir.is_dir());

        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));

        drop(guard);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
