use clap::Parser;
use coursepay::application::engine::PaymentEngine;
use coursepay::config::EngineConfig;
use coursepay::domain::earnings::PayoutDecision;
use coursepay::domain::ports::Stores;
use coursepay::error::EngineError;
use coursepay::infrastructure::events::LogPublisher;
use coursepay::infrastructure::in_memory;
#[cfg(feature = "storage-rocksdb")]
use coursepay::infrastructure::rocksdb::RocksDBStore;
use coursepay::interfaces::csv::activity_reader::{Activity, ActivityReader};
use coursepay::interfaces::csv::catalog_reader::CatalogReader;
use coursepay::interfaces::csv::enrollment_writer::EnrollmentWriter;
use coursepay::telemetry;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Course catalog CSV file (course,tutor,price,currency,status)
    catalog: PathBuf,

    /// Payment activity CSV file, replayed in order
    activity: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` must be loaded before the log filter reads COURSEPAY_LOG.
    dotenvy::dotenv().ok();
    telemetry::init_tracing();
    let cli = Cli::parse();

    let config = EngineConfig::from_env().into_diagnostic()?;
    let stores = open_stores(cli.db_path)?;
    let engine = PaymentEngine::new(stores, Arc::new(LogPublisher), config);

    let catalog = File::open(cli.catalog).into_diagnostic()?;
    for (index, course) in CatalogReader::new(catalog).courses().enumerate() {
        match course {
            Ok(course) => engine.register_course(course).await.into_diagnostic()?,
            Err(e) => error!(row = index + 1, error = %e, "skipping catalog row"),
        }
    }

    let activity = File::open(cli.activity).into_diagnostic()?;
    for (index, activity) in ActivityReader::new(activity).activities().enumerate() {
        let outcome = match activity {
            Ok(activity) => replay(&engine, activity).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            error!(row = index + 1, error = %e, "activity row failed");
        }
    }

    let enrollments = engine.enrollments().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = EnrollmentWriter::new(stdout.lock());
    writer.write_enrollments(enrollments).into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        Some(path) => Ok(RocksDBStore::open(path).into_diagnostic()?.stores()),
        None => Ok(in_memory::stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if let Some(path) = db_path {
        tracing::warn!(
            path = %path.display(),
            "Persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(in_memory::stores())
}

async fn replay(engine: &PaymentEngine, activity: Activity) -> coursepay::error::Result<()> {
    match activity {
        Activity::Initialize(request) => {
            let payment = engine.initialize_payment(request).await?;
            info!(reference = %payment.reference, "checkout opened");
        }
        Activity::Confirm(confirmation) => {
            let receipt = engine.confirm_payment(confirmation).await?;
            if let Some(next) = receipt.next_installment {
                info!(reference = %next.reference, amount = %next.gross_amount, "installment due");
            }
        }
        Activity::Sweep { at } => {
            match at {
                Some(at) => engine.sweep_overdue_at(at).await?,
                None => engine.sweep_overdue().await?,
            };
        }
        Activity::Reactivate { learner, course } => {
            engine.reactivate_enrollment(&learner, &course).await?;
        }
        Activity::Cancel { learner, course } => {
            engine.cancel_enrollment(&learner, &course).await?;
        }
        Activity::RequestPayout { tutor, amount } => {
            engine.request_payout(&tutor, amount).await?;
        }
        Activity::ApprovePayout { tutor } => {
            let pending = engine
                .pending_payout(&tutor)
                .await?
                .ok_or_else(|| EngineError::Validation(format!("no pending payout for {}", tutor)))?;
            engine.process_payout(pending.id, PayoutDecision::Approve).await?;
        }
        Activity::RejectPayout { tutor } => {
            let pending = engine
                .pending_payout(&tutor)
                .await?
                .ok_or_else(|| EngineError::Validation(format!("no pending payout for {}", tutor)))?;
            engine
                .process_payout(
                    pending.id,
                    PayoutDecision::Reject {
                        reason: "rejected during batch replay".to_string(),
                    },
                )
                .await?;
        }
    }
    Ok(())
}
