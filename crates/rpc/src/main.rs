//! Settle CLI - Main entry point

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use settle_core::{Category, CreatorTier, Currency, MinorUnits};
use settle_ledger::SaleEvent;
use settle_payout::BatchStatus;
use settle_retention::{
    DeletionState, ErasureRequest, Industry, LegalBasis, RetentionPolicy, SubmissionKind,
    SubmissionStored,
};
use settle_rpc::{AppConfig, AppContext, SettlementService};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "settle")]
#[command(about = "Settle - creator settlement and data retention", long_about = None)]
struct Cli {
    /// Data directory path (overrides the config file)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Config file (defaults to $SETTLE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Evaluate time-dependent commands at this instant (RFC 3339)
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a completed sale
    Sale {
        sale_id: String,
        #[arg(long)]
        template: String,
        #[arg(long)]
        buyer: String,
        #[arg(long)]
        creator: String,
        /// Gross amount in minor units
        #[arg(long)]
        amount: i64,
        #[arg(long, default_value = "USD")]
        currency: Currency,
        #[arg(long)]
        tier: CreatorTier,
        #[arg(long, default_value = "general")]
        category: Category,
        /// Processor fee in minor units; quoted from config when omitted
        #[arg(long)]
        fee: Option<i64>,
        /// When the purchase completed
        #[arg(long)]
        occurred_at: Option<DateTime<Utc>>,
    },

    /// Show a creator's balance
    Balance { creator: String },

    /// List a creator's payout batches
    Payouts {
        creator: String,
        /// formed, submitted, paid, failed or cancelled
        #[arg(long)]
        status: Option<String>,
    },

    /// Run one payout cycle
    PayoutCycle,

    /// Register a stored form submission
    Submission {
        submission_id: String,
        #[arg(long)]
        form: String,
        #[arg(long, default_value = "other")]
        kind: SubmissionKind,
        /// Data subject, used to resolve erasure requests
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        event_date: Option<DateTime<Utc>>,
        /// Submission arrived without a retention policy
        #[arg(long)]
        no_policy: bool,
        #[arg(long, default_value = "consent")]
        legal_basis: LegalBasis,
        #[arg(long, default_value = "general")]
        industry: Industry,
        #[arg(long)]
        retention_days: Option<i64>,
        #[arg(long)]
        keep: bool,
        /// Notify the form owner before deletion
        #[arg(long)]
        notify: bool,
    },

    /// Send due notices and execute due deletions
    RetentionTick,

    /// Show the deletion schedule of a form
    Schedule {
        form: String,
        /// pending, notified, executed, held or cancelled
        #[arg(long)]
        state: Option<String>,
    },

    /// Place a legal hold on a submission id or a `*` pattern
    Hold {
        target: String,
        #[arg(long)]
        case: String,
    },

    /// Release a legal hold
    ReleaseHold { hold_id: String },

    /// Right-to-erasure request
    Erase {
        user: String,
        /// Specific submissions; all of the user's when omitted
        #[arg(long = "submission")]
        submissions: Vec<String>,
    },

    /// Show the audit trail, optionally for one subject
    Audit {
        subject: Option<String>,
        /// Verify the hash chain
        #[arg(long)]
        verify: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    if let Some(data) = cli.data {
        config.data_dir = data;
    }
    let now = cli.at.unwrap_or_else(Utc::now);

    let service = SettlementService::new(AppContext::open(config).await?);

    match cli.command {
        Commands::Sale {
            sale_id,
            template,
            buyer,
            creator,
            amount,
            currency,
            tier,
            category,
            fee,
            occurred_at,
        } => {
            let event = SaleEvent {
                sale_id,
                template_id: template,
                buyer_id: buyer,
                creator_id: creator,
                gross_amount: MinorUnits::new(amount)?,
                currency,
                creator_tier: tier,
                category,
                occurred_at: occurred_at.or(Some(now)),
            };
            let fee = fee.map(MinorUnits::new).transpose()?;
            let outcome = service.ingest_sale(event, fee).await?;
            let record = outcome.record();
            if outcome.is_duplicate() {
                println!("Sale {} already recorded (seq: {})", record.sale_id, record.sequence);
            } else {
                println!(
                    "Recorded sale {}: creator {} net {} (seq: {})",
                    record.sale_id,
                    record.commission.creator_earnings,
                    record.commission.net_to_creator,
                    record.sequence
                );
            }
        }

        Commands::Balance { creator } => {
            print_json(&service.balance(&creator).await?)?;
        }

        Commands::Payouts { creator, status } => {
            let status = match status {
                Some(s) => Some(
                    BatchStatus::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("unknown batch status: {}", s))?,
                ),
                None => None,
            };
            print_json(&service.payouts(&creator, status).await?)?;
        }

        Commands::PayoutCycle => {
            print_json(&service.run_payout_cycle(now).await?)?;
        }

        Commands::Submission {
            submission_id,
            form,
            kind,
            user,
            event_date,
            no_policy,
            legal_basis,
            industry,
            retention_days,
            keep,
            notify,
        } => {
            let retention_policy = (!no_policy).then_some(RetentionPolicy {
                legal_basis,
                retention_days,
                auto_delete: !keep,
                industry,
                notify_before_delete: notify,
            });
            let record = service
                .store_submission(SubmissionStored {
                    submission_id,
                    form_id: form,
                    retention_policy,
                    stored_at: now,
                    kind,
                    event_date,
                    subject_user_id: user,
                })
                .await?;
            print_json(&record)?;
        }

        Commands::RetentionTick => {
            print_json(&service.retention_tick(now).await?)?;
        }

        Commands::Schedule { form, state } => {
            let state = match state {
                Some(s) => Some(
                    DeletionState::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("unknown deletion state: {}", s))?,
                ),
                None => None,
            };
            print_json(&service.deletion_schedule(&form, state).await?)?;
        }

        Commands::Hold { target, case } => {
            let applied = service.apply_legal_hold(&target, &case, now).await?;
            if applied.created {
                println!("Applied legal hold {}", applied.hold.hold_id);
            } else {
                println!("Legal hold {} already in place", applied.hold.hold_id);
            }
            print_json(&applied.hold)?;
        }

        Commands::ReleaseHold { hold_id } => {
            let (hold, rechecked) = service.release_legal_hold(&hold_id, now).await?;
            println!("Released legal hold {}", hold.hold_id);
            print_json(&rechecked)?;
        }

        Commands::Erase { user, submissions } => {
            let request = ErasureRequest {
                user_id: user,
                submission_ids: (!submissions.is_empty()).then_some(submissions),
            };
            print_json(&service.request_erasure(request, now).await?)?;
        }

        Commands::Audit { subject, verify } => {
            if verify {
                match service.verify_audit() {
                    Ok(count) => println!("Audit chain verified ({} entries)", count),
                    Err(e) => {
                        println!("Audit chain broken: {}", e);
                        return Ok(());
                    }
                }
            }
            print_json(&service.audit_trail(subject.as_deref())?)?;
        }
    }

    Ok(())
}
