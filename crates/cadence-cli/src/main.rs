//! `cadence` command-line entry point.
//!
//! - `resolve`: print the send time the configured constraints allow
//! - `run`: wire in-memory adapters, seed a demo sequence, run the sweep
//! - `check-config`: validate and print the effective configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use cadence_core::app::{CadenceBuilder, SweepGroup, Sweeper};
use cadence_core::config::{CadenceConfig, LoggingConfig};
use cadence_core::domain::{
    LineItem, Priority, Recipient, SequenceDefinition, SequenceId, SequenceStep, StepTemplate,
    TargetEntity, TargetId, TargetStatus, TenantId, Trigger,
};
use cadence_core::impls::{InMemoryTargetDirectory, RecordingTransport};
use cadence_core::ports::{IdGenerator, SystemClock, UlidGenerator};
use cadence_core::schedule::{ResolveOptions, Resolver};
use cadence_core::sequence::StartOptions;

#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Payment-reminder scheduling and sequence execution", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults and CADENCE_* env still apply)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a desired send moment against the configured constraints
    Resolve {
        /// Desired send time, RFC 3339
        #[arg(long)]
        at: String,

        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,

        /// URGENT only: keep an in-window candidate even if it breaks hard constraints
        #[arg(long)]
        bypass_hard: bool,
    },
    /// Run the sweep against in-memory adapters with a seeded demo sequence
    Run {
        /// Stop after this many ticks instead of waiting for Ctrl-C
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Validate and print the effective configuration
    CheckConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

#[derive(Serialize)]
struct ResolveOutput {
    requested: DateTime<Utc>,
    resolved: DateTime<Utc>,
    iterations: u32,
    fell_back: bool,
    bypassed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CadenceConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Resolve {
            at,
            priority,
            bypass_hard,
        } => cmd_resolve(&config, &at, priority.into(), bypass_hard),
        Commands::Run { ticks } => cmd_run(config, ticks).await,
        Commands::CheckConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured level for cadence crates.
fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cadence_core={level},cadence={level},warn",
            level = logging.level
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cmd_resolve(
    config: &CadenceConfig,
    at: &str,
    priority: Priority,
    bypass_hard: bool,
) -> Result<()> {
    let requested = DateTime::parse_from_rfc3339(at)
        .with_context(|| format!("`{at}` is not an RFC 3339 timestamp"))?
        .with_timezone(&Utc);
    if bypass_hard && priority != Priority::Urgent {
        bail!("--bypass-hard requires --priority urgent");
    }

    let mut options = ResolveOptions::new(priority);
    if bypass_hard {
        options = options.bypassing_hard_constraints();
    }
    let resolution =
        Resolver::new(config.resolver).resolve_with(requested, &config.constraints, options);

    let output = ResolveOutput {
        requested,
        resolved: resolution.at,
        iterations: resolution.iterations,
        fell_back: resolution.fell_back,
        bypassed: resolution.bypassed,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_run(config: CadenceConfig, ticks: Option<u64>) -> Result<()> {
    let interval = Duration::from_secs(config.sweep.interval_secs);
    let workers = config.sweep.workers;

    let directory = Arc::new(InMemoryTargetDirectory::new());
    let transport = Arc::new(RecordingTransport::confirming());
    let service = Arc::new(
        CadenceBuilder::in_memory(config.clone())
            .with_directory(directory.clone())
            .with_transport(transport.clone())
            .build()?,
    );

    let ids = UlidGenerator::new(SystemClock);
    let definition = demo_sequence(ids.sequence_id(), &config);
    let sequence_id = definition.id;
    let registered = service.register_sequence(definition).await?;
    if !registered.success {
        bail!("demo sequence rejected: {:?}", registered.errors);
    }
    directory.upsert(demo_target()).await;

    let started = service
        .start_sequence_execution(
            sequence_id,
            TargetId::new("demo-invoice"),
            StartOptions {
                dispatch_immediately: true,
                trigger: Trigger::Overdue,
            },
        )
        .await?;
    info!(success = started.success, ids = ?started.ids, errors = ?started.errors, "demo execution started");

    let sweeper = Sweeper::new(service.clone());
    match ticks {
        Some(n) => {
            for tick in 1..=n {
                let report = sweeper.tick().await?;
                info!(tick, sent = report.dispatch.sent, advanced = report.sequences.advanced, "tick done");
                if tick < n {
                    tokio::time::sleep(interval).await;
                }
            }
        }
        None => {
            let group = SweepGroup::spawn(workers, interval, sweeper);
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            info!("shutting down");
            group.shutdown_and_join().await;
        }
    }

    let metrics = service.get_queue_metrics(None).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    info!(sent = transport.sent().await.len(), "run finished");
    Ok(())
}

fn demo_sequence(id: SequenceId, config: &CadenceConfig) -> SequenceDefinition {
    let step = |delay, subject: &str| {
        SequenceStep::new(delay).with_template(
            "en",
            StepTemplate::new(
                subject,
                "Dear {{recipient_name}},\n\n{{amount_due}} {{currency}} is outstanding:\n{{items}}\n",
            ),
        )
    };
    SequenceDefinition {
        id,
        tenant_id: TenantId::new("demo"),
        name: "overdue-demo".into(),
        active: true,
        steps: vec![
            step(0, "Invoice {{invoice_number}} is overdue"),
            step(7, "Second reminder: {{invoice_number}}"),
            step(5, "Final notice: {{amount_due}} {{currency}}"),
        ],
        languages: vec!["en".into()],
        constraints: config.constraints.clone(),
        priority: Priority::Normal,
    }
}

fn demo_target() -> TargetEntity {
    let due = Utc::now().date_naive() - chrono::Duration::days(10);
    TargetEntity {
        id: TargetId::new("demo-invoice"),
        tenant_id: TenantId::new("demo"),
        recipient: Recipient::new("ap@example.com").with_name("Accounts Payable"),
        status: TargetStatus::Open,
        currency: "SAR".into(),
        items: vec![
            LineItem::new("INV-1001", 125_000, due),
            LineItem::new("INV-1002", 40_000, due + chrono::Duration::days(7)),
        ],
        fields: Default::default(),
    }
}
