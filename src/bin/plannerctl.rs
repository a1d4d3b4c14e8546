use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use planner::{
    config::AppConfig,
    db::{init_pool, run_migrations},
    logging::init_logging,
    services::{
        email::{self, SendOutcome},
        mailer::build_mailer,
        metrics::{self, ReportFormat},
        notifications::NotificationKind,
        queue::{drain_queue, SqsQueue},
    },
    state::AppState,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "plannerctl")]
#[command(about = "Operator commands for the vacation planner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drain the SES bounce queue
    ProcessBounces(QueueArgs),
    /// Drain the SES complaint queue
    ProcessComplaints(QueueArgs),
    /// Drain the SES delivery queue
    ProcessDeliveries(QueueArgs),
    /// Print email delivery statistics
    EmailMetrics {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(i64).range(1..=3650))]
        days: i64,
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
        #[arg(long, default_value_t = false)]
        detailed: bool,
    },
    /// Send one message through the configured transport
    SendTestEmail { address: String },
}

#[derive(Args)]
struct QueueArgs {
    /// Defaults to the matching SES_*_QUEUE_URL setting
    #[arg(long)]
    queue_url: Option<String>,
    #[arg(long)]
    region: Option<String>,
    #[arg(long, default_value_t = 10)]
    max_messages: usize,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    match cli.command {
        Command::ProcessBounces(args) => {
            let url = args.queue_url.clone().or(config.email.bounce_queue_url.clone());
            process_queue(&config, &db, NotificationKind::Bounce, url, args).await
        }
        Command::ProcessComplaints(args) => {
            let url = args.queue_url.clone().or(config.email.complaint_queue_url.clone());
            process_queue(&config, &db, NotificationKind::Complaint, url, args).await
        }
        Command::ProcessDeliveries(args) => {
            let url = args.queue_url.clone().or(config.email.delivery_queue_url.clone());
            process_queue(&config, &db, NotificationKind::Delivery, url, args).await
        }
        Command::EmailMetrics {
            days,
            format,
            detailed,
        } => {
            let report = metrics::collect(&db, days, detailed).await?;
            println!("{}", report.render(format)?);
            Ok(())
        }
        Command::SendTestEmail { address } => {
            let mailer = build_mailer(&config.email).await;
            let state = AppState::new(config, db, mailer);
            let report = email::send_test(&state, &address).await?;
            match report.outcome {
                SendOutcome::Sent { message_id } => {
                    println!("Test email sent to {address} (message id {message_id})");
                    Ok(())
                }
                SendOutcome::Suppressed { reason } => Err(anyhow!("test email suppressed: {reason}")),
                SendOutcome::Failed { error } => Err(anyhow!("test email failed: {error}")),
            }
        }
    }
}

async fn process_queue(
    config: &AppConfig,
    db: &planner::db::DbPool,
    kind: NotificationKind,
    queue_url: Option<String>,
    args: QueueArgs,
) -> anyhow::Result<()> {
    let queue_url = queue_url
        .with_context(|| format!("no queue URL configured for {kind} notifications"))?;
    let region = args.region.unwrap_or_else(|| config.email.aws_region.clone());
    info!(%kind, %queue_url, %region, dry_run = args.dry_run, "processing queue");
    if args.dry_run {
        println!("DRY RUN MODE - No changes will be made");
    }

    let queue = SqsQueue::new(&region, &queue_url).await;
    let report = drain_queue(db, &queue, kind, args.max_messages, args.dry_run).await?;
    for line in &report.lines {
        println!("{line}");
    }
    println!("{}", report.summary());
    Ok(())
}
