use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use doc_control::{
    activity::{self, ActivityLogger},
    config::AppConfig,
    db::{self, PgPool},
    lifecycle::{competencies, reminders, reviews},
    notifier::HttpEmailNotifier,
};

const USAGE: &str = "Usage: maintenance <expiry-reminders | review-reminders [days] | sync-expired>";
const DEFAULT_REVIEW_DAYS: u32 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let command = args.next();
    let argument = args.next();

    match command.as_deref() {
        Some("expiry-reminders") => run(expiry_reminders).await?,
        Some("review-reminders") => {
            let days = match argument.as_deref() {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("days must be a non-negative integer, got {raw}"))?,
                None => DEFAULT_REVIEW_DAYS,
            };
            run(move |ctx| review_reminders(ctx, days)).await?
        }
        Some("sync-expired") => run(sync_expired).await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

struct JobContext {
    config: AppConfig,
    pool: PgPool,
    activity: ActivityLogger,
}

/// Runs one job, then flushes the audit events it queued before exiting.
async fn run<F, Fut>(job: F) -> Result<()>
where
    F: FnOnce(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        email_configured = config.email.is_configured(),
        "loaded doc-control configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    let (logger, receiver) = ActivityLogger::channel();
    let flush = tokio::spawn(activity::drain(pool.clone(), receiver));

    let outcome = job(JobContext {
        config,
        pool,
        activity: logger,
    })
    .await;

    flush.await.context("activity log flush failed")?;
    outcome
}

async fn expiry_reminders(ctx: JobContext) -> Result<()> {
    let notifier = HttpEmailNotifier::new(ctx.config.email.clone());
    let mut conn = ctx.pool.get().context("failed to get database connection")?;
    let summary = reminders::trigger_expiration_reminders(
        &mut conn,
        &notifier,
        &ctx.activity,
        Utc::now().date_naive(),
        &ctx.config.app_base_url,
    )
    .await?;
    println!(
        "Expiry reminders: {} candidate(s), {} email(s) sent, {} failure(s).",
        summary.candidates, summary.emails_sent, summary.failures
    );
    Ok(())
}

async fn review_reminders(ctx: JobContext, days: u32) -> Result<()> {
    let notifier = HttpEmailNotifier::new(ctx.config.email.clone());
    let mut conn = ctx.pool.get().context("failed to get database connection")?;
    let sent = reviews::send_review_reminders(
        &mut conn,
        &notifier,
        &ctx.activity,
        days,
        Utc::now().date_naive(),
        &ctx.config.app_base_url,
    )
    .await?;
    println!("Review reminders: {sent} email(s) sent for reviews due within {days} day(s).");
    Ok(())
}

async fn sync_expired(ctx: JobContext) -> Result<()> {
    let mut conn = ctx.pool.get().context("failed to get database connection")?;
    let expired = competencies::sync_expired(&mut conn, &ctx.activity, Utc::now().date_naive())?;
    println!("Marked {expired} competency record(s) as expired.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
