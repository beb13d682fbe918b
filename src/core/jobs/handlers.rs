//! Sample handlers shipped with the service.
//!
//! They stand in for real integrations (mail, reporting, housekeeping) and
//! are useful for exercising the scheduler end to end.

use std::time::Duration;

use anyhow::{anyhow, bail};
use rand::Rng;
use tracing::info;

use super::registry::{HandlerOptions, HandlerRegistry, JobContext};
use crate::error::Result;

pub const SEND_EMAIL: &str = "send-email";
pub const GENERATE_REPORT: &str = "generate-report";
pub const CLEANUP_DATA: &str = "cleanup-data";

/// Share of `send-email` runs that fail, to exercise retry paths.
const EMAIL_FAILURE_RATE: f64 = 0.2;

pub fn register_builtin_handlers(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register_fn(SEND_EMAIL, HandlerOptions::with_concurrency(5), send_email)?;
    registry.register_fn(
        GENERATE_REPORT,
        HandlerOptions::with_concurrency(2),
        generate_report,
    )?;
    registry.register_fn(CLEANUP_DATA, HandlerOptions::with_concurrency(1), cleanup_data)?;
    Ok(())
}

async fn send_email(ctx: JobContext) -> anyhow::Result<()> {
    let to = ctx
        .data_str("to")
        .ok_or_else(|| anyhow!("missing 'to' address"))?
        .to_string();
    let subject = ctx.data_str("subject").unwrap_or("(no subject)").to_string();

    // Decide up front so the thread-local RNG is not held across the await.
    let fails = rand::thread_rng().gen_bool(EMAIL_FAILURE_RATE);

    info!(job_id = %ctx.job_id, to = %to, subject = %subject, "📧 Sending email");
    tokio::time::sleep(Duration::from_millis(200)).await;

    if fails {
        bail!("SMTP server rejected message to {}", to);
    }
    info!(job_id = %ctx.job_id, to = %to, "📧 Email sent");
    Ok(())
}

async fn generate_report(ctx: JobContext) -> anyhow::Result<()> {
    let report_type = ctx.data_str("reportType").unwrap_or("summary").to_string();
    info!(job_id = %ctx.job_id, report_type = %report_type, "📊 Generating report");
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!(job_id = %ctx.job_id, report_type = %report_type, "📊 Report ready");
    Ok(())
}

async fn cleanup_data(ctx: JobContext) -> anyhow::Result<()> {
    let older_than_days = ctx
        .data
        .get("olderThanDays")
        .and_then(|value| value.as_u64())
        .unwrap_or(30);
    info!(job_id = %ctx.job_id, older_than_days, "🧹 Cleaning up stale data");
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
