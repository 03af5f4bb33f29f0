//! liqtrace: Aave V3 liquidation history lookup.
//!
//! Usage: `liqtrace [network] [from] [to]` or `liqtrace networks`.
//! Positional arguments override the environment; dates are `YYYY-MM-DD`
//! (UTC, `to` inclusive). The search report is printed to stdout as JSON,
//! logs go to stderr.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liqtrace_chain::LiquidationQuery;
use liqtrace_core::{EngineConfig, LiquidationSearch};

/// Environment variable names.
mod env {
    pub const NETWORK: &str = "LIQTRACE_NETWORK";
    pub const FROM: &str = "LIQTRACE_FROM";
    pub const TO: &str = "LIQTRACE_TO";
    pub const USER: &str = "LIQTRACE_USER";
    pub const LIQUIDATOR: &str = "LIQTRACE_LIQUIDATOR";
}

const DEFAULT_NETWORK: &str = "ethereum";
const SECONDS_PER_DAY: f64 = 86_400.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liqtrace_core=debug,liqtrace_chain=debug")),
        )
        .init();

    let config = EngineConfig::from_env()?;
    config.log_config();

    let search = LiquidationSearch::from_config(&config)?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("networks") {
        print_networks(&search);
        return Ok(());
    }

    let query = load_query(&args)?;
    info!(
        network = %query.network,
        start = ?query.start,
        end = ?query.end,
        "Searching liquidations"
    );

    if let (Some(start), Some(end), Some(max_days)) = (
        query.start,
        query.end,
        search.registry().max_date_range_days(&query.network),
    ) {
        let days = end.saturating_sub(start) as f64 / SECONDS_PER_DAY;
        if days > max_days {
            warn!(
                days = format!("{days:.1}"),
                max_days = format!("{max_days:.1}"),
                "Date range exceeds what one ledger scan covers"
            );
        }
    }

    let report = search.search_report(&query).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(error) = report.error {
        anyhow::bail!(error);
    }
    Ok(())
}

/// Build the query from positional arguments and environment variables.
fn load_query(args: &[String]) -> Result<LiquidationQuery> {
    let env_var = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
    let setting = |pos: usize, var: &str| args.get(pos).cloned().or_else(|| env_var(var));

    let network = setting(0, env::NETWORK).unwrap_or_else(|| DEFAULT_NETWORK.to_string());
    let start = setting(1, env::FROM)
        .map(|s| day_start(&s))
        .transpose()?;
    let end = setting(2, env::TO).map(|s| day_end(&s)).transpose()?;

    let mut query = LiquidationQuery::new(network.trim().to_lowercase()).between(start, end);
    if let Some(user) = env_var(env::USER) {
        query = query.with_user(
            user.trim()
                .parse()
                .with_context(|| format!("invalid {} address: {user}", env::USER))?,
        );
    }
    if let Some(liquidator) = env_var(env::LIQUIDATOR) {
        query = query.with_liquidator(
            liquidator
                .trim()
                .parse()
                .with_context(|| format!("invalid {} address: {liquidator}", env::LIQUIDATOR))?,
        );
    }
    Ok(query)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

/// 00:00:00 UTC of the day.
fn day_start(s: &str) -> Result<u64> {
    let ts = parse_date(s)?.and_time(NaiveTime::MIN).and_utc().timestamp();
    u64::try_from(ts).with_context(|| format!("date before 1970: {s}"))
}

/// 23:59:59 UTC of the day.
fn day_end(s: &str) -> Result<u64> {
    Ok(day_start(s)? + 86_399)
}

fn print_networks(search: &LiquidationSearch) {
    let registry = search.registry();
    for profile in registry.iter() {
        println!(
            "{:<10} {:<10} chain {:<6} indexed {:<3} scan window {:>7.1} days",
            profile.key,
            profile.name,
            profile.chain_id,
            if profile.has_indexed_service() { "yes" } else { "no" },
            profile.max_date_range_days(registry.max_chunks()),
        );
    }
}
