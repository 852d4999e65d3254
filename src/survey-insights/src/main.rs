//! Survey Insights: trend, anomaly and cohort analytics over survey responses.
//!
//! Reads a JSON array of response points, runs one analysis through the
//! engine and prints the result as JSON.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use survey_core::config::AnalyticsConfig;
use survey_core::types::{
    CohortPeriod, CohortRequest, Granularity, MetricKind, ResponsePoint, TimeRange, TrendRequest,
};
use survey_engine::AnalyticsEngine;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "survey-insights")]
#[command(about = "Trend, anomaly and cohort analytics for survey responses")]
#[command(version)]
struct Cli {
    /// Optional TOML config file, layered under SURVEY_INSIGHTS__* variables
    #[arg(long, env = "SURVEY_INSIGHTS_CONFIG")]
    config: Option<String>,

    /// JSON file holding an array of response points
    #[arg(long)]
    input: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time series, trend, anomalies and ranked insights for one metric
    Trends {
        #[arg(long)]
        survey: String,
        /// response_count, completion_rate or average_value
        #[arg(long, default_value = "response_count")]
        metric: MetricKind,
        /// daily, weekly or monthly
        #[arg(long, default_value = "daily")]
        granularity: Granularity,
        /// RFC 3339 start of the range
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 end of the range
        #[arg(long)]
        end: DateTime<Utc>,
    },
    /// Cohort retention matrix, average curve and ranking
    Cohorts {
        #[arg(long)]
        survey: String,
        /// weekly or monthly
        #[arg(long, default_value = "weekly")]
        period: CohortPeriod,
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "survey_insights=info,survey_engine=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = AnalyticsConfig::load_with_file(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AnalyticsConfig::default()
    });
    let engine = AnalyticsEngine::new(config)?;

    let raw = tokio::fs::read_to_string(&cli.input)
        .await
        .with_context(|| format!("reading {}", cli.input))?;
    let points: Vec<ResponsePoint> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", cli.input))?;
    info!(input = %cli.input, points = points.len(), "Response points loaded");
    let points: Arc<[ResponsePoint]> = points.into();

    let output = match cli.command {
        Command::Trends {
            survey,
            metric,
            granularity,
            start,
            end,
        } => {
            let request = TrendRequest {
                survey_id: survey,
                metric,
                granularity,
                range: TimeRange::new(start, end)?,
            };
            let result = engine.analyze_trends(request, points).await?;
            serde_json::to_string_pretty(result.as_ref())?
        }
        Command::Cohorts {
            survey,
            period,
            start,
            end,
        } => {
            let request = CohortRequest {
                survey_id: survey,
                period,
                range: TimeRange::new(start, end)?,
            };
            let result = engine.analyze_cohorts(request, points).await?;
            serde_json::to_string_pretty(result.as_ref())?
        }
    };

    println!("{output}");
    Ok(())
}
