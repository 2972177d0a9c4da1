use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod alerts;
mod chi;
mod db;
mod forecast;
mod models;
mod simulate;
mod volume;

#[derive(Parser)]
#[command(name = "region-chi")]
#[command(about = "Regional customer health index scoring, alerting, and forecasting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small realistic seed data set
    Seed,
    /// Import feedback events and/or KPI snapshots from CSV files
    #[command(group(
        ArgGroup::new("input")
            .args(["events", "kpis"])
            .required(true)
            .multiple(true)
    ))]
    Import {
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        kpis: Option<PathBuf>,
    },
    /// Compute the CHI for one region without persisting it
    Score {
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 15)]
        window_minutes: i64,
    },
    /// Recompute and store the CHI for a set of regions
    Recompute {
        #[arg(long, required = true, num_args = 1..)]
        regions: Vec<String>,
        #[arg(long, default_value_t = 15)]
        window_minutes: i64,
    },
    /// Evaluate alert rules for a set of regions and persist triggered alerts
    Alerts {
        #[arg(long, required = true, num_args = 1..)]
        regions: Vec<String>,
    },
    /// Forecast a region's CHI trajectory from its stored history
    Forecast {
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 120)]
        horizon_minutes: i64,
        #[arg(long, default_value_t = 15)]
        step_minutes: i64,
    },
    /// Inject a synthetic outage, then recompute CHI and evaluate alerts
    Simulate {
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 50)]
        impact_percent: u32,
        #[arg(long, default_value_t = 30)]
        duration_minutes: i64,
        #[arg(long, default_value_t = 3)]
        event_rate_per_minute: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { events, kpis } => {
            if let Some(path) = events {
                let inserted = db::import_events_csv(&pool, &path).await?;
                println!("Inserted {inserted} events from {}.", path.display());
            }
            if let Some(path) = kpis {
                let inserted = db::import_kpis_csv(&pool, &path).await?;
                println!("Inserted {inserted} KPI snapshots from {}.", path.display());
            }
        }
        Commands::Score {
            region,
            window_minutes,
        } => {
            let policy = chi::ScorePolicy::default();
            let (score, drivers) =
                chi::compute_chi_for_region(&pool, &region, window_minutes, &policy).await?;
            println!("CHI for {region} over the last {window_minutes} minutes: {score:.2}");
            println!("{}", serde_json::to_string_pretty(&drivers)?);
        }
        Commands::Recompute {
            regions,
            window_minutes,
        } => {
            let policy = chi::ScorePolicy::default();
            let rows = chi::recompute_and_store(&pool, &regions, window_minutes, &policy).await?;
            println!("Stored {} CHI rows:", rows.len());
            for row in rows {
                println!("- {} CHI {:.2}", row.region, row.score);
            }
        }
        Commands::Alerts { regions } => {
            let policy = alerts::AlertPolicy::default();
            let created = alerts::generate_alerts(&pool, &regions, &policy).await?;
            if created.is_empty() {
                println!("No alert rules triggered.");
            } else {
                println!("Created {} alerts:", created.len());
                for alert in created {
                    let before = alert
                        .chi_before
                        .map(|score| format!("{score:.2}"))
                        .unwrap_or_else(|| "n/a".to_string());
                    println!(
                        "- {}: {} (CHI {} -> {:.2})",
                        alert.region, alert.reason, before, alert.chi_after
                    );
                }
            }
        }
        Commands::Forecast {
            region,
            horizon_minutes,
            step_minutes,
        } => {
            let points = forecast::forecast(&pool, &region, horizon_minutes, step_minutes).await?;
            if points.is_empty() {
                println!("No CHI history for {region}; nothing to forecast.");
            } else {
                println!("Forecast for {region}:");
                for point in points {
                    println!("- {} CHI {:.2}", point.ts.to_rfc3339(), point.score);
                }
            }
        }
        Commands::Simulate {
            region,
            impact_percent,
            duration_minutes,
            event_rate_per_minute,
        } => {
            let created = simulate::simulate_outage(
                &pool,
                &region,
                impact_percent,
                duration_minutes,
                event_rate_per_minute,
            )
            .await?;
            let score_policy = chi::ScorePolicy::default();
            let regions = vec![region.clone()];
            chi::recompute_and_store(&pool, &regions, 15, &score_policy).await?;
            let alert_policy = alerts::AlertPolicy::default();
            let alerts = alerts::generate_alerts(&pool, &regions, &alert_policy).await?;
            println!(
                "Injected {created} synthetic events for {region}; {} alerts created.",
                alerts.len()
            );
        }
    }

    Ok(())
}
