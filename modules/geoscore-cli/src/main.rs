use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use geoscore_aggregator::{apply_observation, run_level, Scheduler};
use geoscore_common::{Config, GeoAddress, GeoLevel, NewUser, Observation};
use geoscore_store::{PgScoreStore, ScoreStore};

#[derive(Parser)]
#[command(name = "geoscore")]
#[command(about = "Hierarchical geographic score aggregation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the embedded database migrations
    Migrate,

    /// Register a user with neutral scores
    Register {
        #[arg(long)]
        pincode: String,
        #[arg(long)]
        city: String,
        #[arg(long)]
        district: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        country: String,
        /// Use this id instead of a random one
        #[arg(long)]
        user_id: Option<Uuid>,
    },

    /// Fold one observation into a user's running averages
    Observe {
        user_id: Uuid,
        /// Axis scores as a JSON object, e.g. '{"courage": 0.7}'
        #[arg(long)]
        scores: String,
    },

    /// Apply newline-delimited JSON observations read from stdin
    Ingest,

    /// Run one level's aggregation job now
    Aggregate { level: GeoLevel },

    /// Run every level on its configured cadence until Ctrl-C
    Schedule,

    /// Print the latest batch of a level, or one identifier's latest row
    Latest {
        level: GeoLevel,
        identifier: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    config.log_redacted();

    let store = PgScoreStore::connect(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to Postgres")?;

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            info!("Migrations applied");
        }
        Commands::Register {
            pincode,
            city,
            district,
            state,
            country,
            user_id,
        } => {
            let user = store
                .create_user(NewUser {
                    user_id: user_id.unwrap_or_else(Uuid::new_v4),
                    address: GeoAddress {
                        pincode,
                        city,
                        district,
                        state,
                        country,
                    },
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Observe { user_id, scores } => {
            let scores: BTreeMap<String, f64> =
                serde_json::from_str(&scores).context("--scores must be a JSON object of numbers")?;
            let user = apply_observation(&store, &Observation { user_id, scores }, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Ingest => ingest(&store).await?,
        Commands::Aggregate { level } => {
            let report = run_level(&store, &config.aggregation, level, Utc::now()).await?;
            info!("{report}");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Schedule => {
            let mut scheduler = Scheduler::new(Arc::new(store), config.aggregation.clone());
            scheduler.seed_from_store().await?;
            scheduler
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                    }
                })
                .await;
        }
        Commands::Latest { level, identifier } => {
            let json = match identifier {
                Some(id) => serde_json::to_string_pretty(&store.latest_for(level, &id).await?)?,
                None => serde_json::to_string_pretty(&store.latest_batch(level).await?)?,
            };
            println!("{json}");
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("geoscore=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Apply every line, then fail if any line failed so the caller can requeue.
async fn ingest(store: &PgScoreStore) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    let mut applied = 0usize;
    let mut failed = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<Observation>(&line) {
            Ok(obs) => apply_observation(store, &obs, Utc::now())
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(_) => applied += 1,
            Err(e) => {
                failed += 1;
                warn!(line = line_no, error = %e, "Observation rejected");
            }
        }
    }

    info!(applied, failed, "Ingest finished");
    anyhow::ensure!(failed == 0, "{failed} of {} observations failed", applied + failed);
    Ok(())
}
