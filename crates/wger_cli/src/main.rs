use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use wger_api::{ExerciseOp, NutritionOp, Operation, Page, WgerClient, WorkoutOp};
use wger_core::{SystemClock, ThreadRandom, WgerConfig};
use wger_guard::{SystemResolver, UrlValidator, ValidateOptions};
use wger_http::{CancellationToken, ReqwestTransport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "WGER_CONFIG", default_value = "wger.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a URL against the SSRF guard and print the result
    Validate {
        url: String,
        /// Downgrade loopback/private-address errors to warnings
        #[arg(long)]
        dev: bool,
        /// Skip the DNS rebinding check
        #[arg(long)]
        skip_dns: bool,
    },
    #[command(flatten)]
    Api(ApiCommand),
}

/// Commands that talk to the configured wger server.
#[derive(Subcommand, Debug)]
enum ApiCommand {
    /// List workouts
    Workouts {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List meals, optionally for one nutrition plan
    Meals {
        #[arg(long)]
        plan: Option<u64>,
    },
    /// Print the weight log
    Weight {
        /// Only entries on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Summarize the weight log
    WeightStats {
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Search exercises by name
    ExerciseSearch {
        term: String,
        #[arg(long, default_value = "en")]
        language: String,
    },
}

fn init_logging(json: bool) {
    // stdout carries command output; logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn validate(
    validator: &UrlValidator,
    config: &WgerConfig,
    url: &str,
    dev: bool,
    skip_dns: bool,
) -> Result<ExitCode> {
    let mut options = ValidateOptions::from(&config.url_guard);
    options.is_development |= dev;
    options.skip_dns |= skip_dns;
    let result = validator.validate(url, &options).await;
    print_json(&result)?;
    Ok(if result.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn run_api(command: ApiCommand, config: &WgerConfig, validator: &UrlValidator) -> Result<()> {
    let client = WgerClient::connect(
        config,
        validator,
        Arc::new(ReqwestTransport::default()),
        Arc::new(SystemClock),
        Arc::new(ThreadRandom),
    )
    .await
    .context("Failed to set up wger client")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let op = match command {
        ApiCommand::Workouts { limit } => Operation::Workout(WorkoutOp::List {
            page: Page {
                limit,
                offset: None,
            },
        }),
        ApiCommand::Meals { plan } => Operation::Nutrition(NutritionOp::ListMeals {
            plan,
            page: Page::default(),
        }),
        ApiCommand::Weight { since } => {
            return print_json(&client.weight_entries_with_cancel(since, &cancel).await?);
        }
        ApiCommand::WeightStats { since } => {
            return print_json(&client.weight_stats_with_cancel(since, &cancel).await?);
        }
        ApiCommand::ExerciseSearch { term, language } => {
            Operation::Exercise(ExerciseOp::Search { term, language })
        }
    };

    let value = client
        .execute_with_cancel(&op, &cancel)
        .await
        .with_context(|| format!("{} failed", op.name()))?;
    print_json(&value)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.json_logs);

    let config = WgerConfig::load_or_default(&args.config);
    let validator = UrlValidator::new(Arc::new(SystemResolver));

    match args.command {
        Command::Validate { url, dev, skip_dns } => {
            validate(&validator, &config, &url, dev, skip_dns).await
        }
        Command::Api(command) => {
            run_api(command, &config, &validator).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
