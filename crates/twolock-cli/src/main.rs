use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod runner;

use config::{ConsumerMode, StressConfig};

#[derive(Parser)]
#[command(name = "twolock")]
#[command(about = "Exercise the two-lock concurrent queue with producer/consumer workloads", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent producers and consumers and verify every item arrives once
    Stress {
        /// TOML file with a stress configuration; flags override its values
        #[arg(short, long, env = "TWOLOCK_CONFIG")]
        config: Option<PathBuf>,

        /// Number of producer threads
        #[arg(short, long, env = "TWOLOCK_PRODUCERS")]
        producers: Option<usize>,

        /// Number of consumer threads
        #[arg(short = 'n', long, env = "TWOLOCK_CONSUMERS")]
        consumers: Option<usize>,

        /// Items pushed by each producer
        #[arg(short, long, env = "TWOLOCK_ITEMS")]
        items: Option<usize>,

        /// Pause between pushes, in microseconds
        #[arg(long)]
        pause_us: Option<u64>,

        /// How consumers decide they are done
        #[arg(short, long, value_enum)]
        mode: Option<ConsumerMode>,
    },

    /// Push a range from one thread and drain it back in order
    Sequential {
        /// Number of items to push
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "twolock=debug,twolock_queue=debug"
    } else {
        "twolock=info,twolock_queue=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match execute_command(&cli) {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            let verified = output
                .get("verified")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if !verified {
                bail!("verification failed");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn execute_command(cli: &Cli) -> Result<serde_json::Value> {
    match &cli.command {
        Commands::Stress {
            config,
            producers,
            consumers,
            items,
            pause_us,
            mode,
        } => {
            let mut stress = match config {
                Some(path) => StressConfig::from_file(path)?,
                None => StressConfig::default(),
            };
            if let Some(producers) = producers {
                stress.producers = *producers;
            }
            if let Some(consumers) = consumers {
                stress.consumers = *consumers;
            }
            if let Some(items) = items {
                stress.items_per_producer = *items;
            }
            if let Some(pause_us) = pause_us {
                stress.pause_us = *pause_us;
            }
            if let Some(mode) = mode {
                stress.mode = *mode;
            }
            let report = runner::run_stress(&stress).context("Stress run failed")?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Sequential { count } => {
            let report = runner::run_sequential(*count);
            Ok(serde_json::to_value(report)?)
        }
    }
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}: {}", key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}: {}", key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    serde_json::Value::Object(_) => {
                        println!("{}:", key_colored);
                        print_pretty(val)?;
                    }
                    _ => {
                        println!("{}: {}", key_colored, val);
                    }
                }
            }
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}
