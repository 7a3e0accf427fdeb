use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use dayflow::cli::{self, OutputMode, RunOptions};
use dayflow::config::DayflowConfig;
use dayflow::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dayflow")]
#[command(about = "Summarize a day of source-control activity into a stored log")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .dayflow/config.toml (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one day of activity
    Run {
        /// Day to analyze, YYYY-MM-DD (defaults to yesterday, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Regenerate even if a log for the day exists
        #[arg(long)]
        force: bool,

        /// Items analyzed at once (defaults to config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Output format: console, json or quiet
        #[arg(long, default_value = "console")]
        output: String,
    },

    /// Print the stored log for a day
    Show {
        /// Day, YYYY-MM-DD
        date: NaiveDate,

        /// Output format: console, json or quiet
        #[arg(long, default_value = "console")]
        output: String,
    },

    /// List recent runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Output format: console, json or quiet
        #[arg(long, default_value = "console")]
        output: String,
    },

    /// Check configuration, prompts and workflow definition
    Validate,

    /// Check backend, GitHub and store availability
    Doctor,
}

fn yesterday() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

fn mode(output: &str, quiet: bool) -> OutputMode {
    if quiet {
        OutputMode::Quiet
    } else {
        OutputMode::from_str(output)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_guard = logging::init_logging(cli.debug, cli.quiet, cli.log_file.as_deref())?;

    let project_dir = cli.dir.as_deref();
    let config = DayflowConfig::load(project_dir)?;

    let code = match cli.command {
        Commands::Run {
            date,
            force,
            concurrency,
            output,
        } => {
            let handler = cli::create_handler(mode(&output, cli.quiet), cli.debug);
            let options = RunOptions {
                date: date.unwrap_or_else(yesterday),
                force,
                concurrency,
            };
            cli::run_analysis(&config, &options, &*handler)
                .await
                .map_err(anyhow::Error::msg)?
        }

        Commands::Show { date, output } => {
            let handler = cli::create_handler(mode(&output, cli.quiet), cli.debug);
            cli::show(&config, date, &*handler)
                .await
                .map_err(anyhow::Error::msg)?
        }

        Commands::History { limit, output } => {
            let handler = cli::create_handler(mode(&output, cli.quiet), cli.debug);
            cli::list_history(&config, limit, &*handler).map_err(anyhow::Error::msg)?
        }

        Commands::Validate => {
            let handler = cli::create_handler(mode("console", cli.quiet), cli.debug);
            cli::validate(&config, &*handler)
        }

        Commands::Doctor => {
            let handler = cli::create_handler(mode("console", cli.quiet), cli.debug);
            cli::doctor(&config, &*handler).await
        }
    };

    if code != 0 {
        drop(log_guard);
        std::process::exit(code);
    }

    Ok(())
}
