use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use trafficrouter_consul::{LogFormat, PluginSettings};

mod commands;

#[derive(Parser)]
#[command(
    name = "trafficrouter-consul",
    about = "Consul traffic router for progressive rollouts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Operator settings file (TOML).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log output format. Overrides [log].format from the settings file.
    #[arg(long, global = true, value_enum)]
    log_format: Option<FormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shift traffic to the canary by rewriting resolver and splitter entries.
    ///
    /// The entries file is a JSON snapshot ({"entries": [...]}) and is
    /// written back after any entry has been updated.
    SetWeight {
        /// Rollout document (JSON).
        #[arg(short, long)]
        rollout: PathBuf,
        /// Config entry snapshot (JSON).
        #[arg(short, long)]
        entries: PathBuf,
        /// Percentage of traffic for the canary (0-100).
        #[arg(short, long, value_parser = clap::value_parser!(i32).range(0..=100))]
        weight: i32,
    },
    /// Verify that the routing layer serves the desired weight.
    VerifyWeight {
        #[arg(short, long)]
        rollout: PathBuf,
        #[arg(short, long)]
        weight: i32,
    },
    /// Print the rollout phase the router would act on.
    Classify {
        #[arg(short, long)]
        rollout: PathBuf,
    },
    /// Print the plugin type.
    Type,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => LogFormat::Text,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

fn init_tracing(settings: &PluginSettings, format: Option<FormatArg>) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log.level)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format.map(LogFormat::from).unwrap_or(settings.log.format) {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => PluginSettings::from_file(path)?,
        None => PluginSettings::default(),
    };
    init_tracing(&settings, cli.log_format)?;

    match cli.command {
        Commands::SetWeight {
            rollout,
            entries,
            weight,
        } => commands::set_weight(&rollout, &entries, weight, &settings),
        Commands::VerifyWeight { rollout, weight } => commands::verify_weight(&rollout, weight),
        Commands::Classify { rollout } => commands::classify(&rollout),
        Commands::Type => {
            println!("{}", trafficrouter_consul::PLUGIN_TYPE);
            Ok(())
        }
    }
}
