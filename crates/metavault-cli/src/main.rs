mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use metavault_types::compression::CompressionCodec;

#[derive(Parser)]
#[command(
    name = "metavault",
    version,
    about = "Extract and restore cluster metadata"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List the operations stored in a dump file
    Inspect {
        /// Dump file path or object-store URL written by an extract
        dump: String,
        /// Print every operation as JSON instead of a summary line
        #[arg(long)]
        json: bool,
        /// Admin config supplying the record size limit
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate an admin configuration file
    Check {
        /// Path to admin config YAML file
        config: PathBuf,
    },
    /// Extract a sample cluster to a dump and restore it into an empty one
    Selftest {
        /// Admin config; dumps go to a temporary directory when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured compression codec
        #[arg(long, value_enum)]
        codec: Option<Codec>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Codec {
    Zstd,
    Lz4,
}

impl From<Codec> for CompressionCodec {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::Zstd => Self::Zstd,
            Codec::Lz4 => Self::Lz4,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Inspect { dump, json, config } => {
            commands::inspect::execute(&dump, json, config.as_deref())
        }
        Commands::Check { config } => commands::check::execute(&config),
        Commands::Selftest { config, codec } => {
            commands::selftest::execute(config.as_deref(), codec.map(Into::into)).await
        }
    }
}
