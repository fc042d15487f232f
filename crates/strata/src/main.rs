//! Strata CLI - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata_config::SaveMode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::HostArgs;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Inspect hierarchical XML configuration", long_about = None)]
struct Cli {
    #[command(flatten)]
    host: HostArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged value of a section
    Show {
        /// Config key of the section (e.g. appSettings or group/section)
        section: String,
    },

    /// Evaluate every declared section and report errors
    Check,

    /// Print the XML a level would write for a section
    Unmerge {
        /// Config key of the section
        section: String,

        /// Which values to write (minimal, modified, full)
        #[arg(long, default_value = "modified")]
        mode: SaveMode,
    },

    /// List the sections declared at the selected path
    Sections,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let context = commands::Context::open(&cli.host)?;

    match cli.command {
        Commands::Show { section } => commands::show::execute(&context, &section),
        Commands::Check => commands::check::execute(&context),
        Commands::Unmerge { section, mode } => commands::unmerge::execute(&context, &section, mode),
        Commands::Sections => commands::sections::execute(&context),
    }
}
