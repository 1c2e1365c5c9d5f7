// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! qaplan CLI - overlay-governed QA test plans

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use qaplan::commands::{self, Context};

#[derive(Parser)]
#[command(name = "qaplan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "QAPLAN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, env = "QAPLAN_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Upstream snapshot directory override
    #[arg(long, env = "QAPLAN_UPSTREAM_DIR", global = true)]
    upstream_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides `bind`)
        #[arg(long)]
        bind: Option<String>,
    },

    /// List Jira issue keys
    Keys,

    /// List baseline test plans
    Plans {
        /// Report governance status under this overlay
        #[arg(long)]
        overlay: Option<String>,
    },

    /// Show a baseline test plan
    Plan {
        /// Plan key
        key: String,

        /// Overlay to show alongside
        #[arg(long)]
        overlay: Option<String>,
    },

    /// List overlays
    Overlays,

    /// Recompute baseline governance into a file overlay
    Enrich {
        /// Plan key
        key: String,

        /// File overlay name
        #[arg(long)]
        overlay: String,
    },

    /// Store a generation run and refresh its run overlays
    ExportRun {
        /// Jira key of the run
        jira_key: String,

        /// JSON export body (markdown, suggestions, ...)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List stored runs
    Runs,

    /// Apply a run overlay into a file overlay
    ApplyRun {
        /// Plan key
        key: String,

        /// Run overlay name
        #[arg(long)]
        run: String,

        /// Target file overlay name
        #[arg(long)]
        overlay: String,
    },

    /// Record a decision for an AI candidate
    Decide {
        /// Plan key
        key: String,

        /// File overlay name
        #[arg(long)]
        overlay: String,

        /// Candidate key
        #[arg(long)]
        candidate: String,

        /// PENDING, ACCEPTED or REJECTED
        #[arg(long)]
        decision: String,

        /// Reviewer rationale
        #[arg(long)]
        rationale: Option<String>,
    },

    /// Override execute/skip for an existing test
    Override {
        /// Plan key
        key: String,

        /// File overlay name
        #[arg(long)]
        overlay: String,

        /// Baseline test key
        #[arg(long)]
        test: String,

        /// execute or skip
        #[arg(long)]
        disposition: String,

        /// Reason
        #[arg(long)]
        reason: Option<String>,
    },

    /// Compile the effective plan
    Effective {
        /// Plan key
        key: String,

        /// Overlay to compile with
        #[arg(long)]
        overlay: Option<String>,
    },

    /// Generate a test plan with the configured LLM
    Generate {
        /// Jira key
        jira_key: String,

        /// Also export the result as a run
        #[arg(long)]
        export: bool,
    },

    /// Show the resolved configuration
    Config {
        /// Dotted key to print (e.g. llm.provider)
        key: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: clap_complete::Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v/-q
    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qaplan={level},tower_http={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        return commands::completions::run(shell, &mut Cli::command());
    }

    let mut config = qaplan::config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.upstream_dir {
        config.upstream_dir = Some(dir);
    }
    let ctx = Context {
        config,
        json: cli.json,
        color: !cli.no_color,
    };

    // Execute command
    match cli.command {
        Commands::Serve { bind } => commands::serve::run(&ctx, bind),
        Commands::Keys => commands::plan::keys(&ctx),
        Commands::Plans { overlay } => commands::plan::list(&ctx, overlay.as_deref()),
        Commands::Plan { key, overlay } => commands::plan::show(&ctx, &key, overlay.as_deref()),
        Commands::Overlays => commands::plan::overlays(&ctx),
        Commands::Enrich { key, overlay } => commands::enrich::run(&ctx, &key, &overlay),
        Commands::ExportRun { jira_key, file } => commands::export::run(&ctx, &jira_key, &file),
        Commands::Runs => commands::export::list(&ctx),
        Commands::ApplyRun { key, run, overlay } => commands::apply::run(&ctx, &key, &run, &overlay),
        Commands::Decide {
            key,
            overlay,
            candidate,
            decision,
            rationale,
        } => commands::decide::candidate(&ctx, &key, &overlay, &candidate, &decision, rationale),
        Commands::Override {
            key,
            overlay,
            test,
            disposition,
            reason,
        } => commands::decide::existing(&ctx, &key, &overlay, &test, &disposition, reason),
        Commands::Effective { key, overlay } => commands::plan::effective(&ctx, &key, overlay.as_deref()),
        Commands::Generate { jira_key, export } => commands::generate::run(&ctx, &jira_key, export),
        Commands::Config { key } => commands::config::run(&ctx, key.as_deref()),
        Commands::Completions { .. } => Ok(()),
    }
}
