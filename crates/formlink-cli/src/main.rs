mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::run::Phase;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "formlink",
    about = "Run form action definitions against a CRM snapshot",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log engine decisions (equivalent to RUST_LOG=info)
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the load pass, or a load-then-make cycle, over a form
    Run {
        /// Form definition (YAML or JSON)
        #[arg(long)]
        form: PathBuf,
        /// CRM snapshot (YAML or JSON)
        #[arg(long)]
        crm: PathBuf,
        /// Submitted values (YAML or JSON)
        #[arg(long)]
        submission: Option<PathBuf>,
        /// Engine configuration
        #[arg(long, env = "FORMLINK_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Phase::Make)]
        phase: Phase,
        /// Write the CRM snapshot after the make pass to this path
        #[arg(long)]
        out_crm: Option<PathBuf>,
    },

    /// Check a form definition against the engine configuration
    Check {
        #[arg(long)]
        form: PathBuf,
        #[arg(long, env = "FORMLINK_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            form,
            crm,
            submission,
            config,
            phase,
            out_crm,
        } => cmd::run::run(
            cmd::run::RunArgs {
                form: &form,
                crm: &crm,
                submission: submission.as_deref(),
                config: config.as_deref(),
                phase,
                out_crm: out_crm.as_deref(),
            },
            cli.json,
        ),
        Commands::Check { form, config } => cmd::check::run(&form, config.as_deref(), cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
