//! # escrowd
//!
//! ```bash
//! escrowd serve --port 8080
//! escrowd sweep
//! escrowd verify-audit chain.json
//! ```
//!
//! Configuration comes from the environment (see `escrow_api::config`).
//! Log verbosity follows `RUST_LOG` when set, otherwise `-v` / `-vv`.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use escrow_api::AppConfig;
use escrow_cli::serve::{run_serve, ServeArgs};
use escrow_cli::sweep::{run_sweep, SweepArgs};
use escrow_cli::telemetry::init_tracing;
use escrow_cli::verify::{run_verify_audit, VerifyAuditArgs};

/// Escrow engine: milestone payments and dispute resolution.
#[derive(Parser, Debug)]
#[command(name = "escrowd", version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API with the scheduler and settlement dispatcher.
    Serve(ServeArgs),

    /// Run one deadline sweep and print the report.
    Sweep(SweepArgs),

    /// Verify an exported audit chain.
    VerifyAudit(VerifyAuditArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Tracing is not initialised yet.
            eprintln!("escrowd: {e}");
            return ExitCode::from(2);
        }
    };
    init_tracing(config.log_format, cli.verbose);

    let result = match cli.command {
        Commands::Serve(args) => run_serve(&args, config).await,
        Commands::Sweep(args) => run_sweep(&args, config).await,
        Commands::VerifyAudit(args) => run_verify_audit(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_accepts_port_override() {
        let cli = Cli::try_parse_from(["escrowd", "serve", "--port", "9090"]).unwrap();
        match cli.command {
            Commands::Serve(args) => assert_eq!(args.port, Some(9090)),
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn serve_port_defaults_to_config() {
        let cli = Cli::try_parse_from(["escrowd", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve(ServeArgs { port: None })));
    }

    #[test]
    fn verbosity_is_global() {
        let cli = Cli::try_parse_from(["escrowd", "sweep", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Sweep(SweepArgs { no_dispatch: false })));
    }

    #[test]
    fn verify_audit_requires_a_file() {
        assert!(Cli::try_parse_from(["escrowd", "verify-audit"]).is_err());
        let cli = Cli::try_parse_from(["escrowd", "verify-audit", "chain.json"]).unwrap();
        match cli.command {
            Commands::VerifyAudit(args) => assert_eq!(args.file.to_str(), Some("chain.json")),
            other => panic!("expected verify-audit, got {other:?}"),
        }
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["escrowd", "migrate"]).is_err());
    }
}
