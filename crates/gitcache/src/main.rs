use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;

use crate::commands::ExitStatus;

mod commands;
mod logging;
mod printer;

/// `GITCACHE_VERBOSE=true` enables verbose logs without `-v`.
const GITCACHE_VERBOSE: &str = "GITCACHE_VERBOSE";

#[derive(Parser)]
#[command(name = "gitcache", author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Do not print any output.
    #[arg(global = true, long, short, conflicts_with = "verbose")]
    quiet: bool,

    /// Use verbose output.
    #[arg(global = true, long, short, env = GITCACHE_VERBOSE)]
    verbose: bool,

    /// Path to the cache directory (default: `~/.gitcache`).
    #[arg(global = true, long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a repository and optionally build its tarball.
    Add(AddArgs),
    /// Accelerate the lockfile's Git dependencies, then run `npm install`.
    Install(InstallArgs),
    /// List the Git-sourced dependencies of a lockfile.
    Scan(ScanArgs),
    /// Build or fetch tarballs for every Git dependency of a lockfile.
    Prepare(PrepareArgs),
    /// Evict least-recently-used tarballs down to a size bound.
    Prune(PruneArgs),
    /// Read or write persisted settings.
    Config(ConfigArgs),
    /// Connect this machine to a registry organization.
    Setup(SetupArgs),
    /// Show cache and registry health.
    Status(StatusArgs),
    /// Manage the registry session.
    Auth(AuthArgs),
}

#[derive(Args)]
struct AddArgs {
    /// Repository URL (any npm Git spelling).
    repo: String,

    /// Resolve this ref instead of the URL fragment.
    #[arg(long = "ref")]
    reference: Option<String>,

    /// Rebuild even when a cached artifact exists.
    #[arg(long)]
    force: bool,

    /// Build the tarball, not just the ref resolution.
    #[arg(long)]
    build: bool,
}

#[derive(Args)]
struct InstallArgs {
    /// Arguments forwarded to `npm install`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    npm_args: Vec<String>,
}

#[derive(Args)]
struct ScanArgs {
    /// Lockfile to scan (default: `./package-lock.json`).
    #[arg(long)]
    lockfile: Option<PathBuf>,

    /// Emit the scan result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PrepareArgs {
    /// Lockfile to prepare (default: `./package-lock.json`).
    #[arg(long)]
    lockfile: Option<PathBuf>,

    /// Rebuild from Git even when a cache tier has the artifact.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct PruneArgs {
    /// Size bound, e.g. `500MB` or `2GB` (default: the configured value).
    #[arg(long)]
    max_size: Option<String>,

    /// Report what would be deleted without deleting.
    #[arg(long)]
    dry_run: bool,

    /// Persist `--max-size` as the configured default.
    #[arg(long, requires = "max_size")]
    set_default: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// List all settings.
    #[arg(long, conflicts_with_all = ["get", "set"])]
    list: bool,

    /// Print one setting.
    #[arg(long, value_name = "KEY")]
    get: Option<String>,

    /// Set one setting as `key=value`.
    #[arg(long, value_name = "KEY=VALUE")]
    set: Option<String>,
}

#[derive(Args)]
struct SetupArgs {
    /// Organization to connect to.
    #[arg(long, required_unless_present = "list_orgs")]
    org: Option<String>,

    /// Store a CI token instead of a user session.
    #[arg(long)]
    ci: bool,

    /// Token to store (falls back to `GITCACHE_TOKEN`).
    #[arg(long)]
    token: Option<String>,

    /// List the organizations the token can publish to.
    #[arg(long)]
    list_orgs: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Include per-tier detail.
    #[arg(long)]
    detailed: bool,

    /// Emit the status as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct AuthArgs {
    #[command(subcommand)]
    command: AuthCommands,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Store a user session for this email.
    Login {
        email: String,
        /// Token to store (falls back to `GITCACHE_TOKEN`).
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value = "default")]
        org: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show the stored session.
    Status,
    /// List available organizations.
    Orgs,
    /// Validate and store a CI token from the environment.
    SetupCi,
}

async fn inner() -> Result<ExitStatus> {
    let cli = Cli::parse();

    logging::setup_logging(if cli.verbose {
        logging::Level::Verbose
    } else {
        logging::Level::Default
    })?;

    let printer = if cli.quiet {
        printer::Printer::Quiet
    } else if cli.verbose {
        printer::Printer::Verbose
    } else {
        printer::Printer::Default
    };

    let context = commands::Context::new(cli.cache_dir, cli.verbose)?;

    match cli.command {
        Commands::Add(args) => {
            commands::add(
                &context,
                &args.repo,
                args.reference.as_deref(),
                args.force,
                args.build,
                printer,
            )
            .await
        }
        Commands::Install(args) => commands::install(&context, &args.npm_args, printer).await,
        Commands::Scan(args) => commands::scan(args.lockfile.as_deref(), args.json, printer),
        Commands::Prepare(args) => {
            commands::prepare(&context, args.lockfile.as_deref(), args.force, printer).await
        }
        Commands::Prune(args) => commands::prune(
            &context,
            args.max_size.as_deref(),
            args.dry_run,
            args.set_default,
            printer,
        ),
        Commands::Config(args) => {
            commands::config(&context, args.list, args.get.as_deref(), args.set.as_deref(), printer)
        }
        Commands::Setup(args) => {
            commands::setup(
                &context,
                args.org.as_deref(),
                args.ci,
                args.token.as_deref(),
                args.list_orgs,
                printer,
            )
            .await
        }
        Commands::Status(args) => {
            commands::status(&context, args.detailed, args.json, printer).await
        }
        Commands::Auth(args) => match args.command {
            AuthCommands::Login { email, token, org } => {
                commands::auth_login(&context, &email, token.as_deref(), &org, printer)
            }
            AuthCommands::Logout => commands::auth_logout(&context, printer),
            AuthCommands::Status => commands::auth_status(&context, printer),
            AuthCommands::Orgs => commands::auth_orgs(&context, printer).await,
            AuthCommands::SetupCi => commands::auth_setup_ci(&context, printer).await,
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A user interrupt must still run scoped cleanup (temp build dirs are
    // dropped when the command future is cancelled) before exiting 130.
    let status = tokio::select! {
        status = inner() => status,
        _ = tokio::signal::ctrl_c() => Ok(ExitStatus::Interrupted),
    };

    match status {
        Ok(status) => status.into(),
        Err(err) => {
            #[allow(clippy::print_stderr)]
            {
                let mut causes = err.chain();
                anstream::eprintln!(
                    "{}: {}",
                    "error".red().bold(),
                    causes.next().map(ToString::to_string).unwrap_or_default()
                );
                for cause in causes {
                    anstream::eprintln!("  {}: {cause}", "Caused by".red().bold());
                }
            }
            ExitStatus::Failure.into()
        }
    }
}
