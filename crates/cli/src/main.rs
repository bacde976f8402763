mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::consts::{APP_NAME, BACKEND_ADDR_ENV, DEFAULT_BACKEND_ADDR};

use cmd::{DoArgs, ShellArgs};
use output::print_error;

/// kiln - run container builds against a build backend
#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Backend address
  #[arg(long, global = true, env = BACKEND_ADDR_ENV, default_value = DEFAULT_BACKEND_ADDR)]
  backend: String,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List backend workers and the platform builds will target
  Workers {
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },

  /// Run a session that queries one API field and solves the returned filesystem
  Do(DoArgs),

  /// Open an interactive shell on a local directory inside a build
  Shell(ShellArgs),
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Workers { json } => cmd::cmd_workers(&cli.backend, json),
    Commands::Do(args) => cmd::cmd_do(&cli.backend, args),
    Commands::Shell(args) => cmd::cmd_shell(&cli.backend, args),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
