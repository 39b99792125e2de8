//! kioskctl — offline administration for the kiosk ledger.
//!
//! Works directly on the data directory and is meant to be run while the
//! server is stopped. This is how the first administrator account is made.

mod commands;

use clap::{Parser, Subcommand};
use kiosk_core::LedgerStore;
use std::path::PathBuf;
use tracing::error;

/// kioskctl — kiosk ledger administration
#[derive(Parser)]
#[command(name = "kioskctl", version, about = "Offline administration for the kiosk ledger")]
struct Cli {
    /// Directory holding ledger.json and settings.json
    #[arg(long, global = true, default_value = "~/.kiosk")]
    data_dir: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage user accounts
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Show recent session history
    Logs {
        /// Number of entries to show, newest last
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Revenue and usage totals
    Stats {
        /// today, week or all
        #[arg(long, default_value = "today")]
        period: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create an account
    Add {
        name: String,

        /// Create an administrator (never billed)
        #[arg(long)]
        admin: bool,

        /// Hourly rate
        #[arg(long, default_value_t = 0.0)]
        rate: f64,

        /// Starting balance
        #[arg(long, default_value_t = 0.0)]
        balance: f64,

        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Change an account's password
    Passwd {
        name: String,

        /// New password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// List accounts
    List,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kioskctl=debug,kiosk_core=debug"
    } else {
        "kioskctl=warn,kiosk_core=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let store = match LedgerStore::open(&expand_tilde(&cli.data_dir)) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot open data directory");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::User { action } => match action {
            UserCommand::Add {
                name,
                admin,
                rate,
                balance,
                password,
            } => commands::user::add(&store, &name, admin, rate, balance, password),
            UserCommand::Passwd { name, password } => {
                commands::user::passwd(&store, &name, password)
            }
            UserCommand::List => commands::user::list(&store),
        },
        Command::Logs { limit, json } => commands::logs::run(&store, limit, json),
        Command::Stats { period, json } => commands::stats::run(&store, &period, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
