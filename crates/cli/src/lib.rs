pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lawnpeak_core::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "lawnpeak",
    about = "Lawn Peak booking CLI",
    long_about = "Price lawn-care quotes, run bookings against the booking API, and operate the admin charge desk.",
    after_help = "Examples:\n  lawnpeak price --lot-size medium --frequency weekly\n  lawnpeak book --draft booking.json\n  lawnpeak resume --query 'setup=canceled'\n  lawnpeak admin list"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Price one lot size and service frequency with a step-by-step trace")]
    Price {
        #[arg(long, help = "SMALL, MEDIUM, LARGE or XLARGE")]
        lot_size: String,
        #[arg(long, help = "ONE_TIME, WEEKLY, BI_WEEKLY or MONTHLY")]
        frequency: String,
        #[arg(long, help = "Referral discount as a fraction, e.g. 0.1")]
        referral_discount: Option<String>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the price of every lot size and frequency combination")]
    Table {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Submit a booking draft and print the payment setup redirect")]
    Book {
        #[arg(long, help = "Path to a JSON booking draft")]
        draft: PathBuf,
    },
    #[command(about = "Handle the return from payment setup (setup=success or setup=canceled)")]
    Resume {
        #[arg(long, help = "Return URL or query string carrying the setup parameter")]
        query: String,
    },
    #[command(about = "Operate the admin charge desk")]
    Admin {
        #[arg(long, help = "Admin password (defaults to LAWNPEAK_ADMIN_PASSWORD)")]
        password: Option<String>,
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Debug, Subcommand)]
enum AdminAction {
    #[command(about = "List customers and their charge status")]
    List,
    #[command(about = "Collect the agreed price from a customer's saved payment method")]
    Charge {
        #[arg(long, help = "Customer id as listed by `admin list`")]
        customer: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Price { lot_size, frequency, referral_discount, json } => {
            commands::price::run(&lot_size, &frequency, referral_discount.as_deref(), json)
        }
        Command::Table { json } => commands::price::table(json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Book { draft } => commands::book::run(&draft),
        Command::Resume { query } => commands::book::resume(&query),
        Command::Admin { password, action } => match action {
            AdminAction::List => commands::admin::list(password),
            AdminAction::Charge { customer } => commands::admin::charge(password, &customer),
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so stdout stays a clean
/// command payload.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
