#![forbid(unsafe_code)]
//! Offline inspection and maintenance of a Redoom ledger database

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::Table;
use redoom_ledger::blockchain::{Ledger, Payload, PayloadValue};
use redoom_ledger::config::load_config_from;
use redoom_ledger::miner::CancelToken;
use redoom_ledger::persistence::{Database, Persistence};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = redoom_ledger::config::DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-derives every digest and checks linkage
    Verify,
    /// Lists stored records
    List {
        /// Only show the last N records
        #[arg(long)]
        last: Option<usize>,
    },
    /// Mines and stores a transfer-shaped record
    Append {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: i64,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = load_config_from(&cli.config)?;
    let db = Database::open(&config.database.path)?;
    let records = db.load_records()?;
    let mut ledger = if records.is_empty() {
        let ledger = Ledger::new(config.ledger.difficulty)?;
        db.save_record(0, ledger.genesis())?;
        ledger
    } else {
        Ledger::from_records(records, config.ledger.difficulty)?
    };

    match cli.command {
        Commands::Verify => verify(&ledger),
        Commands::List { last } => list(&ledger, last),
        Commands::Append {
            from,
            to,
            amount,
            timeout_secs,
        } => append(&mut ledger, &db, from, to, amount, timeout_secs)?,
    }

    Ok(())
}

fn verify(ledger: &Ledger) {
    println!("{} {} records", "Checking".bright_cyan(), ledger.len());
    match ledger.first_violation() {
        None => println!("{}", "Ledger is valid".bright_green()),
        Some(violation) => println!("{} {}", "Ledger is broken:".bright_red(), violation),
    }
    if let Some(index) = ledger.audit_work() {
        println!(
            "{} record {} does not meet difficulty {}",
            "Note:".yellow(),
            index,
            ledger.difficulty()
        );
    }
}

fn list(ledger: &Ledger, last: Option<usize>) {
    let skip = last.map_or(0, |n| ledger.len().saturating_sub(n));
    let mut table = Table::new();
    table.set_header(vec!["Height", "Digest", "Previous", "Timestamp", "Nonce", "Payload"]);
    for (height, record) in ledger.records().iter().enumerate().skip(skip) {
        table.add_row(vec![
            height.to_string(),
            record.digest.clone(),
            record.previous_digest.clone(),
            record.canonical_timestamp(),
            record.nonce.to_string(),
            record.payload.canonical_json(),
        ]);
    }
    println!("{table}");
}

fn append(
    ledger: &mut Ledger,
    db: &Database,
    from: String,
    to: String,
    amount: i64,
    timeout_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(violation) = ledger.first_violation() {
        return Err(format!("refusing to extend a broken ledger: {}", violation).into());
    }

    let payload = Payload::new()
        .with("from", from)
        .with("to", to)
        .with("amount", PayloadValue::Integer(amount));
    let cancel = match timeout_secs {
        Some(secs) => CancelToken::with_deadline(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    println!("{} at difficulty {}...", "Mining".bright_cyan(), ledger.difficulty());
    let start = Instant::now();
    let record = ledger.append_with_commit(payload, &cancel, |height, record| db.save_record(height, record))?;

    println!("{}", "Record sealed".bright_green());
    println!("  Height:   {}", ledger.len() - 1);
    println!("  Digest:   {}", record.digest);
    println!("  Previous: {}", record.previous_digest);
    println!("  Nonce:    {}", record.nonce);
    println!("  Time:     {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}
