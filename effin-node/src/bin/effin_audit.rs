//! effin-audit - offline reader for a node's encrypted audit ledger

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use effin_common::config::NodeConfig;
use effin_common::crypto::LedgerCipher;
use effin_node::audit::{read_ledger, LedgerLine, LedgerSummary};

#[derive(Parser, Debug)]
#[command(name = "effin-audit", version, about = "Read an effin-node audit ledger")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the newest ledger entries as JSON lines
    Tail {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Number of entries
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Print processed/alert counts and the cross-bank alert matrix
    Summary {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Generate a fresh base64 ledger key
    Keygen,
}

#[derive(clap::Args, Debug)]
struct LedgerArgs {
    /// Ledger file (defaults to the node's configured audit file)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Base64 ledger key
    #[arg(short, long, env = "EFFIN_AUDIT_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Node TOML config used to locate the ledger
    #[arg(short, long, env = "EFFIN_CONFIG")]
    config: Option<PathBuf>,
}

impl LedgerArgs {
    fn resolve(&self) -> Result<(PathBuf, LedgerCipher)> {
        let config = NodeConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        let file = self.file.clone().unwrap_or(config.audit.file);
        let key = self
            .key
            .clone()
            .or(config.audit.key)
            .context("A ledger key is required (--key or EFFIN_AUDIT_KEY)")?;
        let cipher = LedgerCipher::from_base64_key(&key).context("Invalid ledger key")?;
        Ok((file, cipher))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Keygen => {
            println!("{}", LedgerCipher::generate_key());
        }
        Command::Tail { ledger, lines } => {
            let (file, cipher) = ledger.resolve()?;
            let entries = read_ledger(&file, &cipher, Some(lines))
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            for line in &entries {
                println!("{}", render_line(line)?);
            }
        }
        Command::Summary { ledger, json } => {
            let (file, cipher) = ledger.resolve()?;
            let entries = read_ledger(&file, &cipher, None)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = LedgerSummary::from_lines(&entries);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&file, &summary);
            }
        }
    }
    Ok(())
}

fn render_line(line: &LedgerLine) -> Result<String> {
    Ok(match line {
        LedgerLine::Entry(entry) => serde_json::to_string(entry)?,
        LedgerLine::DecryptFailed { line } => {
            serde_json::json!({ "error": "decrypt_failed", "line": line }).to_string()
        }
    })
}

fn print_summary(file: &std::path::Path, s: &LedgerSummary) {
    println!("Ledger:            {}", file.display());
    println!("Processed:         {}", s.processed);
    println!("Labelled fraud:    {}", s.labelled_fraud);
    println!("Alerts:            {}", s.alerts);
    println!("Alert rate:        {:.2}%", s.alert_rate_percent);
    println!("Throughput:        {:.2} tx/s", s.throughput_tps);
    if let (Some(first), Some(last)) = (s.first_processed, s.last_processed) {
        println!("Covered:           {} .. {}", first.to_rfc3339(), last.to_rfc3339());
    }
    if s.decrypt_failed > 0 {
        println!("Undecryptable:     {}", s.decrypt_failed);
    }
    if !s.cross_bank.is_empty() {
        println!();
        println!("Cross-bank alerts:");
        for (origin, matches) in &s.cross_bank {
            for (matched, count) in matches {
                println!("  {} -> {}: {}", origin, matched, count);
            }
        }
    }
}
