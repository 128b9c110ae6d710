//! Command-line subcommands.

use chrono::NaiveDate;
use clap::Subcommand;

use crate::outbox::RecordKind;
use crate::remote::MemberType;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Record a purchase and award points
  Transaction {
    #[arg(short, long)]
    member: String,
    #[arg(short, long)]
    amount: f64,
    /// trade or non-trade; read from the member when omitted
    #[arg(long)]
    member_type: Option<MemberType>,
    #[arg(short, long)]
    notes: Option<String>,
    /// Purchase date (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    date: Option<NaiveDate>,
  },

  /// Spend points on an item
  Redeem {
    #[arg(short, long)]
    member: String,
    #[arg(short, long)]
    points: i64,
    #[arg(short, long)]
    item: String,
    #[arg(short, long)]
    date: Option<NaiveDate>,
  },

  /// List writes waiting to sync
  Pending {
    /// transaction or redemption
    #[arg(short, long)]
    kind: Option<RecordKind>,
  },

  /// Sync pending writes now
  Sync {
    #[arg(short, long)]
    kind: Option<RecordKind>,
  },

  /// Delete synced records confirmed more than N days ago
  Prune {
    #[arg(long, default_value_t = 30)]
    older_than_days: i64,
  },

  /// Manage the response cache
  Cache {
    #[command(subcommand)]
    action: CacheCommand,
  },

  /// Run the sync service until interrupted
  Serve,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
  /// Pre-cache the manifest for the configured version
  Install,
  /// Delete namespaces of older versions
  Activate,
  /// Fetch a URL through the cache engine
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// List stored namespaces
  Status,
}

impl Command {
  /// Kinds a `pending`/`sync` filter selects.
  pub fn kinds(filter: Option<RecordKind>) -> Vec<RecordKind> {
    match filter {
      Some(kind) => vec![kind],
      None => RecordKind::ALL.to_vec(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("loyalty-sync").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn test_transaction_arguments() {
    let command = parse(&[
      "transaction",
      "--member",
      "M1",
      "--amount",
      "25.5",
      "--member-type",
      "trade",
      "--date",
      "2024-03-01",
    ]);

    assert_eq!(
      command,
      Command::Transaction {
        member: "M1".to_string(),
        amount: 25.5,
        member_type: Some(MemberType::Trade),
        notes: None,
        date: NaiveDate::from_ymd_opt(2024, 3, 1),
      }
    );
  }

  #[test]
  fn test_kind_filter() {
    assert_eq!(
      parse(&["pending", "--kind", "redemption"]),
      Command::Pending {
        kind: Some(RecordKind::Redemption)
      }
    );
    assert!(Cli::try_parse_from(["loyalty-sync", "sync", "--kind", "referral"]).is_err());
    assert_eq!(Command::kinds(None), RecordKind::ALL.to_vec());
  }

  #[test]
  fn test_cache_subcommands() {
    assert_eq!(
      parse(&["cache", "fetch", "https://club.example/", "--navigate"]),
      Command::Cache {
        action: CacheCommand::Fetch {
          url: "https://club.example/".to_string(),
          navigate: true,
        }
      }
    );
    assert_eq!(
      parse(&["prune"]),
      Command::Prune { older_than_days: 30 }
    );
  }
}
