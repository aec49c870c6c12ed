use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use finlytic::config::Config;
use finlytic::models::Expense;
use finlytic::runtime::Runtime;
use finlytic::services::{budget_progress, Fetched};
use finlytic::sync::{Submission, SyncOperation};
use finlytic::{app, logging};

#[derive(Parser, Debug)]
#[command(name = "finlytic")]
#[command(about = "Offline-first sync core and dashboard for Finlytic")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/finlytic/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Verbose logging
  #[arg(short, long, global = true)]
  debug: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, pending mutations and the last sync
  Status,
  /// Replay pending mutations now
  Sync {
    /// Also pull every record for the user from the remote store
    #[arg(long)]
    full: bool,
  },
  /// Live sync dashboard
  Watch,
  /// Manage expenses
  Expense {
    #[command(subcommand)]
    command: ExpenseCommand,
  },
  /// Spending summary for a year
  Summary {
    /// Year (default: current)
    #[arg(long)]
    year: Option<i32>,
  },
  /// Manage categories
  Categories {
    #[command(subcommand)]
    command: CategoryCommand,
  },
}

#[derive(Subcommand, Debug)]
enum ExpenseCommand {
  /// Record an expense
  Add {
    #[arg(long)]
    amount: f64,
    #[arg(long)]
    category: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Day of the expense, YYYY-MM-DD (default: now)
    #[arg(long)]
    date: Option<String>,
  },
  /// List expenses
  List {
    /// First day, YYYY-MM-DD
    #[arg(long)]
    from: Option<String>,
    /// Last day (inclusive), YYYY-MM-DD
    #[arg(long)]
    to: Option<String>,
    #[arg(long)]
    category: Option<String>,
  },
  /// Delete an expense by id
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
  /// Create the default categories the user is missing
  Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // The dashboard owns the terminal, so it logs to a file
  let _log_guard = if matches!(args.command, Command::Watch) {
    Some(logging::init_file(&config.data_dir()?.join("logs"), args.debug)?)
  } else {
    logging::init_stderr(args.debug);
    None
  };

  let runtime = Runtime::new(config)?;
  runtime.start().await;

  let result = run(&runtime, args.command).await;
  runtime.shutdown();
  result
}

async fn run(runtime: &Runtime, command: Command) -> Result<()> {
  match command {
    Command::Status => print_status(runtime),
    Command::Sync { full } => sync(runtime, full).await,
    Command::Watch => app::App::new(runtime.clone()).run().await,
    Command::Expense { command } => expense(runtime, command).await,
    Command::Summary { year } => summary(runtime, year).await,
    Command::Categories {
      command: CategoryCommand::Seed,
    } => {
      let created = runtime
        .services
        .categories
        .seed_defaults(runtime.user_id())
        .await?;
      println!("Created {} categories", created.len());
      for category in created {
        println!("  {}  {}", category.id, category.name);
      }
      Ok(())
    }
  }
}

fn print_status(runtime: &Runtime) -> Result<()> {
  let connectivity = runtime.connectivity.state();
  let transports: Vec<&str> = connectivity.transports.iter().map(|t| t.as_str()).collect();
  let last = runtime
    .sync
    .last_sync_at()
    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());

  println!("user:         {}", runtime.user_id());
  println!(
    "connectivity: {} ({})",
    if connectivity.is_online { "online" } else { "offline" },
    transports.join(", ")
  );
  println!("last sync:    {}", last);

  let pending = runtime.sync.pending_items();
  println!("pending:      {}", pending.len());
  for item in pending {
    println!(
      "  {:<7} {:<9} {}  retries={}  queued={}",
      item.operation,
      item.entity_kind,
      item.entity_id,
      item.retry_count,
      item.enqueued_at.to_rfc3339()
    );
  }
  Ok(())
}

async fn sync(runtime: &Runtime, full: bool) -> Result<()> {
  if full {
    let report = runtime.sync.force_sync_all(runtime.user_id()).await?;
    if let Some(status) = &report.pass {
      println!(
        "replay: {} ({} synced, {} failed)",
        status.state.as_str(),
        status.synced_items,
        status.failed_items
      );
    }
    for (kind, count) in &report.refreshed {
      println!("pulled {:<9} {}", kind.as_str(), count);
    }
    for (kind, error) in &report.failed {
      println!("failed {:<9} {}", kind.as_str(), error);
    }
    return Ok(());
  }

  match runtime.sync.sync_pending_items().await {
    Some(status) => {
      println!(
        "{}: {}/{} synced, {} failed, {} deferred",
        status.state.as_str(),
        status.synced_items,
        status.total_items,
        status.failed_items,
        status.deferred_items
      );
      for error in status.errors {
        println!(
          "  {} {} {} (attempt {}{}): {}",
          error.operation,
          error.entity_kind,
          error.entity_id,
          error.attempt,
          if error.dropped { ", dropped" } else { "" },
          error.message
        );
      }
    }
    None => println!("Nothing to sync"),
  }
  Ok(())
}

async fn expense(runtime: &Runtime, command: ExpenseCommand) -> Result<()> {
  let expenses = &runtime.services.expenses;
  let user_id = runtime.user_id();

  match command {
    ExpenseCommand::Add {
      amount,
      category,
      description,
      date,
    } => {
      let mut expense = Expense::new(user_id, amount, category, description);
      if let Some(date) = date {
        expense = expense.with_date(parse_day(&date)?);
      }
      let submission = runtime.sync.submit(SyncOperation::Create, expense).await?;
      report_submission(runtime, submission.map(|e| e.id))
    }
    ExpenseCommand::List { from, to, category } => {
      let Fetched { data, source } = match (from, to, category) {
        (None, None, Some(category)) => expenses.get_for_category(user_id, &category).await,
        (None, None, None) => expenses.get_for_user(user_id).await,
        (from, to, category) => {
          let from = from.as_deref().map(parse_day).transpose()?;
          let to = to.as_deref().map(end_of_day).transpose()?;
          let fetched = expenses
            .get_for_date_range(
              user_id,
              from.unwrap_or(parse_day("1970-01-01")?),
              to.unwrap_or(end_of_day("9999-12-31")?),
            )
            .await;
          match category {
            Some(category) => fetched.map(|list| {
              list
                .into_iter()
                .filter(|e| e.category_id == category)
                .collect()
            }),
            None => fetched,
          }
        }
      };

      let mut data: Vec<Expense> = data;
      data.sort_by(|a, b| b.date.cmp(&a.date));
      for e in &data {
        println!(
          "{}  {}  {:>10.2}  {:<14} {}",
          e.id,
          e.date.format("%Y-%m-%d"),
          e.amount,
          e.category_id,
          e.description
        );
      }
      println!("{} expenses ({:?})", data.len(), source);
      Ok(())
    }
    ExpenseCommand::Delete { id } => {
      let submission = runtime.sync.submit_delete::<Expense>(&id).await?;
      report_submission(runtime, submission.map(|()| id))
    }
  }
}

fn report_submission(runtime: &Runtime, submission: Submission<String>) -> Result<()> {
  match submission {
    Submission::Applied(id) => println!("Saved {}", id),
    Submission::Queued(item_id) => {
      println!("Remote unreachable; queued as {}", item_id);
      if !runtime.config.sync.persist_queue {
        println!("Set sync.persist_queue: true to keep queued changes across runs");
      }
    }
  }
  Ok(())
}

async fn summary(runtime: &Runtime, year: Option<i32>) -> Result<()> {
  let user_id = runtime.user_id();
  let now = Utc::now();
  let year = year.unwrap_or_else(|| now.year());

  let months = runtime.services.expenses.monthly_totals(user_id, year).await;
  if months.is_fallback() {
    println!("(offline: showing cached data)");
  }

  println!("{}", year);
  let mut total = 0.0;
  for month in &months.data {
    total += month.total;
    println!("  {:02}  {:>10.2}  ({} expenses)", month.month, month.total, month.count);
  }
  println!("  total {:>9.2}", total);

  let budgets = runtime.services.budgets.active_budgets(user_id, now).await.data;
  if budgets.is_empty() {
    return Ok(());
  }

  println!("Budgets");
  for budget in budgets {
    let spent = runtime
      .services
      .expenses
      .get_for_date_range(user_id, budget.start_date, budget.end_date)
      .await
      .data;
    let progress = budget_progress(&budget, &spent);
    let flag = if progress.exceeded {
      "  EXCEEDED"
    } else if progress.alert {
      "  ALERT"
    } else {
      ""
    };
    println!(
      "  {:<14} {:>8.2} / {:>8.2}  ({:.0}%){}",
      budget.category_id,
      progress.spent,
      budget.amount,
      progress.ratio * 100.0,
      flag
    );
  }
  Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| eyre!("Invalid date '{}': {}", s, e))
}

/// Start of the given day, UTC.
fn parse_day(s: &str) -> Result<DateTime<Utc>> {
  let day = parse_date(s)?;
  day
    .and_hms_opt(0, 0, 0)
    .map(|t| Utc.from_utc_datetime(&t))
    .ok_or_else(|| eyre!("Invalid date '{}'", s))
}

/// Last second of the given day, UTC.
fn end_of_day(s: &str) -> Result<DateTime<Utc>> {
  let day = parse_date(s)?;
  day
    .and_hms_opt(23, 59, 59)
    .map(|t| Utc.from_utc_datetime(&t))
    .ok_or_else(|| eyre!("Invalid date '{}'", s))
}
