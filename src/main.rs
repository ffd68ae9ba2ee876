use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use redmirror::config::Config;
use redmirror::redmine::types::IssueField;
use redmirror::redmine::RedmineConnector;
use redmirror::store::{MemoryQueryStore, QueryStore, YamlQueryStore};
use redmirror::{interactive, IssueEvent, RemoteContext, SavedQuery, SavedQueryConfig};

#[derive(Parser, Debug)]
#[command(name = "redmirror")]
#[command(about = "Live local mirrors of Redmine issues and saved queries")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/redmirror/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Context id or name (default: the configured default context)
  #[arg(short = 'x', long)]
  context: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print every field of an issue
  Show { id: String },
  /// Look an issue up by id or by words in its subject
  Search { text: String },
  /// Keep issues and auto-refreshing queries open and print their changes
  Watch {
    ids: Vec<String>,
    /// Also watch every saved query with auto refresh on
    #[arg(long)]
    queries: bool,
  },
  /// Manage saved queries
  Queries {
    #[command(subcommand)]
    action: QueryAction,
  },
  /// Show the current user and server reference data
  Info,
}

#[derive(Subcommand, Debug)]
enum QueryAction {
  List,
  Add {
    name: String,
    summary: String,
    /// Project identifier (default: the context's project)
    #[arg(long)]
    project: Option<String>,
    /// Leave the query out of periodic refresh
    #[arg(long)]
    no_auto_refresh: bool,
  },
  Remove { name: String },
  Run { name: String },
  /// Turn periodic refresh of a saved query on, or off with --off
  AutoRefresh {
    name: String,
    #[arg(long)]
    off: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = redmirror::logging::init(args.log_file.as_deref())?;

  // Remote work is dispatched to the worker pool from here on
  interactive::mark_current_thread();

  let config = Config::load(args.config.as_deref())?;
  let context_config = config.context(args.context.as_deref())?;

  let store: Arc<dyn QueryStore> = match YamlQueryStore::default_location() {
    Some(store) => Arc::new(store),
    None => Arc::new(MemoryQueryStore::new()),
  };
  let context = RemoteContext::from_config(
    context_config,
    &config.refresh,
    Config::debug_overrides(),
    store,
    Arc::new(RedmineConnector),
  );
  info!("using context {}", context.tooltip());

  let worker = Arc::clone(&context);
  interactive::dispatch(async move { run(worker, args.command).await }).await??;
  Ok(())
}

async fn run(context: Arc<RemoteContext>, command: Command) -> Result<()> {
  match command {
    Command::Show { id } => show(&context, &id).await,
    Command::Search { text } => search(&context, &text).await,
    Command::Watch { ids, queries } => watch(&context, &ids, queries).await,
    Command::Queries { action } => queries(&context, action).await,
    Command::Info => show_info(&context).await,
  }
}

async fn show(context: &RemoteContext, id: &str) -> Result<()> {
  let issue = context.fetch_issue(id).await?;
  if !issue.refresh().await {
    return Err(eyre!("Failed to load details of issue {}", id));
  }

  println!("{}", issue.display_name());
  for field in IssueField::ALL {
    if let Some(value) = issue.field(field) {
      println!("  {:<16} {}", field.label(), value);
    }
  }

  let snapshot = issue.snapshot();
  if !snapshot.attachments.is_empty() {
    println!("\nAttachments:");
    for a in &snapshot.attachments {
      println!("  {} ({} bytes)", a.file_name, a.file_size);
    }
  }
  let notes: Vec<_> = snapshot
    .journals
    .iter()
    .filter_map(|j| j.notes.as_deref().filter(|n| !n.trim().is_empty()).map(|n| (j, n)))
    .collect();
  if !notes.is_empty() {
    println!("\nHistory:");
    for (journal, note) in notes {
      let who = journal
        .user
        .as_ref()
        .map(|u| u.name.as_str())
        .unwrap_or("?");
      println!("  {}: {}", who, note);
    }
  }
  Ok(())
}

async fn search(context: &RemoteContext, text: &str) -> Result<()> {
  let found = context.simple_search(text).await?;
  if found.is_empty() {
    println!("No issues match {:?}", text);
  }
  for issue in found {
    println!("{}", issue.display_name());
  }
  Ok(())
}

async fn watch(context: &Arc<RemoteContext>, ids: &[String], with_queries: bool) -> Result<()> {
  let mut tasks = Vec::new();

  for id in ids {
    let issue = context.fetch_issue(id).await?;
    let mut events = issue.add_change_listener();
    issue.open().await;
    println!("watching {}", issue.display_name());

    let watched = Arc::clone(&issue);
    tasks.push(tokio::spawn(async move {
      while let Some(IssueEvent::DataChanged) = events.next().await {
        println!("changed: {}", watched.display_name());
      }
    }));
  }

  if with_queries {
    for query in context.queries().into_iter().filter(|q| q.auto_refresh()) {
      let mut events = query.add_change_listener();
      context.schedule_query_refresh(&query);
      println!("watching query {}", query.name());

      let name = query.name().to_string();
      tasks.push(tokio::spawn(async move {
        while let Some(redmirror::query::QueryEvent::ResultsChanged(diff)) = events.next().await {
          println!("{}: +{:?} -{:?}", name, diff.added, diff.removed);
        }
      }));
    }
  }

  if tasks.is_empty() {
    return Err(eyre!("Nothing to watch"));
  }

  tokio::signal::ctrl_c().await?;
  for id in ids {
    if let Some(issue) = context.cached_issue(id) {
      issue.close();
    }
  }
  for task in tasks {
    task.abort();
  }
  Ok(())
}

async fn queries(context: &RemoteContext, action: QueryAction) -> Result<()> {
  match action {
    QueryAction::List => {
      for query in context.queries() {
        let config = query.to_config();
        println!(
          "{:<24} *{}*{}{}",
          config.name,
          config.summary,
          config
            .project
            .map(|p| format!(" in {}", p))
            .unwrap_or_default(),
          if config.auto_refresh { "" } else { " (manual)" }
        );
      }
    }
    QueryAction::Add {
      name,
      summary,
      project,
      no_auto_refresh,
    } => {
      let mut config = SavedQueryConfig::new(name, summary);
      config.project = project;
      config.auto_refresh = !no_auto_refresh;
      context.save_query(SavedQuery::new(config));
    }
    QueryAction::Remove { name } => {
      context
        .remove_query(&name)
        .ok_or_else(|| eyre!("No saved query named {}", name))?;
    }
    QueryAction::AutoRefresh { name, off } => {
      if !context.set_query_auto_refresh(&name, !off) {
        return Err(eyre!("No saved query named {}", name));
      }
    }
    QueryAction::Run { name } => {
      let query = context
        .query(&name)
        .ok_or_else(|| eyre!("No saved query named {}", name))?;
      context.run_query(&query).await?;
      for issue in query.issues() {
        println!("{}", issue.display_name());
      }
    }
  }
  Ok(())
}

async fn show_info(context: &RemoteContext) -> Result<()> {
  let user = context.current_user().await?;
  println!("{} ({})", user.display_name(), user.login);
  if let Some(key) = context.project_key() {
    let project = context.project().await?;
    println!("Project: {} [{}]", project.name, key);
  }

  let trackers: Vec<_> = context.trackers().await.into_iter().map(|t| t.name).collect();
  println!("Trackers: {}", trackers.join(", "));
  let statuses: Vec<_> = context.statuses().await.into_iter().map(|s| s.name).collect();
  println!("Statuses: {}", statuses.join(", "));
  let priorities: Vec<_> = context
    .issue_priorities()
    .await
    .into_iter()
    .map(|p| p.name)
    .collect();
  println!("Priorities: {}", priorities.join(", "));
  Ok(())
}
