mod app;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use offtask::tasks::{TaskId, TaskStatus};

#[derive(Parser, Debug)]
#[command(name = "offtask")]
#[command(about = "An offline-first task manager with a versioned asset cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offtask/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Add a task
  Add {
    title: String,

    #[arg(short, long)]
    description: Option<String>,

    /// pending, in_progress or done
    #[arg(short, long, default_value = "pending")]
    status: TaskStatus,
  },

  /// Delete a task by id
  Delete { id: TaskId },

  /// List tasks in id order
  List {
    /// Only show tasks with this status
    #[arg(short, long)]
    status: Option<TaskStatus>,
  },

  /// Show storage usage against the quota
  Usage,

  /// Install and activate the configured asset generation
  Install,

  /// Fetch an asset path through the cache
  Fetch { path: String },

  /// List stored asset generations
  Generations,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log_dir()?)?;

  let app = app::App::new(&config).await?;
  let mut stdout = std::io::stdout().lock();
  app.run(&args.command, &mut stdout).await?;

  Ok(())
}
