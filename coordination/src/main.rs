//! Command-line access to a project's persisted swarm state
//!
//! Barriers and elections live only as long as the process that created
//! them, so the CLI covers what survives restarts: worktree membership and
//! task partitions.
//!
//! # Usage
//!
//! ```bash
//! # Inspect
//! coordination --directory ./my-project status
//! coordination worktrees
//! coordination show-partition build
//!
//! # Mutate (each command flushes before exiting)
//! coordination register agent-1 .worktrees/wt-1
//! coordination unregister agent-1 .worktrees/wt-1
//! coordination partition build 3 --strategy round-robin --task '{"goal":"fix lints"}'
//!
//! # Custom configuration
//! SWARM_STATE_DIR=.swarm RUST_LOG=coordination=debug coordination status
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use coordination::{SwarmConfig, SwarmCoordinator, TaskFields};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project directory whose swarm state to use (defaults to the current directory)
    #[arg(long, global = true)]
    directory: Option<PathBuf>,

    /// TOML config file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show active barriers, elections, partitions and membership counts
    Status,

    /// List every worktree with its registered agents
    Worktrees,

    /// Register an agent under a worktree
    Register {
        agent_id: String,
        worktree: PathBuf,
    },

    /// Remove an agent from a worktree
    Unregister {
        agent_id: String,
        worktree: PathBuf,
    },

    /// Split a task into per-agent partitions
    Partition {
        partition_id: String,
        agent_count: usize,

        /// `round-robin` or `hash`
        #[arg(long, default_value = "round-robin")]
        strategy: String,

        /// Task fields as a JSON object
        #[arg(long, default_value = "{}")]
        task: String,
    },

    /// Print a stored partition set
    ShowPartition { partition_id: String },
}

#[derive(Serialize)]
struct WorktreeListing {
    worktree: PathBuf,
    agents: Vec<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coordination=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => SwarmConfig::from_file(path)?,
        None => SwarmConfig::from_env(),
    };

    let directory = match args.directory {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let swarm = SwarmCoordinator::open(&directory, config).await;
    tracing::debug!(
        "Swarm state file: {}",
        swarm.config().state_path(swarm.directory()).display()
    );

    match args.command {
        Command::Status => print_json(&swarm.status())?,

        Command::Worktrees => {
            let listing: Vec<WorktreeListing> = swarm
                .all_worktrees()
                .into_iter()
                .map(|worktree| WorktreeListing {
                    agents: swarm.worktree_agents(&worktree),
                    worktree,
                })
                .collect();
            print_json(&listing)?;
        }

        Command::Register { agent_id, worktree } => {
            let key = swarm.register_worktree_agent(&agent_id, &worktree);
            swarm.flush().await?;
            println!("Registered {} under {}", agent_id, key.display());
        }

        Command::Unregister { agent_id, worktree } => {
            let removed = swarm.unregister_worktree_agent(&agent_id, &worktree);
            swarm.flush().await?;
            if removed {
                println!("Unregistered {} from {}", agent_id, worktree.display());
            } else {
                println!("{} was not registered under {}", agent_id, worktree.display());
            }
        }

        Command::Partition {
            partition_id,
            agent_count,
            strategy,
            task,
        } => {
            let task: TaskFields =
                serde_json::from_str(&task).context("--task must be a JSON object")?;
            let partitions = swarm.partition_task(&partition_id, &task, agent_count, &strategy)?;
            swarm.flush().await?;
            print_json(&partitions)?;
        }

        Command::ShowPartition { partition_id } => match swarm.partition(&partition_id) {
            Some(set) => print_json(&set)?,
            None => anyhow::bail!("No partition named {}", partition_id),
        },
    }

    Ok(())
}
