// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pvelab")]
#[command(about = "Provision a Proxmox LXC lab over SSH")]
#[command(version)]
pub struct Cli {
    /// Path to the lab configuration (defaults to lab.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter lab.yml in the current directory
    Init {
        /// Lab name
        #[arg(long)]
        name: Option<String>,

        /// Proxmox host as [user@]host[:port]
        #[arg(long)]
        host: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Provision the lab, optionally limited to a step window
    Deploy {
        /// First step to execute; earlier steps are skipped
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        start_step: Option<u32>,

        /// Last step to execute; the run stops successfully after it
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        end_step: Option<u32>,

        /// Break a deploy lock held by another run
        #[arg(short, long)]
        force: bool,
    },

    /// Destroy the lab's containers and template archives
    Cleanup,

    /// Show what exists on the host
    Status,
}
