use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sshmount",
    about = "Mount local directories into remote hosts over SSHFS"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sshmount.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the configured shares and hold them until Ctrl-C
    Mount {
        /// Only mount the share with this target
        #[arg(long)]
        target: Option<String>,
    },

    /// Install the multipass-sshfs snap on the remote host
    Install,
}
