//! Remote command channel.
//!
//! A [`RemoteExec`] runs shell commands on the remote host, one SSH channel
//! per command. Short commands are run to completion with [`RemoteExec::exec`];
//! the sshfs process that backs a mount is started with [`RemoteExec::spawn`]
//! and stays attached until it exits or is closed.

mod session;

#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use thiserror::Error;

pub use session::{SshProcess, SshSession, SshTarget, connect};

#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("SSH authentication rejected for user {user}")]
    AuthRejected { user: String },

    #[error("failed to read SSH key {path}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode SSH key {path}: {message}")]
    KeyDecode { path: String, message: String },

    #[error("SSH channel error: {0}")]
    Channel(#[from] russh::Error),

    #[error("'{command}' finished without reporting an exit status")]
    NoExitStatus { command: String },
}

/// Result of one remote command run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_status: u32,
    pub output: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[async_trait]
pub trait RemoteExec: Send {
    type Process: RemoteProcess;

    /// Run `command` and wait for it to finish.
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, SshError>;

    /// Start `command` without waiting for it to finish.
    async fn spawn(&mut self, command: &str) -> Result<Self::Process, SshError>;
}

#[async_trait]
pub trait RemoteProcess: Send {
    /// Wait until the process ends. `None` when the channel closed without
    /// an exit status.
    async fn wait(&mut self) -> Result<Option<u32>, SshError>;

    /// Close the channel, ending the remote process.
    async fn close(&mut self) -> Result<(), SshError>;
}
