use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg};

use super::{ExecOutput, RemoteExec, RemoteProcess, SshError};

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
}

/// Minimal russh client handler. Accepts all server keys (like
/// StrictHostKeyChecking=no); the hosts are local VMs with fresh keys.
struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH connection. Each command opens its own channel, so
/// the connection persists across calls.
pub struct SshSession {
    handle: client::Handle<SshHandler>,
}

/// Establish an SSH connection and authenticate with the target's key.
pub async fn connect(target: &SshTarget) -> Result<SshSession, SshError> {
    let config = Arc::new(client::Config::default());
    let addr = format!("{}:{}", target.host, target.port);

    tracing::debug!(addr, user = %target.user, key = %target.key_path.display(), "connecting SSH");

    let mut handle = client::connect(config, &*addr, SshHandler)
        .await
        .map_err(|source| SshError::Connect {
            addr: addr.clone(),
            source,
        })?;

    let key_path = target.key_path.display().to_string();
    let key_data =
        std::fs::read_to_string(&target.key_path).map_err(|source| SshError::KeyRead {
            path: key_path.clone(),
            source,
        })?;
    let key = keys::decode_secret_key(&key_data, None).map_err(|e| SshError::KeyDecode {
        path: key_path,
        message: e.to_string(),
    })?;
    let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

    let auth = handle
        .authenticate_publickey(&target.user, key_with_alg)
        .await?;
    if !auth.success() {
        return Err(SshError::AuthRejected {
            user: target.user.clone(),
        });
    }

    tracing::info!(addr, user = %target.user, "SSH authenticated");
    Ok(SshSession { handle })
}

#[async_trait]
impl RemoteExec for SshSession {
    type Process = SshProcess;

    async fn exec(&mut self, command: &str) -> Result<ExecOutput, SshError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let exit_status = exit_status.ok_or_else(|| SshError::NoExitStatus {
            command: command.to_string(),
        })?;

        Ok(ExecOutput {
            exit_status,
            output: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn spawn(&mut self, command: &str) -> Result<SshProcess, SshError> {
        let channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        Ok(SshProcess { channel })
    }
}

/// A long-running remote command bound to its own channel.
pub struct SshProcess {
    channel: Channel<client::Msg>,
}

#[async_trait]
impl RemoteProcess for SshProcess {
    async fn wait(&mut self) -> Result<Option<u32>, SshError> {
        let mut exit_status = None;
        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    tracing::debug!(stderr = %String::from_utf8_lossy(data).trim_end(), "sshfs");
                }
                _ => {}
            }
        }
        Ok(exit_status)
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.channel.eof().await?;
        self.channel.close().await?;
        Ok(())
    }
}
