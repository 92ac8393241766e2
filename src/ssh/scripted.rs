//! In-memory [`RemoteExec`] used by the bootstrap, installer and registry
//! tests. Answers commands from a table that mirrors a stock Ubuntu instance
//! with the multipass-sshfs snap installed, and records every command issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{ExecOutput, RemoteExec, RemoteProcess, SshError};
use crate::sshfs::commands;

pub(crate) const MOUNT_3X: &str = "sudo env LD_LIBRARY_PATH=/foo/bar /baz/bin/sshfs -o slave -o transform_symlinks -o allow_other :\"source\" \"target\"";
pub(crate) const MOUNT_2X: &str = "sudo env LD_LIBRARY_PATH=/foo/bar /baz/bin/sshfs -o slave -o transform_symlinks -o allow_other -o nonempty :\"source\" \"target\"";

#[derive(Clone, Default)]
pub(crate) struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    fn push(&self, command: &str) {
        self.0.lock().unwrap().push(command.to_string());
    }

    pub(crate) fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.0.lock().unwrap().iter().any(|c| c.contains(needle))
    }

    pub(crate) fn position(&self, command: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|c| c == command)
    }
}

pub(crate) struct ScriptedSession {
    responses: HashMap<String, String>,
    failures: Vec<String>,
    hangs: Vec<String>,
    log: CommandLog,
    exit_rx: Option<oneshot::Receiver<Option<u32>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        let mut responses = HashMap::new();
        for (command, output) in [
            (commands::HELPER_ENV.to_string(), "LD_LIBRARY_PATH=/foo/bar\nSNAP=/baz\n"),
            (
                "sudo env LD_LIBRARY_PATH=/foo/bar /baz/bin/sshfs -V".to_string(),
                "FUSE library version: 3.0.0\n",
            ),
            (commands::USER_ID.to_string(), "1000\n"),
            (commands::GROUP_ID.to_string(), "1000\n"),
            (commands::HOME_DIR.to_string(), "/home/ubuntu\n"),
            (commands::anchor_query("/home/ubuntu/target"), "/home/ubuntu/\n"),
        ] {
            responses.insert(command, output.to_string());
        }
        Self {
            responses,
            failures: Vec::new(),
            hangs: Vec::new(),
            log: CommandLog::default(),
            exit_rx: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Answer `command` (exact match) with `output` and exit status 0.
    pub(crate) fn respond(mut self, command: impl Into<String>, output: &str) -> Self {
        self.responses.insert(command.into(), output.to_string());
        self
    }

    /// Any command containing `needle` exits with status 1.
    pub(crate) fn fail_on(mut self, needle: &str) -> Self {
        self.failures.push(needle.to_string());
        self
    }

    /// Any command containing `needle` never completes.
    pub(crate) fn hang_on(mut self, needle: &str) -> Self {
        self.hangs.push(needle.to_string());
        self
    }

    pub(crate) fn log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Flag set once the spawned mount process has been closed locally.
    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Sender that ends the spawned mount process with the given status.
    /// Without one the process runs until it is closed.
    pub(crate) fn remote_exit(&mut self) -> oneshot::Sender<Option<u32>> {
        let (tx, rx) = oneshot::channel();
        self.exit_rx = Some(rx);
        tx
    }

    fn failing(&self, command: &str) -> bool {
        self.failures.iter().any(|f| command.contains(f.as_str()))
    }

    fn hanging(&self, command: &str) -> bool {
        self.hangs.iter().any(|h| command.contains(h.as_str()))
    }
}

#[async_trait]
impl RemoteExec for ScriptedSession {
    type Process = ScriptedProcess;

    async fn exec(&mut self, command: &str) -> Result<ExecOutput, SshError> {
        self.log.push(command);
        if self.hanging(command) {
            std::future::pending::<()>().await;
        }
        if self.failing(command) {
            return Ok(ExecOutput {
                exit_status: 1,
                output: String::new(),
                stderr: format!("{command}: failed\n"),
            });
        }
        // Every string the instance prints ends in a newline.
        let output = self
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| "\n".to_string());
        Ok(ExecOutput {
            exit_status: 0,
            output,
            stderr: String::new(),
        })
    }

    async fn spawn(&mut self, command: &str) -> Result<ScriptedProcess, SshError> {
        self.log.push(command);
        let exit = if self.failing(command) {
            ProcessExit::Immediate(Some(1))
        } else {
            match self.exit_rx.take() {
                Some(rx) => ProcessExit::Signal(rx),
                None => ProcessExit::Never,
            }
        };
        Ok(ScriptedProcess {
            exit,
            closed: self.closed.clone(),
        })
    }
}

#[derive(Debug)]
enum ProcessExit {
    Immediate(Option<u32>),
    Signal(oneshot::Receiver<Option<u32>>),
    Never,
}

#[derive(Debug)]
pub(crate) struct ScriptedProcess {
    exit: ProcessExit,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteProcess for ScriptedProcess {
    async fn wait(&mut self) -> Result<Option<u32>, SshError> {
        match std::mem::replace(&mut self.exit, ProcessExit::Never) {
            ProcessExit::Immediate(status) => Ok(status),
            ProcessExit::Signal(rx) => Ok(rx.await.unwrap_or(None)),
            ProcessExit::Never => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
