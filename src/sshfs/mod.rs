//! SSHFS mount bootstrap.
//!
//! [`bootstrap`] drives the remote host through a fixed sequence of commands:
//! locate the sshfs helper, read its FUSE version, resolve the remote
//! uid/gid, find the deepest existing ancestor of the target, create and
//! chown whatever is missing below it, and finally start sshfs in slave mode.
//! Every stage depends on the previous one, so nothing is pipelined and the
//! first failure aborts the whole sequence.
//!
//! [`SshfsMount`] then holds the running sshfs process until the remote side
//! ends it or the owner asks it to stop.

pub mod commands;

use std::collections::BTreeMap;
use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::error::MountError;
use crate::parse::{self, FuseVersionReport, VersionParseError};
use crate::ssh::{RemoteExec, RemoteProcess};

/// Local id -> remote id.
pub type IdMap = BTreeMap<u32, u32>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Directory on the local host.
    pub source_path: String,
    /// Directory on the remote host, absolute or relative to the login home.
    pub target_path: String,
    /// Carried for the SFTP side of the mount, which is not served here;
    /// the bootstrap does not apply it.
    pub uid_map: IdMap,
    /// Not applied yet, see `uid_map`.
    pub gid_map: IdMap,
}

/// Bootstrap stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LocateHelper,
    FuseVersion,
    UserId,
    GroupId,
    HomeDirectory,
    ResolveAnchor,
    CreateTarget,
    ChownTarget,
    Mount,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::LocateHelper => "locate sshfs",
            Stage::FuseVersion => "query FUSE version",
            Stage::UserId => "id -u",
            Stage::GroupId => "id -g",
            Stage::HomeDirectory => "pwd",
            Stage::ResolveAnchor => "resolve target anchor",
            Stage::CreateTarget => "mkdir",
            Stage::ChownTarget => "chown",
            Stage::Mount => "sshfs mount",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Group,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::User => f.write_str("uid"),
            IdKind::Group => f.write_str("gid"),
        }
    }
}

/// How sshfs is invoked on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshfsHelper {
    /// The multipass-sshfs snap, run outside of snap confinement.
    Snap {
        ld_library_path: String,
        install_root: String,
    },
    /// A distro sshfs found on PATH.
    System { path: String },
}

impl SshfsHelper {
    /// Command prefix that runs sshfs, without `sudo`.
    pub fn exec(&self) -> String {
        match self {
            SshfsHelper::Snap {
                ld_library_path,
                install_root,
            } => format!("env LD_LIBRARY_PATH={ld_library_path} {install_root}/bin/sshfs"),
            SshfsHelper::System { path } => path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Where the target lives relative to what already exists remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    pub absolute: String,
    /// Deepest existing ancestor, always ending in `/`.
    pub anchor: String,
    /// Path below `anchor` that still has to be created; empty when the
    /// target already exists.
    pub missing: String,
}

impl TargetLayout {
    /// First path component that will be created, i.e. the root of
    /// everything `mkdir -p` adds.
    pub fn missing_root(&self) -> Option<&str> {
        self.missing.split('/').find(|c| !c.is_empty())
    }
}

const ENV_LIBRARY_PATH: &str = "LD_LIBRARY_PATH";
const ENV_INSTALL_ROOT: &str = "SNAP";

/// Run a command whose success is required by `stage`; returns its stdout.
async fn run_required<S: RemoteExec>(
    session: &mut S,
    stage: Stage,
    command: &str,
) -> Result<String, MountError> {
    tracing::debug!(%stage, command, "running");
    let result = session.exec(command).await?;
    if !result.success() {
        let output = if result.stderr.trim().is_empty() {
            result.output.trim_end().to_string()
        } else {
            result.stderr.trim_end().to_string()
        };
        return Err(MountError::StageFailed {
            stage,
            exit_status: result.exit_status,
            output,
        });
    }
    Ok(result.output)
}

/// Find sshfs on the remote host: the snap first, then the distro package.
/// Issues no install commands.
pub async fn locate_helper<S: RemoteExec>(session: &mut S) -> Result<SshfsHelper, MountError> {
    let env = session.exec(commands::HELPER_ENV).await?;
    if env.success() {
        let vars = parse::parse_env(&env.output);
        let ld_library_path = vars
            .get(ENV_LIBRARY_PATH)
            .ok_or(MountError::MissingEnvVar {
                name: ENV_LIBRARY_PATH,
            })?
            .clone();
        let install_root = vars
            .get(ENV_INSTALL_ROOT)
            .ok_or(MountError::MissingEnvVar {
                name: ENV_INSTALL_ROOT,
            })?
            .clone();
        return Ok(SshfsHelper::Snap {
            ld_library_path,
            install_root,
        });
    }

    tracing::debug!(
        exit_status = env.exit_status,
        "multipass-sshfs snap not available, looking for a distro sshfs"
    );
    let which = session.exec(commands::WHICH_SSHFS).await?;
    let path = which.output.trim();
    if which.success() && !path.is_empty() {
        return Ok(SshfsHelper::System {
            path: path.to_string(),
        });
    }

    Err(MountError::HelperMissing)
}

/// Read the FUSE library version the helper was built against.
pub async fn query_fuse_version<S: RemoteExec>(
    session: &mut S,
    helper: &SshfsHelper,
) -> Result<FuseVersionReport, MountError> {
    let output = run_required(
        session,
        Stage::FuseVersion,
        &commands::version_query(&helper.exec()),
    )
    .await?;

    match parse::parse_fuse_version(&output) {
        Ok(FuseVersionReport::Blank) => {
            tracing::warn!("Unable to parse the FUSE library version");
            tracing::debug!(
                "Unable to parse the FUSE library version: {}",
                output.trim_end()
            );
            Ok(FuseVersionReport::Blank)
        }
        Ok(report) => Ok(report),
        Err(VersionParseError::MissingToken) | Err(VersionParseError::Malformed(_)) => {
            Err(MountError::MalformedFuseVersion {
                output: output.trim_end().to_string(),
            })
        }
    }
}

async fn query_id<S: RemoteExec>(
    session: &mut S,
    stage: Stage,
    command: &str,
    id: IdKind,
) -> Result<u32, MountError> {
    let output = run_required(session, stage, command).await?;
    parse::parse_id(&output).ok_or_else(|| MountError::InvalidId {
        id,
        output: output.trim_end().to_string(),
    })
}

/// Resolve the remote login's uid and gid.
pub async fn resolve_identity<S: RemoteExec>(
    session: &mut S,
) -> Result<ResolvedIdentity, MountError> {
    let uid = query_id(session, Stage::UserId, commands::USER_ID, IdKind::User).await?;
    let gid = query_id(session, Stage::GroupId, commands::GROUP_ID, IdKind::Group).await?;
    Ok(ResolvedIdentity { uid, gid })
}

/// Split the target into its deepest existing ancestor and the part that is
/// still missing.
pub async fn resolve_target<S: RemoteExec>(
    session: &mut S,
    target: &str,
) -> Result<TargetLayout, MountError> {
    let home = run_required(session, Stage::HomeDirectory, commands::HOME_DIR).await?;
    let home = home.trim_end();

    let absolute = if target.starts_with('/') {
        target.to_string()
    } else {
        format!("{}/{}", home.trim_end_matches('/'), target)
    };

    let output = run_required(
        session,
        Stage::ResolveAnchor,
        &commands::anchor_query(&absolute),
    )
    .await?;
    let unexpected = || MountError::UnexpectedOutput {
        stage: Stage::ResolveAnchor,
        output: output.trim_end().to_string(),
    };

    // the script echoes "$P/", so a target of "/" comes back as "//"
    let anchor = collapse_slashes(&parse::parse_anchor(&output).ok_or_else(unexpected)?);
    let normalized = collapse_slashes(&absolute);
    let missing = if format!("{}/", normalized.trim_end_matches('/')) == anchor {
        String::new()
    } else {
        normalized
            .strip_prefix(anchor.as_str())
            .ok_or_else(unexpected)?
            .trim_matches('/')
            .to_string()
    };

    Ok(TargetLayout {
        absolute,
        anchor,
        missing,
    })
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c != '/' || !out.ends_with('/') {
            out.push(c);
        }
    }
    out
}

/// Run the full bootstrap sequence and start sshfs. Returns the running
/// mount process.
///
/// A failure after the target directory was created leaves it in place.
pub async fn bootstrap<S: RemoteExec>(
    session: &mut S,
    spec: &MountSpec,
) -> Result<S::Process, MountError> {
    let helper = locate_helper(session).await?;
    let fuse = query_fuse_version(session, &helper).await?;
    let identity = resolve_identity(session).await?;
    let layout = resolve_target(session, &spec.target_path).await?;

    if let Some(root) = layout.missing_root() {
        run_required(
            session,
            Stage::CreateTarget,
            &commands::make_target_dir(&layout.anchor, &layout.missing),
        )
        .await?;
        run_required(
            session,
            Stage::ChownTarget,
            &commands::chown_target(&layout.anchor, identity.uid, identity.gid, root),
        )
        .await?;
    }

    let command = commands::mount(
        &helper.exec(),
        fuse.needs_nonempty(),
        &spec.source_path,
        &spec.target_path,
    );
    tracing::info!(
        source = %spec.source_path,
        target = %spec.target_path,
        fuse = ?fuse,
        uid = identity.uid,
        gid = identity.gid,
        "starting sshfs"
    );
    tracing::debug!(command, "running");
    Ok(session.spawn(&command).await?)
}

/// An established mount: the session that created it and the sshfs process
/// serving it.
pub struct SshfsMount<S: RemoteExec> {
    session: S,
    process: S::Process,
    spec: MountSpec,
}

impl<S: RemoteExec> SshfsMount<S> {
    /// Bootstrap a mount over `session`, which the mount then owns.
    pub async fn start(mut session: S, spec: MountSpec) -> Result<Self, MountError> {
        let process = bootstrap(&mut session, &spec).await?;
        Ok(Self::from_parts(session, process, spec))
    }

    pub(crate) fn from_parts(session: S, process: S::Process, spec: MountSpec) -> Self {
        Self {
            session,
            process,
            spec,
        }
    }

    pub fn spec(&self) -> &MountSpec {
        &self.spec
    }

    /// Hold the mount until the remote sshfs ends or `stop` is cancelled.
    ///
    /// A remote exit with status 0 (or without a status, when the channel
    /// just closes) is a normal end. The session is dropped on return.
    pub async fn run(mut self, stop: CancellationToken) -> Result<(), MountError> {
        let ended = tokio::select! {
            status = self.process.wait() => Some(status),
            _ = stop.cancelled() => None,
        };

        let result = match ended {
            Some(status) => match status? {
                Some(0) | None => {
                    tracing::info!(target = %self.spec.target_path, "sshfs session ended");
                    Ok(())
                }
                Some(exit_status) => Err(MountError::SshfsExited { exit_status }),
            },
            None => {
                tracing::info!(target = %self.spec.target_path, "stopping sshfs mount");
                self.process.close().await.map_err(MountError::from)
            }
        };

        drop(self.session);
        result
    }
}
