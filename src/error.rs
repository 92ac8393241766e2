use miette::Diagnostic;
use thiserror::Error;

use crate::ssh::SshError;
use crate::sshfs::{IdKind, Stage};

/// Coarse classification of a [`MountError`], used by callers that only need
/// to pick a remediation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// sshfs is not available on the remote host and has to be installed
    /// by hand.
    HelperMissing,
    /// A required remote command failed or produced unusable output.
    Runtime,
    /// The remote host reported a uid/gid that is not an integer.
    InvalidArgument,
    /// The SSH channel itself failed.
    Transport,
    /// Local configuration or IO problem.
    Config,
}

#[derive(Debug, Error, Diagnostic)]
pub enum MountError {
    #[error("sshfs is not installed on the remote host")]
    #[diagnostic(help("install the 'multipass-sshfs' snap or the distro 'sshfs' package inside the instance"))]
    HelperMissing,

    #[error("Error enabling mount support in '{instance}'")]
    #[diagnostic(help("Please install the 'multipass-sshfs' snap manually inside the instance."))]
    MountSupport { instance: String },

    #[error("Snap support needs to be installed in '{instance}' in order to support mounts")]
    #[diagnostic(help(
        "see https://docs.snapcraft.io/installing-snapd for your distribution, \
         or install `sshfs` manually inside the instance"
    ))]
    SnapUnsupported { instance: String },

    #[error("Classic snap support is not enabled for '{instance}'")]
    #[diagnostic(help("see https://docs.snapcraft.io/installing-snapd for how to enable classic snap support"))]
    ClassicSnapDisabled { instance: String },

    #[error("{stage} failed with exit status {exit_status}: {output}")]
    StageFailed {
        stage: Stage,
        exit_status: u32,
        output: String,
    },

    #[error("{stage} returned unexpected output: '{output}'")]
    UnexpectedOutput { stage: Stage, output: String },

    #[error("sshfs environment does not define {name}")]
    MissingEnvVar { name: &'static str },

    #[error("unable to parse the FUSE library version from '{output}'")]
    MalformedFuseVersion { output: String },

    #[error("invalid {id}: '{output}' is not a non-negative integer")]
    InvalidId { id: IdKind, output: String },

    #[error("sshfs exited with status {exit_status}")]
    SshfsExited { exit_status: u32 },

    #[error("\"{instance}:{target}\" is already mounted")]
    AlreadyMounted { instance: String, target: String },

    #[error(transparent)]
    Transport(#[from] SshError),

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl MountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MountError::HelperMissing
            | MountError::MountSupport { .. }
            | MountError::SnapUnsupported { .. }
            | MountError::ClassicSnapDisabled { .. } => ErrorKind::HelperMissing,
            MountError::StageFailed { .. }
            | MountError::UnexpectedOutput { .. }
            | MountError::MissingEnvVar { .. }
            | MountError::MalformedFuseVersion { .. }
            | MountError::SshfsExited { .. }
            | MountError::AlreadyMounted { .. } => ErrorKind::Runtime,
            MountError::InvalidId { .. } => ErrorKind::InvalidArgument,
            MountError::Transport(_) => ErrorKind::Transport,
            MountError::ConfigLoad { .. }
            | MountError::ConfigParse { .. }
            | MountError::Validation { .. }
            | MountError::Io { .. } => ErrorKind::Config,
        }
    }

    /// The bootstrap stage this error belongs to, when it came from one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            MountError::StageFailed { stage, .. } | MountError::UnexpectedOutput { stage, .. } => {
                Some(*stage)
            }
            MountError::HelperMissing | MountError::MissingEnvVar { .. } => {
                Some(Stage::LocateHelper)
            }
            MountError::MalformedFuseVersion { .. } => Some(Stage::FuseVersion),
            MountError::InvalidId { id: IdKind::User, .. } => Some(Stage::UserId),
            MountError::InvalidId { id: IdKind::Group, .. } => Some(Stage::GroupId),
            MountError::SshfsExited { .. } => Some(Stage::Mount),
            _ => None,
        }
    }
}
