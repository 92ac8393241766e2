//! Installing the multipass-sshfs snap inside an instance.

use std::time::Duration;

use crate::error::MountError;
use crate::ssh::RemoteExec;
use crate::sshfs::commands;

/// Default bound on `snap install`; a cold snap store can be slow.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Install the multipass-sshfs snap on the instance behind `session`.
///
/// If the install does not finish within `timeout` it is left running on the
/// remote side and this returns `Ok`; the caller finds out on its next
/// attempt to locate the helper.
pub async fn install_sshfs_for<S: RemoteExec>(
    instance: &str,
    session: &mut S,
    timeout: Duration,
) -> Result<(), MountError> {
    tracing::info!("Installing the multipass-sshfs snap in '{instance}'");

    let which = session.exec(commands::WHICH_SNAP).await?;
    if !which.success() {
        tracing::warn!("Snap support is not installed in '{instance}'");
        return Err(MountError::SnapUnsupported {
            instance: instance.to_string(),
        });
    }

    let snap_dir = session.exec(commands::SNAP_DIR_PROBE).await?;
    if !snap_dir.success() {
        tracing::warn!("Classic snap support symlink is needed in '{instance}'");
        return Err(MountError::ClassicSnapDisabled {
            instance: instance.to_string(),
        });
    }

    match tokio::time::timeout(timeout, session.exec(commands::INSTALL_HELPER)).await {
        Ok(result) => {
            let result = result?;
            if !result.success() {
                tracing::warn!(
                    "Failed to install 'multipass-sshfs', error message: '{}'",
                    result.stderr.trim_end()
                );
                return Err(MountError::HelperMissing);
            }
            tracing::info!(instance, "multipass-sshfs installed");
            Ok(())
        }
        Err(_) => {
            tracing::info!("Timeout while installing 'sshfs' in '{instance}'");
            Ok(())
        }
    }
}
