//! Remote command strings. These must match what the instance's shell and the
//! multipass-sshfs snap expect byte for byte.

pub const HELPER_ENV: &str = "snap run multipass-sshfs.env";
pub const WHICH_SSHFS: &str = "which sshfs";
pub const USER_ID: &str = "id -u";
pub const GROUP_ID: &str = "id -g";
pub const HOME_DIR: &str = "pwd";

pub const WHICH_SNAP: &str = "which snap";
pub const SNAP_DIR_PROBE: &str = "[ -e /snap ]";
pub const INSTALL_HELPER: &str = "sudo snap install multipass-sshfs";

pub fn version_query(sshfs_exec: &str) -> String {
    format!("sudo {sshfs_exec} -V")
}

/// Walks up from `absolute_target` until an existing directory is found and
/// prints it with a trailing slash. Runs remotely; the walk needs the remote
/// filesystem.
pub fn anchor_query(absolute_target: &str) -> String {
    format!(
        "sudo /bin/bash -c 'P=\"{absolute_target}\"; while [ ! -d \"$P/\" ]; do P=${{P%/*}}; done; echo $P/'"
    )
}

pub fn make_target_dir(anchor: &str, relative_target: &str) -> String {
    format!("sudo /bin/bash -c 'cd \"{anchor}\" && mkdir -p \"{relative_target}\"'")
}

pub fn chown_target(anchor: &str, uid: u32, gid: u32, relative_target: &str) -> String {
    format!("sudo /bin/bash -c 'cd \"{anchor}\" && chown -R {uid}:{gid} {relative_target}'")
}

pub fn mount(sshfs_exec: &str, nonempty: bool, source: &str, target: &str) -> String {
    let nonempty = if nonempty { " -o nonempty" } else { "" };
    format!(
        "sudo {sshfs_exec} -o slave -o transform_symlinks -o allow_other{nonempty} :\"{source}\" \"{target}\""
    )
}
