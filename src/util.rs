use std::path::{Path, PathBuf};

use crate::error::MountError;
use crate::sshfs::IdMap;

/// Parse `"local:remote"` id pairs into a map keyed by the local id.
///
/// Accepts entries like `"1000:1000"` or `" 501 : 1000 "`. A local id may
/// appear only once.
pub fn parse_id_map<S: AsRef<str>>(entries: &[S]) -> Result<IdMap, MountError> {
    let mut map = IdMap::new();
    for entry in entries {
        let entry = entry.as_ref().trim();
        let Some((local, remote)) = entry.split_once(':') else {
            return Err(MountError::Validation {
                message: format!("id map entry must be 'local:remote' (got '{entry}')"),
            });
        };

        let local = parse_id(local, entry)?;
        let remote = parse_id(remote, entry)?;

        if map.insert(local, remote).is_some() {
            return Err(MountError::Validation {
                message: format!("id {local} is mapped more than once"),
            });
        }
    }
    Ok(map)
}

fn parse_id(s: &str, entry: &str) -> Result<u32, MountError> {
    s.trim().parse().map_err(|_| MountError::Validation {
        message: format!("invalid id '{}' in id map entry '{entry}'", s.trim()),
    })
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => Path::new(path).to_path_buf(),
    }
}
