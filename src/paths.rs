use std::path::PathBuf;

/// Per-instance state directory: `~/.local/share/sshmount/<instance>/`
pub fn instance_dir(instance: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sshmount")
        .join(instance)
}

/// Path to the debug log for an instance.
pub fn log_path(instance: &str) -> PathBuf {
    instance_dir(instance).join("sshmount.log")
}
