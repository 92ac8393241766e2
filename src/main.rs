use clap::Parser;

use sshmount::cli::{Cli, Command};
use sshmount::config::{self, LoadedConfig};
use sshmount::error::MountError;
use sshmount::mounts::MountRegistry;
use sshmount::{install, logging, paths, ssh, sshfs};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let file_handle = logging::init(cli.verbose)?;

    let loaded = config::load_config(&cli.config)?;
    let instance = loaded.display_name().to_string();

    let log_path = paths::log_path(&instance);
    if let Err(e) = file_handle.set_file(&log_path) {
        tracing::warn!(path = %log_path.display(), "file logging disabled: {e}");
    }

    match cli.command {
        Command::Mount { target } => run_mount(&loaded, target.as_deref()).await?,
        Command::Install => run_install(&loaded).await?,
    }

    Ok(())
}

async fn run_mount(loaded: &LoadedConfig, only_target: Option<&str>) -> Result<(), MountError> {
    let instance = loaded.display_name();
    let ssh_target = loaded.ssh_target();
    let options = loaded.mount_options();

    let mut specs = loaded.resolve_mounts()?;
    if let Some(t) = only_target {
        specs.retain(|s| s.target_path == t);
        if specs.is_empty() {
            return Err(MountError::Validation {
                message: format!("no mount with target '{t}' in {}", loaded.config_path.display()),
            });
        }
    }

    let registry = MountRegistry::new();
    for spec in specs {
        let source = spec.source_path.clone();
        let target = spec.target_path.clone();

        let started = match ssh::connect(&ssh_target).await {
            Ok(session) => registry.start_mount(instance, session, spec, &options).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = started {
            registry.stop_all_mounts_for_instance(instance).await;
            return Err(e);
        }
        println!("Mounted {source} at {instance}:{target}");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|source| MountError::Io {
                context: "waiting for Ctrl-C".into(),
                source,
            })?;
            tracing::info!(instance, "interrupted, unmounting");
            registry.stop_all_mounts_for_instance(instance).await;
        }
        _ = registry.wait_all_finished(instance) => {
            tracing::info!(instance, "all mounts ended");
        }
    }

    Ok(())
}

async fn run_install(loaded: &LoadedConfig) -> Result<(), MountError> {
    let instance = loaded.display_name();
    let options = loaded.mount_options();
    let mut session = ssh::connect(&loaded.ssh_target()).await?;

    install::install_sshfs_for(instance, &mut session, options.install_timeout).await?;

    match sshfs::locate_helper(&mut session).await {
        Ok(helper) => {
            println!("sshfs ready in '{instance}': {}", helper.exec());
            Ok(())
        }
        Err(MountError::HelperMissing) => Err(MountError::MountSupport {
            instance: instance.to_string(),
        }),
        Err(e) => Err(e),
    }
}
