//! Active mounts per instance.
//!
//! The registry owns every mount from the moment its bootstrap starts until
//! its lifecycle wait returns. Each established mount runs on its own tokio
//! task with its own SSH session; stopping a mount cancels that task's token
//! and joins it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::MountError;
use crate::install;
use crate::ssh::RemoteExec;
use crate::sshfs::{self, MountSpec, SshfsMount};

#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Install the multipass-sshfs snap when no sshfs is found, then retry.
    pub install_missing: bool,
    pub install_timeout: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            install_missing: true,
            install_timeout: install::DEFAULT_INSTALL_TIMEOUT,
        }
    }
}

type MountKey = (String, String);

enum Slot {
    /// Bootstrap in progress; reserves the target.
    Starting,
    Active(ActiveMount),
}

struct ActiveMount {
    id: u64,
    stop: CancellationToken,
    finished: CancellationToken,
    task: JoinHandle<Result<(), MountError>>,
}

#[derive(Clone, Default)]
pub struct MountRegistry {
    slots: Arc<Mutex<HashMap<MountKey, Slot>>>,
    next_id: Arc<AtomicU64>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MountKey, Slot>> {
        // a poisoned map is still structurally valid
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bootstrap a mount over `session` and hold it in the background.
    ///
    /// Returns once sshfs has been started on the remote host. When sshfs is
    /// missing and `options.install_missing` is set, the helper is installed
    /// and the bootstrap retried once.
    pub async fn start_mount<S>(
        &self,
        instance: &str,
        mut session: S,
        spec: MountSpec,
        options: &MountOptions,
    ) -> Result<(), MountError>
    where
        S: RemoteExec + 'static,
    {
        let key = (instance.to_string(), spec.target_path.clone());
        {
            let mut slots = self.lock();
            if slots.contains_key(&key) {
                return Err(MountError::AlreadyMounted {
                    instance: key.0,
                    target: key.1,
                });
            }
            slots.insert(key.clone(), Slot::Starting);
        }
        let mut reservation = Reservation {
            registry: self,
            key: Some(key.clone()),
        };

        let process = bootstrap_with_install(instance, &mut session, &spec, options).await?;

        let mount = SshfsMount::from_parts(session, process, spec);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let finished = CancellationToken::new();

        reservation.disarm();
        // Hold the lock across the spawn so the task cannot forget its slot
        // before it has been recorded.
        let mut slots = self.lock();
        let task = tokio::spawn({
            let registry = self.clone();
            let key = key.clone();
            let stop = stop.clone();
            let finished = finished.clone();
            async move {
                let result = mount.run(stop).await;
                if let Err(ref e) = result {
                    tracing::warn!(instance = %key.0, target = %key.1, "mount ended: {e}");
                }
                registry.forget(&key, id);
                finished.cancel();
                result
            }
        });
        slots.insert(
            key,
            Slot::Active(ActiveMount {
                id,
                stop,
                finished,
                task,
            }),
        );
        Ok(())
    }

    fn forget(&self, key: &MountKey, id: u64) {
        let mut slots = self.lock();
        if matches!(slots.get(key), Some(Slot::Active(m)) if m.id == id) {
            slots.remove(key);
        }
    }

    pub fn has_instance_already_mounted(&self, instance: &str, target: &str) -> bool {
        self.lock()
            .contains_key(&(instance.to_string(), target.to_string()))
    }

    /// Targets with an established mount, sorted.
    pub fn mounted_targets(&self, instance: &str) -> Vec<String> {
        let mut targets: Vec<String> = self
            .lock()
            .iter()
            .filter(|((i, _), slot)| i == instance && matches!(slot, Slot::Active(_)))
            .map(|((_, t), _)| t.clone())
            .collect();
        targets.sort();
        targets
    }

    /// Stop one established mount. Returns `false` if it was not mounted.
    pub async fn stop_mount(&self, instance: &str, target: &str) -> bool {
        let key = (instance.to_string(), target.to_string());
        let mount = {
            let mut slots = self.lock();
            match slots.remove(&key) {
                Some(Slot::Active(m)) => m,
                Some(starting) => {
                    slots.insert(key, starting);
                    return false;
                }
                None => return false,
            }
        };

        mount.stop.cancel();
        match mount.task.await {
            Ok(Ok(())) => tracing::info!(instance, target, "unmounted"),
            Ok(Err(e)) => tracing::warn!(instance, target, "unmount: {e}"),
            Err(e) => tracing::warn!(instance, target, "mount task failed: {e}"),
        }
        true
    }

    pub async fn stop_all_mounts_for_instance(&self, instance: &str) {
        for target in self.mounted_targets(instance) {
            self.stop_mount(instance, &target).await;
        }
    }

    /// Resolves once every mount of `instance` established so far has ended.
    pub async fn wait_all_finished(&self, instance: &str) {
        let finished: Vec<CancellationToken> = self
            .lock()
            .iter()
            .filter_map(|((i, _), slot)| match slot {
                Slot::Active(m) if i == instance => Some(m.finished.clone()),
                _ => None,
            })
            .collect();
        futures_util::future::join_all(finished.iter().map(|t| t.cancelled())).await;
    }
}

/// Releases a `Starting` slot when `start_mount` fails or its future is
/// dropped before the mount is recorded.
struct Reservation<'a> {
    registry: &'a MountRegistry,
    key: Option<MountKey>,
}

impl Reservation<'_> {
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut slots = self.registry.lock();
            if matches!(slots.get(&key), Some(Slot::Starting)) {
                slots.remove(&key);
            }
        }
    }
}

async fn bootstrap_with_install<S: RemoteExec>(
    instance: &str,
    session: &mut S,
    spec: &MountSpec,
    options: &MountOptions,
) -> Result<S::Process, MountError> {
    match sshfs::bootstrap(session, spec).await {
        Err(MountError::HelperMissing) if options.install_missing => {
            tracing::info!(instance, "Enabling support for mounting");
            install::install_sshfs_for(instance, session, options.install_timeout)
                .await
                .map_err(|e| support_error(instance, e))?;
            sshfs::bootstrap(session, spec)
                .await
                .map_err(|e| support_error(instance, e))
        }
        Err(MountError::HelperMissing) => Err(support_error(instance, MountError::HelperMissing)),
        other => other,
    }
}

fn support_error(instance: &str, error: MountError) -> MountError {
    match error {
        MountError::HelperMissing => MountError::MountSupport {
            instance: instance.to_string(),
        },
        other => other,
    }
}
