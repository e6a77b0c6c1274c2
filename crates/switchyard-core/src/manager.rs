//! Live configuration management.
//!
//! Two change sources feed one reload path: a filesystem watcher (notify)
//! and a 3-second polling fallback for mounts where inotify does not fire
//! (container bind mounts, NFS). Reloads are debounced 100 ms so editors
//! that write in several syscalls trigger once. A failed reload keeps the
//! previous configuration and the service running.
//!
//! Admin-driven updates go through [`ConfigManager::apply_update`], which
//! validates, backs up the previous file with a timestamp suffix, and
//! replaces it atomically via a temp file + rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};

/// Polling fallback interval.
const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Settle time before re-reading a changed file.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Callback invoked with each successfully loaded configuration.
pub type ChangeCallback = Box<dyn Fn(Arc<Config>) + Send + Sync>;

/// Handle to the watcher tasks.
pub struct WatcherHandle {
    stop_tx: watch::Sender<bool>,
    poll_task: tokio::task::JoinHandle<()>,
    // Kept alive for the lifetime of the handle; dropping it unregisters the
    // OS watches.
    _fs_watcher: Option<notify::RecommendedWatcher>,
}

impl WatcherHandle {
    /// Stop polling and drop the filesystem watcher.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.poll_task.await;
    }
}

/// Owns the current configuration and its reload path.
pub struct ConfigManager {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl ConfigManager {
    /// Load the initial configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn new(path: impl Into<PathBuf>) -> Result<Arc<Self>, ConfigError> {
        let path = path.into();
        let config = Config::load(&path)?;
        let modified = modification_time(&path);

        Ok(Arc::new(Self {
            path,
            current: RwLock::new(Arc::new(config)),
            callbacks: Mutex::new(Vec::new()),
            last_modified: Mutex::new(modified),
        }))
    }

    /// The configuration file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current configuration snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Register a change callback; fired after every successful reload or
    /// admin update.
    pub fn on_change(&self, callback: ChangeCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Start the notify watcher and the polling fallback. Both funnel into
    /// the same debounced reload.
    #[must_use]
    pub fn spawn_watchers(self: &Arc<Self>) -> WatcherHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        // Filesystem events. notify delivers on its own thread; hop onto the
        // runtime to share the async reload path.
        let fs_watcher = {
            let manager = Arc::clone(self);
            let handle = tokio::runtime::Handle::current();
            let mut watcher = match notify::recommended_watcher(
                move |event: Result<notify::Event, notify::Error>| match event {
                    Ok(event)
                        if matches!(
                            event.kind,
                            notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                        ) =>
                    {
                        let manager = Arc::clone(&manager);
                        handle.spawn(async move {
                            debug!("config change detected by fsnotify");
                            manager.reload().await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "config watcher error"),
                },
            ) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "cannot create filesystem watcher, polling only");
                    None
                }
            };

            if let Some(w) = watcher.as_mut() {
                if let Err(e) = w.watch(&self.path, RecursiveMode::NonRecursive) {
                    warn!(error = %e, "cannot watch config file, polling only");
                    watcher = None;
                } else {
                    info!(path = %self.path.display(), "filesystem watcher enabled");
                }
            }
            watcher
        };

        // Polling fallback.
        let manager = Arc::clone(self);
        let poll_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if manager.file_changed() {
                            debug!("config change detected by polling");
                            manager.reload().await;
                        }
                    }
                    _ = stop_rx.changed() => return,
                }
            }
        });

        WatcherHandle {
            stop_tx,
            poll_task,
            _fs_watcher: fs_watcher,
        }
    }

    fn file_changed(&self) -> bool {
        let Some(modified) = modification_time(&self.path) else {
            return false;
        };
        let mut last = self.last_modified.lock();
        if last.map_or(true, |prev| modified > prev) {
            *last = Some(modified);
            return true;
        }
        false
    }

    /// Debounced reload. A parse or validation failure logs and keeps the
    /// previous configuration.
    pub async fn reload(&self) {
        tokio::time::sleep(DEBOUNCE).await;

        let config = match Config::load(&self.path) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                warn!(error = %e, "config reload failed, keeping previous configuration");
                return;
            }
        };

        if let Some(modified) = modification_time(&self.path) {
            *self.last_modified.lock() = Some(modified);
        }

        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, Arc::clone(&config))
        };
        log_changes(&previous, &config);
        info!("configuration reloaded");

        self.fire_callbacks(&config);
    }

    /// Validate and persist an admin-submitted configuration, then treat it
    /// like any other change.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation or the file write fails; the
    /// running configuration is untouched in that case.
    pub fn apply_update(&self, mut config: Config) -> Result<(), ConfigError> {
        config.finalize()?;

        self.backup_file();
        self.write_file(&config)?;

        if let Some(modified) = modification_time(&self.path) {
            *self.last_modified.lock() = Some(modified);
        }

        let config = Arc::new(config);
        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, Arc::clone(&config))
        };
        log_changes(&previous, &config);
        info!("configuration updated via admin API");

        self.fire_callbacks(&config);
        Ok(())
    }

    fn fire_callbacks(&self, config: &Arc<Config>) {
        let callbacks = self.callbacks.lock();
        for callback in callbacks.iter() {
            callback(Arc::clone(config));
        }
    }

    /// Copy the live file aside with a timestamp suffix. Backup failure is
    /// logged but never blocks the update.
    fn backup_file(&self) {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let backup = self.path.with_extension(format!("yaml.backup.{stamp}"));
        if let Err(e) = std::fs::copy(&self.path, &backup) {
            warn!(error = %e, "failed to back up config file");
        } else {
            info!(backup = %backup.display(), "config file backed up");
        }
    }

    /// Write via temp file + rename so readers never observe a torn file.
    fn write_file(&self, config: &Config) -> Result<(), ConfigError> {
        let serialized = serde_yaml::to_string(config)?;
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn log_changes(previous: &Config, next: &Config) {
    if previous.balancer.strategy != next.balancer.strategy {
        info!(
            from = %previous.balancer.strategy,
            to = %next.balancer.strategy,
            "balancer strategy changed"
        );
    }
    if previous.buckets.len() != next.buckets.len() {
        info!(
            from = previous.buckets.len(),
            to = next.buckets.len(),
            "bucket count changed"
        );
    }
    if previous.s3api.proxy_mode != next.s3api.proxy_mode {
        info!(proxy_mode = next.s3api.proxy_mode, "proxy mode changed");
    }
    if previous.server.port != next.server.port {
        warn!(
            from = previous.server.port,
            to = next.server.port,
            "server port changed; restart required to take effect"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const BASE: &str = r#"
buckets:
  - name: pool-a
    endpoint: https://minio.internal:9000
    access_key_id: AK
    secret_access_key: SK
  - name: media
    virtual: true
"#;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).expect("create config");
        file.write_all(content.as_bytes()).expect("write config");
        path
    }

    #[tokio::test]
    async fn test_should_load_initial_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, BASE);
        let manager = ConfigManager::new(path).expect("manager");
        assert_eq!(manager.current().buckets.len(), 2);
    }

    #[tokio::test]
    async fn test_should_keep_previous_config_on_bad_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, BASE);
        let manager = ConfigManager::new(path.clone()).expect("manager");

        std::fs::write(&path, "buckets: [").expect("write bad config");
        manager.reload().await;

        assert_eq!(
            manager.current().buckets.len(),
            2,
            "bad reload must not replace the running config"
        );
    }

    #[tokio::test]
    async fn test_should_fire_callbacks_on_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, BASE);
        let manager = ConfigManager::new(path.clone()).expect("manager");

        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        manager.on_change(Box::new(move |config| {
            assert_eq!(config.balancer.strategy, "weighted");
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        let updated = format!("{BASE}\nbalancer:\n  strategy: weighted\n");
        std::fs::write(&path, updated).expect("write updated config");
        manager.reload().await;

        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(manager.current().balancer.strategy, "weighted");
    }

    #[tokio::test]
    async fn test_should_back_up_and_rewrite_on_admin_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, BASE);
        let manager = ConfigManager::new(path.clone()).expect("manager");

        let mut updated = manager.current().as_ref().clone();
        updated.balancer.strategy = "consistent-hash".to_owned();
        manager.apply_update(updated).expect("apply");

        assert_eq!(manager.current().balancer.strategy, "consistent-hash");

        // The file on disk reflects the update.
        let reparsed = Config::load(&path).expect("reload from disk");
        assert_eq!(reparsed.balancer.strategy, "consistent-hash");

        // A timestamped backup of the old file exists.
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains("backup"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_should_reject_invalid_admin_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, BASE);
        let manager = ConfigManager::new(path).expect("manager");

        let mut updated = manager.current().as_ref().clone();
        updated.balancer.strategy = "fastest".to_owned();
        assert!(manager.apply_update(updated).is_err());
        assert_eq!(manager.current().balancer.strategy, "least-space");
    }
}
