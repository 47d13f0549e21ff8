//! Run orchestration: allocate, persist, render, signal readiness, hold the
//! port until told to stop, release.
//!
//! Port ownership is committed by the allocator (it returns a held
//! [`Reservation`]); everything after that point releases the reservation
//! before returning an error, so a failed run never leaves the port held.

use crate::config::Settings;
use crate::error::Result;
use crate::markers;
use crate::port::{AssignmentStore, EnvFileStore, PortAllocator, Reservation};
use crate::template;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Drives a single run.
pub struct Controller {
    settings: Settings,
    work_dir: PathBuf,
    allocator: PortAllocator,
    store: Box<dyn AssignmentStore>,
}

/// A run that reached readiness. Owns the reservation until [`Running::shutdown`].
#[derive(Debug)]
pub struct Running {
    reservation: Reservation,
    work_dir: PathBuf,
    app_name: String,
    config_path: PathBuf,
}

impl Controller {
    pub fn new(settings: Settings, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            allocator: PortAllocator::new(settings.range),
            store: Box::new(EnvFileStore::in_dir(&work_dir)),
            settings,
            work_dir,
        }
    }

    pub fn with_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_store(mut self, store: Box<dyn AssignmentStore>) -> Self {
        self.store = store;
        self
    }

    /// Start, then hold the port until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let running = self.start().await?;
        running.hold(shutdown).await;
        Ok(())
    }

    /// Allocate and hold a port, persist it, write the config and the
    /// readiness marker.
    pub async fn start(&mut self) -> Result<Running> {
        // A marker left by a killed run must not outlive this attempt.
        markers::clear_ready(&self.work_dir)?;

        let allocation = self
            .allocator
            .allocate(
                &*self.store,
                &self.settings.port_env_name,
                &self.settings.app_name,
            )
            .await?;
        let port = allocation.port();
        tracing::info!(
            "Assigned {}={} ({:?})",
            self.settings.port_env_name,
            port,
            allocation.source
        );

        let mut reservation = allocation.reservation;
        match self.commit(port) {
            Ok(config_path) => Ok(Running {
                reservation,
                work_dir: self.work_dir.clone(),
                app_name: self.settings.app_name.clone(),
                config_path,
            }),
            Err(e) => {
                tracing::debug!("Startup failed after reserving port {}, releasing", port);
                reservation.release();
                Err(e)
            }
        }
    }

    /// Everything that happens while the reservation is held but before
    /// readiness.
    fn commit(&mut self, port: u16) -> Result<PathBuf> {
        self.store.write(&self.settings.port_env_name, port)?;

        let config_path = self.render_config(port)?;

        if let Err(e) = markers::mark_ready(&self.work_dir) {
            remove_config(&config_path);
            return Err(e);
        }
        Ok(config_path)
    }

    fn render_config(&self, port: u16) -> Result<PathBuf> {
        let template_path = resolve(&self.work_dir, &self.settings.template_path);
        let raw = template::read_template(&template_path)?;

        let placeholders = vec![
            ("DOMAIN".to_string(), self.settings.domain.clone()),
            ("APP_NAME".to_string(), self.settings.app_name.clone()),
            (template::PORT_PLACEHOLDER.to_string(), String::new()),
        ];
        for name in template::placeholders_in(&raw) {
            if !placeholders.iter().any(|(key, _)| key == &name) {
                tracing::warn!(
                    "Template {} uses unknown placeholder {{{{{}}}}}, leaving it as is",
                    template_path.display(),
                    name
                );
            }
        }

        let rendered = template::render(&raw, &placeholders, port);
        let config_dir = resolve(&self.work_dir, &self.settings.config_dir);
        template::write_config(&config_dir, &self.settings.domain, &rendered)
    }
}

impl Running {
    pub fn port(&self) -> u16 {
        self.reservation.port()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Hold the port until `shutdown` is cancelled, then release it.
    pub async fn hold(self, shutdown: CancellationToken) {
        tracing::info!(
            "Holding port {} for '{}' until shutdown",
            self.port(),
            self.app_name
        );

        shutdown.cancelled().await;
        tracing::info!("Shutdown requested");

        self.shutdown();
    }

    /// Release the port and withdraw the readiness marker.
    ///
    /// Consumes the run, so it cannot happen twice.
    pub fn shutdown(mut self) {
        let port = self.reservation.port();
        self.reservation.release();

        if let Err(e) = markers::clear_ready(&self.work_dir) {
            tracing::warn!("Failed to remove readiness marker: {}", e);
        }
        tracing::info!("Released port {}", port);
    }
}

/// A config rendered for a port that is about to be released must not stay behind.
fn remove_config(config_path: &Path) {
    match std::fs::remove_file(config_path) {
        Ok(()) => tracing::debug!("Removed {}", config_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", config_path.display(), e),
    }
}

fn resolve(work_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        work_dir.join(path)
    }
}

/// Cancel `token` on the first SIGTERM, SIGINT or SIGHUP (Ctrl-C off Unix).
///
/// Later signals find the token already cancelled, so shutdown runs once.
pub fn cancel_on_signals(token: CancellationToken) -> std::io::Result<tokio::task::JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        Ok(tokio::spawn(async move {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = sighup.recv() => "SIGHUP",
                _ = token.cancelled() => return,
            };
            tracing::info!("Received {}", name);
            token.cancel();
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                        return;
                    }
                    tracing::info!("Received Ctrl-C");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::port::{MemoryStore, PortRange};
    use std::collections::HashMap;
    use std::fs;
    use std::net::TcpListener;

    const TEMPLATE: &str = "server_name {{DOMAIN}}; listen {{PORT}};";

    /// A small range starting at a port that was free a moment ago.
    fn free_range() -> (u16, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (port, port.saturating_add(20))
    }

    fn settings(range: (u16, u16)) -> Settings {
        let vars: HashMap<String, String> = [
            ("APP_NAME", "chat".to_string()),
            ("DOMAIN", "chat.example.com".to_string()),
            ("PORT_MIN", range.0.to_string()),
            ("PORT_MAX", range.1.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Settings::from_vars(&vars).unwrap()
    }

    fn controller(dir: &Path, range: (u16, u16)) -> Controller {
        let settings = settings(range);
        let allocator = PortAllocator::new(settings.range)
            .with_owner_check(crate::port::owner::tests::check(None, None));
        Controller::new(settings, dir).with_allocator(allocator)
    }

    #[tokio::test]
    async fn start_persists_renders_and_marks_ready() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-template.txt"), TEMPLATE).unwrap();

        let mut controller = controller(dir.path(), free_range());
        let running = controller.start().await.unwrap();
        let port = running.port();

        assert!(TcpListener::bind(("127.0.0.1", port)).is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join(".portly.env")).unwrap(),
            format!("export PORT={}\n", port)
        );
        assert_eq!(
            fs::read_to_string(running.config_path()).unwrap(),
            format!("server_name chat.example.com; listen {};", port)
        );
        assert_eq!(
            running.config_path(),
            dir.path().join("nginx-configs").join("chat.example.com")
        );
        assert!(markers::is_ready(dir.path()));

        running.shutdown();
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
        assert!(!markers::is_ready(dir.path()));
    }

    #[tokio::test]
    async fn second_start_reuses_stored_port() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-template.txt"), TEMPLATE).unwrap();
        let range = free_range();

        let first = controller(dir.path(), range).start().await.unwrap();
        let port = first.port();
        first.shutdown();

        let second = controller(dir.path(), range).start().await.unwrap();
        assert_eq!(second.port(), port);
        second.shutdown();
    }

    #[tokio::test]
    async fn missing_template_releases_port() {
        let dir = tempfile::tempdir().unwrap();
        let range = free_range();

        let err = controller(dir.path(), range).start().await.unwrap_err();
        assert!(matches!(err, Error::Template { .. }));
        assert!(!markers::is_ready(dir.path()));

        // The assignment was persisted before rendering; its port must be free again.
        let stored = EnvFileStore::in_dir(dir.path())
            .read("PORT")
            .expect("assignment persisted");
        assert!(TcpListener::bind(("127.0.0.1", stored)).is_ok());
    }

    #[tokio::test]
    async fn store_failure_releases_port_and_skips_render() {
        struct FailingStore;
        impl AssignmentStore for FailingStore {
            fn read(&self, _key: &str) -> Option<u16> {
                None
            }
            fn write(&mut self, key: &str, _port: u16) -> Result<()> {
                Err(Error::persistence(
                    key,
                    std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                ))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-template.txt"), TEMPLATE).unwrap();
        let (min, max) = free_range();

        let err = controller(dir.path(), (min, max))
            .with_store(Box::new(FailingStore))
            .start()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "persistence");
        assert!(!dir.path().join("nginx-configs").exists());
        assert!(TcpListener::bind(("127.0.0.1", min)).is_ok());
    }

    #[tokio::test]
    async fn exhausted_range_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-template.txt"), TEMPLATE).unwrap();
        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = controller(dir.path(), (port, port))
            .start()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoPortAvailable { .. }));
        assert!(!dir.path().join(".portly.env").exists());
        assert!(!markers::is_ready(dir.path()));
    }

    #[tokio::test]
    async fn stale_marker_is_cleared_when_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-template.txt"), TEMPLATE).unwrap();
        markers::mark_ready(dir.path()).unwrap();
        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = controller(dir.path(), (port, port))
            .start()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "allocation");
        assert!(!markers::is_ready(dir.path()));
    }

    #[tokio::test]
    async fn marker_failure_removes_rendered_config() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("nginx-template.txt");
        fs::write(&template_path, TEMPLATE).unwrap();
        let config_dir = dir.path().join("nginx-configs");
        // No directory to write the marker into
        let work_dir = dir.path().join("missing");
        let (min, max) = free_range();

        let mut settings = settings((min, max));
        settings.template_path = template_path;
        settings.config_dir = config_dir.clone();
        let allocator = PortAllocator::new(settings.range)
            .with_owner_check(crate::port::owner::tests::check(None, None));
        let err = Controller::new(settings, &work_dir)
            .with_allocator(allocator)
            .with_store(Box::new(MemoryStore::new()))
            .start()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "persistence");
        assert!(config_dir.is_dir());
        assert!(!config_dir.join("chat.example.com").exists());
        assert!(TcpListener::bind(("127.0.0.1", min)).is_ok());
    }

    #[tokio::test]
    async fn run_releases_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-template.txt"), TEMPLATE).unwrap();
        let range = free_range();
        let token = CancellationToken::new();

        let settings = settings(range);
        let controller = Controller::new(settings.clone(), dir.path())
            .with_allocator(
                PortAllocator::new(settings.range)
                    .with_owner_check(crate::port::owner::tests::check(None, None)),
            )
            .with_store(Box::new(MemoryStore::new()));
        let handle = tokio::spawn(controller.run(token.clone()));

        let mut waited = 0;
        while !markers::is_ready(dir.path()) && waited < 200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(markers::is_ready(dir.path()));

        // Several cancellations, one shutdown
        token.cancel();
        token.cancel();
        handle.await.unwrap().unwrap();

        assert!(!markers::is_ready(dir.path()));
        let rendered =
            fs::read_to_string(dir.path().join("nginx-configs").join("chat.example.com")).unwrap();
        let port: u16 = rendered
            .trim_start_matches("server_name chat.example.com; listen ")
            .trim_end_matches(';')
            .parse()
            .unwrap();
        assert!(PortRange::new(range.0, range.1).unwrap().contains(port));
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn relative_paths_resolve_against_work_dir() {
        let work = Path::new("/srv/app");
        assert_eq!(
            resolve(work, Path::new("nginx-template.txt")),
            PathBuf::from("/srv/app/nginx-template.txt")
        );
        assert_eq!(
            resolve(work, Path::new("/etc/nginx/sites-enabled")),
            PathBuf::from("/etc/nginx/sites-enabled")
        );
    }
}
