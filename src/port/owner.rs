//! Correlates the process bound to a port with the process a supervisor
//! reports for the application.
//!
//! Every failure here is advisory. A missing `lsof`, an app pm2 has never
//! heard of, or a port nobody is bound to all resolve to "not ours".

use async_trait::async_trait;
use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on any single external lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a lookup produced no pid. Never surfaced past [`OwnerCheck`].
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: String },
    #[error("`{command}` reported no pid")]
    NoPid { command: String },
}

pub type LookupResult<T> = std::result::Result<T, LookupError>;

/// OS-level port -> pid lookup.
#[async_trait]
pub trait PortOwnerLookup: Send + Sync {
    async fn pids_on_port(&self, port: u16) -> LookupResult<HashSet<u32>>;
}

/// External process supervisor (pm2) queried by application name.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn pids_for_app(&self, app_name: &str) -> LookupResult<HashSet<u32>>;
}

/// Run a command with a timeout and return its stdout.
async fn run_lookup(program: &str, args: &[String], timeout: Duration) -> LookupResult<String> {
    let command = format!("{} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(LookupError::Spawn { command, source }),
        Err(_) => return Err(LookupError::Timeout { command, timeout }),
    };

    if !output.status.success() {
        return Err(LookupError::Failed {
            command,
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse one pid per line, skipping anything that is not a usable pid.
pub(crate) fn parse_pid_lines(stdout: &str) -> HashSet<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != 0)
        .collect()
}

/// Extract `pid=N` entries from `ss -tlnp` output.
pub(crate) fn parse_ss_pids(stdout: &str) -> HashSet<u32> {
    let mut pids = HashSet::new();
    for line in stdout.lines().skip(1) {
        let Some(users_part) = line.split_whitespace().last() else {
            continue;
        };
        // ss can report multiple pids per line
        for part in users_part.split(',') {
            if let Some(pid) = part
                .strip_prefix("pid=")
                .and_then(|pid_str| pid_str.parse::<u32>().ok())
            {
                pids.insert(pid);
            }
        }
    }
    pids
}

/// `lsof -i :PORT -t`, with `ss` as a fallback on Linux where lsof is often
/// not installed.
#[derive(Debug, Clone)]
pub struct LsofLookup {
    timeout: Duration,
}

impl LsofLookup {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn lsof(&self, port: u16) -> LookupResult<HashSet<u32>> {
        let args = vec![
            "-i".to_string(),
            format!(":{}", port),
            "-sTCP:LISTEN".to_string(),
            "-t".to_string(),
        ];
        let stdout = run_lookup("lsof", &args, self.timeout).await?;
        non_empty(parse_pid_lines(&stdout), "lsof")
    }

    #[cfg(target_os = "linux")]
    async fn ss(&self, port: u16) -> LookupResult<HashSet<u32>> {
        let args = vec!["-tlnpH".to_string(), format!("sport = :{}", port)];
        let stdout = run_lookup("ss", &args, self.timeout).await?;
        // -H drops the header; re-add a dummy line so the parser can skip it.
        non_empty(parse_ss_pids(&format!("\n{}", stdout)), "ss")
    }
}

impl Default for LsofLookup {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TIMEOUT)
    }
}

#[async_trait]
impl PortOwnerLookup for LsofLookup {
    async fn pids_on_port(&self, port: u16) -> LookupResult<HashSet<u32>> {
        match self.lsof(port).await {
            Ok(pids) => Ok(pids),
            #[cfg(target_os = "linux")]
            Err(e) => {
                tracing::debug!("lsof lookup for port {} failed ({}), trying ss", port, e);
                self.ss(port).await
            }
            #[cfg(not(target_os = "linux"))]
            Err(e) => Err(e),
        }
    }
}

/// `pm2 pid <app>`.
///
/// pm2 prints one pid per instance (cluster mode) and `0` or nothing for
/// stopped apps. Pids whose process no longer exists are dropped.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    timeout: Duration,
}

impl Pm2Supervisor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for Pm2Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TIMEOUT)
    }
}

#[async_trait]
impl ProcessSupervisor for Pm2Supervisor {
    async fn pids_for_app(&self, app_name: &str) -> LookupResult<HashSet<u32>> {
        let args = vec!["pid".to_string(), app_name.to_string()];
        let stdout = run_lookup("pm2", &args, self.timeout).await?;
        let pids = parse_pid_lines(&stdout)
            .into_iter()
            .filter(|pid| process_exists(*pid))
            .collect();
        non_empty(pids, "pm2 pid")
    }
}

fn non_empty(pids: HashSet<u32>, command: &str) -> LookupResult<HashSet<u32>> {
    if pids.is_empty() {
        Err(LookupError::NoPid {
            command: command.to_string(),
        })
    } else {
        Ok(pids)
    }
}

fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;

        let Some(nix_pid) = crate::error::validate_pid_for_check(pid) else {
            return false;
        };

        // Signal 0 checks existence without delivering anything
        match kill(nix_pid, None) {
            Ok(_) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Decides whether a port is held by this application's own supervised process.
pub struct OwnerCheck {
    ports: Box<dyn PortOwnerLookup>,
    supervisor: Box<dyn ProcessSupervisor>,
}

impl OwnerCheck {
    pub fn new(ports: Box<dyn PortOwnerLookup>, supervisor: Box<dyn ProcessSupervisor>) -> Self {
        Self { ports, supervisor }
    }

    /// True iff a pid bound to `port` is one the supervisor reports for `app_name`.
    pub async fn is_owned_by_self(&self, port: u16, app_name: &str) -> bool {
        let port_pids = match self.ports.pids_on_port(port).await {
            Ok(pids) => pids,
            Err(e) => {
                tracing::debug!("Owner check: no pid for port {}: {}", port, e);
                return false;
            }
        };

        let app_pids = match self.supervisor.pids_for_app(app_name).await {
            Ok(pids) => pids,
            Err(e) => {
                tracing::debug!("Owner check: no pid for app '{}': {}", app_name, e);
                return false;
            }
        };

        let owned = !port_pids.is_disjoint(&app_pids);
        tracing::debug!(
            "Owner check for port {}: port pids {:?}, '{}' pids {:?} -> {}",
            port,
            port_pids,
            app_name,
            app_pids,
            owned
        );
        owned
    }
}

impl Default for OwnerCheck {
    fn default() -> Self {
        Self::new(
            Box::new(LsofLookup::default()),
            Box::new(Pm2Supervisor::default()),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Lookup returning a fixed answer.
    pub(crate) struct Fixed(pub Option<Vec<u32>>);

    impl Fixed {
        fn answer(&self, command: &str) -> LookupResult<HashSet<u32>> {
            match &self.0 {
                Some(pids) => Ok(pids.iter().copied().collect()),
                None => Err(LookupError::NoPid {
                    command: command.to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl PortOwnerLookup for Fixed {
        async fn pids_on_port(&self, _port: u16) -> LookupResult<HashSet<u32>> {
            self.answer("fixed-port")
        }
    }

    #[async_trait]
    impl ProcessSupervisor for Fixed {
        async fn pids_for_app(&self, _app_name: &str) -> LookupResult<HashSet<u32>> {
            self.answer("fixed-app")
        }
    }

    pub(crate) fn check(port_pids: Option<Vec<u32>>, app_pids: Option<Vec<u32>>) -> OwnerCheck {
        OwnerCheck::new(Box::new(Fixed(port_pids)), Box::new(Fixed(app_pids)))
    }

    #[tokio::test]
    async fn matching_pids_are_owned() {
        assert!(check(Some(vec![4242]), Some(vec![4242])).is_owned_by_self(3000, "chat").await);
    }

    #[tokio::test]
    async fn cluster_mode_matches_any_instance() {
        let owner = check(Some(vec![4243]), Some(vec![4242, 4243, 4244]));
        assert!(owner.is_owned_by_self(3000, "chat").await);
    }

    #[tokio::test]
    async fn different_pids_are_not_owned() {
        assert!(!check(Some(vec![1111]), Some(vec![2222])).is_owned_by_self(3000, "chat").await);
    }

    #[tokio::test]
    async fn lookup_failures_degrade_to_false() {
        assert!(!check(None, Some(vec![1])).is_owned_by_self(3000, "chat").await);
        assert!(!check(Some(vec![1]), None).is_owned_by_self(3000, "chat").await);
        assert!(!check(None, None).is_owned_by_self(3000, "chat").await);
    }

    #[tokio::test]
    async fn missing_tool_is_a_lookup_failure() {
        let err = run_lookup(
            "portly-definitely-not-a-real-binary",
            &[],
            DEFAULT_LOOKUP_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LookupError::Spawn { .. }));
    }

    #[test]
    fn pid_lines_skip_noise() {
        let pids = parse_pid_lines("1234\n\n0\n[PM2] not found\n 5678 \n");
        assert_eq!(pids, HashSet::from([1234, 5678]));
    }

    #[test]
    fn ss_output_parsing() {
        let stdout = "State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
                      LISTEN 0      511    0.0.0.0:3000       0.0.0.0:*     users:((\"node\",pid=4242,fd=19),(\"node\",pid=4243,fd=19))\n";
        assert_eq!(parse_ss_pids(stdout), HashSet::from([4242, 4243]));
    }

    #[test]
    fn own_process_exists() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(0));
    }
}
