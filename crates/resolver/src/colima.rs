//! Colima VM address discovery.
//!
//! Order of precedence:
//!
//! 1. `COLIMA_VM_IP` from the environment, if set and non-blank.
//! 2. The cached result of an earlier successful discovery, unless bypassed.
//! 3. `colima ls --json`, reading `address` from the first profile.
//! 4. [`DEFAULT_COLIMA_VM_IP`].
//!
//! Only step 3 writes the cache. A fallback to the default is never cached,
//! so a VM that comes up later is picked up on the next call.

use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Address Colima assigns its VM on a default install.
pub const DEFAULT_COLIMA_VM_IP: &str = "192.168.64.2";

/// Environment variable that overrides discovery.
pub const COLIMA_VM_IP_ENV: &str = "COLIMA_VM_IP";

/// Upper bound on the discovery command.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
}

/// Runs an external program to completion.
///
/// An `Err` means the program could not be run at all (not installed, timed
/// out); a non-zero exit is `Ok` with `success: false`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// [`CommandRunner`] that spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessCommandRunner {
    pub timeout: Duration,
}

impl Default for ProcessCommandRunner {
    fn default() -> Self {
        Self {
            timeout: DISCOVERY_TIMEOUT,
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("{program} timed out after {}ms", self.timeout.as_millis()),
                )
            })??;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Process-wide cache of the discovered VM address.
///
/// Held explicitly by whoever needs it rather than as a global, and reset
/// between tests.
#[derive(Debug, Default)]
pub struct VmIpCache {
    value: Mutex<Option<String>>,
}

impl VmIpCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        // The slot is a plain value; a panic elsewhere cannot leave it torn.
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Option<String> {
        self.slot().clone()
    }

    pub fn set(&self, ip: impl Into<String>) {
        *self.slot() = Some(ip.into());
    }

    pub fn reset(&self) {
        *self.slot() = None;
    }
}

/// Options for [`discover_colima_vm_ip`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Value of `COLIMA_VM_IP`, if any.
    pub env_override: Option<String>,
    /// Skip the cache and run discovery again.
    pub bypass_cache: bool,
}

impl DiscoveryOptions {
    /// Reads the override through `lookup`, typically `|k| std::env::var(k).ok()`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            env_override: lookup(COLIMA_VM_IP_ENV),
            bypass_cache: false,
        }
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ColimaProfile {
    #[serde(default)]
    address: Option<String>,
}

/// Returns the Colima VM's IPv4 address. Never fails; see the module docs for
/// the fallback order.
pub async fn discover_colima_vm_ip(
    options: &DiscoveryOptions,
    runner: &dyn CommandRunner,
    cache: &VmIpCache,
) -> String {
    if let Some(ip) = options
        .env_override
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }

    if !options.bypass_cache {
        if let Some(ip) = cache.get() {
            return ip;
        }
    }

    match runner.run("colima", &["ls", "--json"]).await {
        Ok(output) if output.success => match parse_colima_address(&output.stdout) {
            Some(ip) => {
                debug!(vm_ip = %ip, "Discovered Colima VM address");
                cache.set(ip.clone());
                ip
            }
            None => {
                warn!("colima ls returned no usable address; using default VM IP");
                DEFAULT_COLIMA_VM_IP.to_string()
            }
        },
        Ok(_) => {
            warn!("colima ls exited non-zero; using default VM IP");
            DEFAULT_COLIMA_VM_IP.to_string()
        }
        Err(e) => {
            warn!(error = %e, "colima unavailable; using default VM IP");
            DEFAULT_COLIMA_VM_IP.to_string()
        }
    }
}

/// `colima ls --json` prints one JSON object per profile, one per line.
fn parse_colima_address(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let profile: ColimaProfile = serde_json::from_str(line).ok()?;
    let address = profile.address?;
    address.trim().parse::<Ipv4Addr>().ok().map(|ip| ip.to_string())
}
