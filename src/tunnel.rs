//! Quick-tunnel launch and diagnostic-stream scanning
//!
//! cloudflared announces a freshly created quick tunnel on stderr: one line
//! carries the public `*.trycloudflare.com` URL, another the loopback
//! metrics address. [`scan_output`] reads that stream line by line, bounded
//! by a fixed budget, until both have been seen.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::platform::PlatformInfo;
use crate::provision::ensure_binary;

/// Maximum number of diagnostic lines inspected before the launch is
/// declared failed. A line count, not a wall-clock deadline: a silent child
/// blocks the scan on the pending read.
const LINE_BUDGET: usize = 20;

static TUNNEL_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+\.trycloudflare\.com").expect("static regex"));
static METRICS_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"127\.0\.0\.1:\d+/metrics").expect("static regex"));

#[derive(Debug)]
pub(crate) struct TunnelUrls {
    pub tunnel_url: String,
    pub metrics_url: String,
}

/// Scan up to [`LINE_BUDGET`] lines for the tunnel URL and the metrics
/// address. Each match overwrites its field, so a repeated pattern wins with
/// its latest occurrence; the scan returns as soon as both are populated.
/// EOF or an exhausted budget is a failed launch.
pub(crate) fn scan_output<R: BufRead>(reader: &mut R) -> Result<TunnelUrls> {
    let mut tunnel_url = String::new();
    let mut metrics_url = String::new();

    for _ in 0..LINE_BUDGET {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            // process closed stderr before announcing both URLs
            break;
        }
        if let Some(m) = TUNNEL_URL.find(&line) {
            tunnel_url = m.as_str().to_string();
        }
        if let Some(m) = METRICS_ADDR.find(&line) {
            metrics_url = format!("http://{}", m.as_str());
        }
        if !tunnel_url.is_empty() && !metrics_url.is_empty() {
            return Ok(TunnelUrls {
                tunnel_url,
                metrics_url,
            });
        }
    }
    Err(Error::TunnelStart)
}

fn spawn_tunnel(
    info: &PlatformInfo,
    executable: &Path,
    port: u16,
    metrics_port: Option<u16>,
) -> Result<(Child, TunnelUrls)> {
    // Apple Silicon runs the Intel-only build under Rosetta.
    let mut cmd = if info.needs_rosetta() {
        let mut cmd = Command::new("arch");
        cmd.arg("-x86_64").arg(executable);
        cmd
    } else {
        Command::new(executable)
    };
    cmd.arg("tunnel")
        .arg("--url")
        .arg(format!("http://127.0.0.1:{port}"));
    if let Some(metrics_port) = metrics_port {
        cmd.arg("--metrics").arg(format!("127.0.0.1:{metrics_port}"));
    }

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;
    debug!(pid = child.id(), port, "spawned cloudflared");

    let stderr = match child.stderr.take() {
        Some(stderr) => stderr,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::TunnelStart);
        }
    };

    let mut reader = BufReader::new(stderr);
    match scan_output(&mut reader) {
        Ok(urls) => Ok((child, urls)),
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(err)
        }
    }
}

/// A running quick tunnel. Dropping the handle kills the subprocess, so the
/// tunnel lives exactly as long as its handle (or the [`Launcher`] that owns
/// it).
#[derive(Debug)]
pub struct TunnelHandle {
    port: u16,
    tunnel_url: String,
    metrics_url: String,
    child: Child,
}

impl TunnelHandle {
    /// Local port the tunnel forwards to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Public `https://<name>.trycloudflare.com` URL.
    pub fn tunnel_url(&self) -> &str {
        &self.tunnel_url
    }

    /// Local metrics endpoint, `http://127.0.0.1:<port>/metrics`.
    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }

    /// OS process id of the cloudflared subprocess.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn close(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Launches quick tunnels and tracks one per local port.
///
/// Repeated [`start`] calls for a port that already has a live tunnel return
/// the existing handle without spawning a second process. The registry is an
/// instance, not process state; `&mut self` gives callers exclusive access,
/// wrap the launcher in a `Mutex` to share it across threads.
///
/// [`start`]: Launcher::start
#[derive(Debug, Default)]
pub struct Launcher {
    base_dir: Option<PathBuf>,
    running: HashMap<u16, TunnelHandle>,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision and look up the cloudflared binary under `base_dir` instead
    /// of the OS temp dir.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Launcher {
            base_dir: Some(base_dir.into()),
            running: HashMap::new(),
        }
    }

    fn platform_info(&self) -> Result<PlatformInfo> {
        match &self.base_dir {
            Some(dir) => PlatformInfo::resolve_in(dir),
            None => PlatformInfo::resolve(),
        }
    }

    /// Open a quick tunnel to `http://127.0.0.1:<port>`, provisioning the
    /// binary first if needed.
    ///
    /// Idempotent per port: when a tunnel is already registered for `port`
    /// the existing handle is returned and no process is spawned. With
    /// `metrics_port` unset, cloudflared picks a random port for its metrics
    /// server; the chosen address is reported through the returned handle
    /// either way.
    pub fn start(
        &mut self,
        port: u16,
        metrics_port: Option<u16>,
        verbose: bool,
    ) -> Result<&TunnelHandle> {
        let info = self.platform_info()?;
        let executable = ensure_binary(&info)?;

        let handle = match self.running.entry(port) {
            Entry::Occupied(entry) => {
                debug!(port, "tunnel already running, reusing handle");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                let (child, urls) = spawn_tunnel(&info, &executable, port, metrics_port)?;
                info!(port, tunnel_url = %urls.tunnel_url, "tunnel established");
                entry.insert(TunnelHandle {
                    port,
                    tunnel_url: urls.tunnel_url,
                    metrics_url: urls.metrics_url,
                    child,
                })
            }
        };

        if verbose {
            println!(" * Running on {}", handle.tunnel_url);
            println!(" * Traffic stats available on {}", handle.metrics_url);
        }
        Ok(handle)
    }

    /// Kill the tunnel registered for `port` and drop it from the registry.
    /// Fails with [`Error::NotRunning`] when no tunnel is registered.
    pub fn terminate(&mut self, port: u16) -> Result<()> {
        let mut handle = self
            .running
            .remove(&port)
            .ok_or(Error::NotRunning(port))?;
        handle.close();
        info!(port, "tunnel terminated");
        Ok(())
    }

    /// Whether a tunnel is registered for `port`.
    pub fn is_running(&self, port: u16) -> bool {
        self.running.contains_key(&port)
    }

    /// Handle for the tunnel registered on `port`, if any.
    pub fn get(&self, port: u16) -> Option<&TunnelHandle> {
        self.running.get(&port)
    }
}

/// One-shot convenience wrapper: open a quick tunnel and return its public
/// URL, leaving the subprocess running unmanaged.
///
/// Unlike [`Launcher::start`] there is no registry and no handle; the raw
/// child is released without a kill, so the tunnel outlives the call and is
/// only torn down when the cloudflared process itself exits.
pub fn try_cloudflare(port: u16, metrics_port: Option<u16>, verbose: bool) -> Result<String> {
    let info = PlatformInfo::resolve()?;
    let executable = ensure_binary(&info)?;
    let (child, urls) = spawn_tunnel(&info, &executable, port, metrics_port)?;
    drop(child);

    if verbose {
        println!(" * Running on {}", urls.tunnel_url);
        println!(" * Traffic stats available on {}", urls.metrics_url);
    }
    Ok(urls.tunnel_url)
}
