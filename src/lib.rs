//! Launcher for ad-hoc "Try Cloudflare" tunnels.
//!
//! Downloads the platform-specific `cloudflared` binary on first use, spawns
//! it as a subprocess and extracts the public tunnel URL and local metrics
//! URL from its diagnostic output.
//!
//! ```no_run
//! use trycloudflare::Launcher;
//!
//! let mut launcher = Launcher::new();
//! let handle = launcher.start(8080, None, true)?;
//! println!("serving at {}", handle.tunnel_url());
//! launcher.terminate(8080)?;
//! # Ok::<(), trycloudflare::Error>(())
//! ```

mod error;
mod platform;
mod provision;
mod tunnel;

pub use error::{Error, Result};
pub use platform::{Arch, Os, PlatformInfo};
pub use provision::{ensure_binary, remove_binary};
pub use tunnel::{try_cloudflare, Launcher, TunnelHandle};
