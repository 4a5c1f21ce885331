//! Passthrough CLI: provision cloudflared and exec it with the user's args.

use std::process::Command;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trycloudflare::{ensure_binary, PlatformInfo};

#[derive(Parser)]
#[command(
    name = "trycloudflare",
    version,
    about = "Download the cloudflared binary and run it",
    long_about = "Downloads the cloudflared binary for the current platform if it is not\n\
                  already present, then runs it with all remaining arguments passed\n\
                  through verbatim."
)]
struct Cli {
    /// Arguments forwarded to cloudflared
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Keep the launcher alive across Ctrl-C so the foreground child handles the
/// interrupt itself; its signal-death is then reported as a clean exit.
#[cfg(unix)]
fn ignore_interrupts() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_interrupts() {}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let info = PlatformInfo::resolve()?;
    let executable = ensure_binary(&info)?;

    ignore_interrupts();
    let status = Command::new(&executable).args(&cli.args).status()?;

    match status.code() {
        Some(code) => std::process::exit(code),
        // killed by a signal (the interactive case is Ctrl-C): clean exit
        None => Ok(()),
    }
}
