//! Host platform detection and download-artifact resolution
//!
//! Each supported OS/architecture pair maps to exactly one artifact from the
//! official cloudflared release page. The pairing is matched exhaustively so
//! an unsupported combination is rejected at construction time rather than
//! surfacing later as a 404.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const RELEASE_BASE: &str = "https://github.com/cloudflare/cloudflared/releases/latest/download";

/// Operating systems with a published cloudflared build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    /// Detect the running OS. `None` when cloudflared has no build for it.
    fn host() -> Option<Os> {
        match env::consts::OS {
            "linux" => Some(Os::Linux),
            "macos" => Some(Os::Darwin),
            "windows" => Some(Os::Windows),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        }
    }
}

/// CPU architectures with a published cloudflared build, named as the
/// release artifacts name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    Amd64,
    Arm,
    Arm64,
}

impl Arch {
    fn host() -> Option<Arch> {
        match env::consts::ARCH {
            "x86" => Some(Arch::X86),
            "x86_64" => Some(Arch::Amd64),
            "arm" => Some(Arch::Arm),
            "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86 => "386",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
        }
    }
}

/// Release artifact for an OS/architecture pair.
///
/// There is no native darwin/arm64 build; Apple Silicon downloads the amd64
/// archive and runs it under Rosetta (see [`PlatformInfo::needs_rosetta`]).
fn artifact_name(os: Os, arch: Arch) -> Result<&'static str> {
    let name = match (os, arch) {
        (Os::Linux, Arch::X86) => "cloudflared-linux-386",
        (Os::Linux, Arch::Amd64) => "cloudflared-linux-amd64",
        (Os::Linux, Arch::Arm) => "cloudflared-linux-arm",
        (Os::Linux, Arch::Arm64) => "cloudflared-linux-arm64",
        (Os::Windows, Arch::X86) => "cloudflared-windows-386.exe",
        (Os::Windows, Arch::Amd64) => "cloudflared-windows-amd64.exe",
        (Os::Darwin, Arch::Amd64 | Arch::Arm64) => "cloudflared-darwin-amd64.tgz",
        (os, arch) => {
            return Err(Error::UnsupportedPlatform {
                os: os.as_str().to_string(),
                arch: arch.as_str().to_string(),
            })
        }
    };
    Ok(name)
}

/// Where to download cloudflared from and where the executable lives locally.
///
/// Immutable once constructed; construction fails for platforms without a
/// release artifact.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    os: Os,
    arch: Arch,
    artifact: &'static str,
    download_url: String,
    base_dir: PathBuf,
    executable: PathBuf,
}

impl PlatformInfo {
    /// Resolve the running host, storing the binary under the OS temp dir.
    pub fn resolve() -> Result<Self> {
        Self::resolve_in(env::temp_dir())
    }

    /// Resolve the running host, storing the binary under `base_dir`.
    pub fn resolve_in(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let os = Os::host().ok_or_else(|| Error::UnsupportedPlatform {
            os: env::consts::OS.to_lowercase(),
            arch: env::consts::ARCH.to_lowercase(),
        })?;
        let arch = Arch::host().ok_or_else(|| Error::UnsupportedPlatform {
            os: env::consts::OS.to_lowercase(),
            arch: env::consts::ARCH.to_lowercase(),
        })?;
        Self::new(os, arch, base_dir)
    }

    /// Build the info for an explicit OS/architecture pair.
    pub fn new(os: Os, arch: Arch, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let artifact = artifact_name(os, arch)?;
        let base_dir = base_dir.into();
        // The darwin artifact is an archive; the executable inside it has a
        // fixed name. Everywhere else the download is the executable.
        let executable = if os == Os::Darwin {
            base_dir.join("cloudflared")
        } else {
            base_dir.join(artifact)
        };
        Ok(PlatformInfo {
            os,
            arch,
            artifact,
            download_url: format!("{RELEASE_BASE}/{artifact}"),
            base_dir,
            executable,
        })
    }

    pub fn os(&self) -> Os {
        self.os
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    /// Final executable path; exists only after provisioning.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub(crate) fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path the artifact is downloaded to. Differs from [`executable`]
    /// only on darwin, where the download is a `.tgz`.
    ///
    /// [`executable`]: Self::executable
    pub(crate) fn download_dest(&self) -> PathBuf {
        self.base_dir.join(self.artifact)
    }

    /// Whether the binary must run under `arch -x86_64` (Apple Silicon
    /// executing the Intel-only build).
    pub fn needs_rosetta(&self) -> bool {
        self.os == Os::Darwin && self.arch == Arch::Arm64
    }

    #[cfg(test)]
    pub(crate) fn with_download_url(mut self, url: String) -> Self {
        self.download_url = url;
        self
    }
}
