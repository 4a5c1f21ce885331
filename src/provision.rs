//! Binary provisioning: download, unpack, permissions

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::platform::{Os, PlatformInfo};

const COPY_BUF: usize = 64 * 1024;
const PROGRESS_EVERY: u64 = 4 * 1024 * 1024;

/// Make sure the cloudflared executable exists locally, downloading and
/// unpacking it if necessary, and return its path.
///
/// When the executable is already present this is a pure path lookup with no
/// network I/O. Download, unpack and permission failures are fatal; nothing
/// is retried, and a partially written download is never visible at the
/// final path.
pub fn ensure_binary(info: &PlatformInfo) -> Result<PathBuf> {
    let executable = info.executable();
    if executable.exists() {
        debug!(path = %executable.display(), "cloudflared already provisioned");
        return Ok(executable.to_path_buf());
    }

    fs::create_dir_all(info.base_dir())?;
    let dest = info.download_dest();
    download_to(info.download_url(), &dest)?;

    // The darwin release is a tgz archive wrapping the binary.
    if info.os() == Os::Darwin {
        unpack_tgz(&dest, info.base_dir())?;
        fs::remove_file(&dest)?;
    }

    set_executable(executable)?;
    Ok(executable.to_path_buf())
}

/// Delete the provisioned executable. No-op when it is absent.
pub fn remove_binary(info: &PlatformInfo) -> Result<()> {
    let executable = info.executable();
    if executable.exists() {
        fs::remove_file(executable)?;
        info!(path = %executable.display(), "removed cloudflared");
    }
    Ok(())
}

/// Stream `url` to `dest`, writing through a `.partial` sibling and renaming
/// on completion so a truncated download is never mistaken for the binary.
fn download_to(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;
    // Content-Length may be absent; progress is then reported without a total.
    let total = response.content_length().unwrap_or(0);
    info!(url, total, "downloading cloudflared");

    let mut partial_name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    partial_name.push(".partial");
    let partial = dest.with_file_name(partial_name);

    let mut out = File::create(&partial)?;
    let mut buf = [0u8; COPY_BUF];
    let mut written: u64 = 0;
    let mut last_report: u64 = 0;
    loop {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        written += n as u64;
        if written - last_report >= PROGRESS_EVERY {
            last_report = written;
            debug!(written, total, "download progress");
        }
    }
    out.flush()?;
    drop(out);

    fs::rename(&partial, dest)?;
    info!(bytes = written, path = %dest.display(), "download complete");
    Ok(())
}

fn unpack_tgz(archive: &Path, dir: &Path) -> Result<()> {
    let output = Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(dir)
        .output()?;
    if !output.status.success() {
        return Err(Error::Unpack(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;
    use httpmock::prelude::*;
    use tempfile::tempdir;

    fn linux_info(dir: &Path) -> PlatformInfo {
        PlatformInfo::new(Os::Linux, Arch::Amd64, dir).unwrap()
    }

    #[test]
    fn existing_binary_skips_download() {
        let dir = tempdir().unwrap();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET);
            then.status(200).body("new bytes");
        });

        let info = linux_info(dir.path()).with_download_url(server.url("/cloudflared"));
        fs::write(info.executable(), b"already here").unwrap();

        let path = ensure_binary(&info).unwrap();
        assert_eq!(path, info.executable());
        assert_eq!(fs::read(&path).unwrap(), b"already here");
        mock.assert_hits(0);
    }

    #[test]
    fn download_is_atomic_and_executable() {
        let dir = tempdir().unwrap();
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cloudflared-linux-amd64");
            then.status(200).body("#!/bin/sh\n");
        });

        let info =
            linux_info(dir.path()).with_download_url(server.url("/cloudflared-linux-amd64"));
        let path = ensure_binary(&info).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"#!/bin/sh\n");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty(), "partial file left behind");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }
    }

    #[test]
    fn http_error_is_fatal_and_leaves_nothing() {
        let dir = tempdir().unwrap();
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(404);
        });

        let info = linux_info(dir.path()).with_download_url(server.url("/missing"));
        let err = ensure_binary(&info).unwrap_err();
        assert!(matches!(err, Error::Download(_)));
        assert!(!info.executable().exists());
    }

    #[test]
    fn remove_binary_is_idempotent() {
        let dir = tempdir().unwrap();
        let info = linux_info(dir.path());
        fs::write(info.executable(), b"bin").unwrap();

        remove_binary(&info).unwrap();
        assert!(!info.executable().exists());
        // second call is a no-op
        remove_binary(&info).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn unpack_tgz_extracts_member() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cloudflared"), b"mac binary").unwrap();
        let archive = dir.path().join("cloudflared.tgz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(dir.path())
            .arg("cloudflared")
            .status()
            .unwrap();
        assert!(status.success());
        fs::remove_file(dir.path().join("cloudflared")).unwrap();

        unpack_tgz(&archive, dir.path()).unwrap();
        assert_eq!(
            fs::read(dir.path().join("cloudflared")).unwrap(),
            b"mac binary"
        );
    }

    #[cfg(unix)]
    #[test]
    fn unpack_failure_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.tgz");
        fs::write(&archive, b"not a tgz").unwrap();
        let err = unpack_tgz(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Unpack(_)));
    }
}
