//! Locating vendor shared libraries at startup.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Environment override for the machine-vision SDK library path.
pub const MVS_LIBRARY_ENV: &str = "ROBOVISION_MVS_LIB";

/// Base name of the machine-vision SDK library.
pub const MVS_LIBRARY_NAME: &str = "MvCameraControl";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{name} ({arch}-bit) not found; searched {searched:?}")]
    NotFound {
        name: String,
        arch: &'static str,
        searched: Vec<PathBuf>,
    },
    #[error("configured library {0:?} does not exist")]
    MissingOverride(PathBuf),
}

/// Pointer width of this process, as the vendor directory layouts spell it.
pub fn process_arch() -> &'static str {
    if cfg!(target_pointer_width = "64") { "64" } else { "32" }
}

/// Platform file name for a library base name (`libfoo.so`, `foo.dll`, ...).
pub fn library_file_name(base: &str) -> OsString {
    libloading::library_filename(base)
}

/// Directories searched for the machine-vision SDK, most specific first.
pub fn mvs_search_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
    let arch = process_arch();
    let mut dirs: Vec<PathBuf> = extra.to_vec();

    if let Some(exe_dir) = env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir.join("MvImport"));
        dirs.push(exe_dir.join("..").join("MvImport"));
    }
    dirs.push(PathBuf::from(format!("/opt/MVS/lib/{arch}")));
    dirs.push(PathBuf::from(format!("/opt/MVS/bin/{arch}")));
    dirs
}

/// Find `file_name` in the first directory that has it.
pub fn locate_in(
    file_name: &OsString,
    dirs: &[PathBuf],
    name: &str,
) -> Result<PathBuf, DiscoveryError> {
    for dir in dirs {
        let candidate = dir.join(file_name);
        debug!("probing {:?}", candidate);
        if candidate.is_file() {
            info!("found {name} at {:?}", candidate);
            return Ok(candidate);
        }
    }

    Err(DiscoveryError::NotFound {
        name: name.to_string(),
        arch: process_arch(),
        searched: dirs.to_vec(),
    })
}

/// Resolve the machine-vision SDK library.
///
/// An explicit path (argument, then environment) wins and must exist;
/// otherwise the architecture-specific search directories are tried.
pub fn locate_mvs_library(
    explicit: Option<&Path>,
    extra_dirs: &[PathBuf],
) -> Result<PathBuf, DiscoveryError> {
    let override_path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(MVS_LIBRARY_ENV).map(PathBuf::from));

    if let Some(path) = override_path {
        return if path.is_file() {
            Ok(path)
        } else {
            Err(DiscoveryError::MissingOverride(path))
        };
    }

    locate_in(
        &library_file_name(MVS_LIBRARY_NAME),
        &mvs_search_dirs(extra_dirs),
        MVS_LIBRARY_NAME,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_first_matching_directory_wins() -> anyhow::Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;
        let file_name = library_file_name("FakeSdk");
        fs::write(second.path().join(&file_name), b"")?;

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let found = locate_in(&file_name, &dirs, "FakeSdk")?;
        assert_eq!(found, second.path().join(&file_name));
        Ok(())
    }

    #[test]
    fn test_not_found_lists_searched_dirs() -> anyhow::Result<()> {
        let empty = tempfile::tempdir()?;
        let dirs = vec![empty.path().to_path_buf()];

        match locate_in(&library_file_name("FakeSdk"), &dirs, "FakeSdk") {
            Err(DiscoveryError::NotFound { searched, arch, .. }) => {
                assert_eq!(searched, dirs);
                assert_eq!(arch, process_arch());
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let result = locate_mvs_library(Some(Path::new("/nonexistent/libMvCameraControl.so")), &[]);
        assert!(matches!(result, Err(DiscoveryError::MissingOverride(_))));
    }

    #[test]
    fn test_search_dirs_follow_process_arch() {
        let dirs = mvs_search_dirs(&[]);
        let expected = PathBuf::from(format!("/opt/MVS/lib/{}", process_arch()));
        assert!(dirs.contains(&expected));
    }
}
