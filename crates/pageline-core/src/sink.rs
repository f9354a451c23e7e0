//! Atomic file output: write `<name>.tmp`, fsync, rename over `<name>`

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

fn tmp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    let mut tmp = name.to_os_string();
    tmp.push(".tmp");
    Ok(path.with_file_name(tmp))
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Readers see either the old file or the complete new one. The parent
/// directory is created when missing.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path)?;
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

const TMP_SUFFIX: &str = ".json.tmp";

/// Create `dir` when missing and check that files can be created in it.
pub fn ensure_writable_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let check = dir.join(format!(".write_check{TMP_SUFFIX}"));
    File::create(&check)?;
    fs::remove_file(&check)
}

/// Remove `*.json.tmp` leftovers of interrupted [`write_json_atomic`] calls.
/// Other files in `dir` are never touched.
pub fn cleanup_tmp_files(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TMP_SUFFIX));
        if stale && path.is_file() {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
