use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Install `src` at `dest` without ever exposing a partial file at `dest`.
///
/// The contents are first copied into a uniquely named intermediate file in
/// `dest`'s directory and fsynced, then moved onto `dest` with a single
/// `rename`. The intermediate name is derived from the process id and an
/// atomic counter, never from the final name, so concurrent installers of
/// the same destination cannot collide before the rename.
pub(crate) fn install_atomic(src: &Path, dest: &Path) -> Result<()> {
    let parent = dest
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let (tmp_path, mut tmp_file) = open_unique_tmp_file(dest, parent)?;
    let copy_result = (|| -> io::Result<()> {
        let mut reader = fs::File::open(src)?;
        io::copy(&mut reader, &mut tmp_file)?;
        tmp_file.sync_all()?;
        Ok(())
    })();
    drop(tmp_file);
    if let Err(err) = copy_result {
        remove_tmp_best_effort(&tmp_path, "copy failure");
        return Err(err.into());
    }

    if let Err(err) = rename_over(&tmp_path, dest) {
        remove_tmp_best_effort(&tmp_path, "rename failure");
        return Err(err.into());
    }

    sync_dir_best_effort(parent);
    Ok(())
}

/// `fs::rename` with the Windows caveat handled: there `rename` does not
/// overwrite, and concurrent remove+rename sequences can race, so retry a
/// bounded number of times.
fn rename_over(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_ATTEMPTS: usize = 1024;

    let mut attempts = 0usize;
    loop {
        match fs::rename(tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows)
                    && (err.kind() == io::ErrorKind::AlreadyExists || dest.exists()) =>
            {
                match fs::remove_file(dest) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn remove_tmp_best_effort(tmp_path: &Path, context: &'static str) {
    match fs::remove_file(tmp_path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            // An orphaned intermediate never occupies a final artifact name,
            // so leaving it behind is tolerated.
            tracing::debug!(
                target = "kiln.cache",
                path = %tmp_path.display(),
                context,
                error = %err,
                "failed to remove intermediate file"
            );
        }
    }
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    {
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::debug!(
                    target = "kiln.cache",
                    dir = %dir.display(),
                    error = %err,
                    "failed to sync cache directory after publish"
                );
            }
        }
    }

    #[cfg(not(unix))]
    let _ = dir;
}
