//! Copy credential files to durable storage.
//!
//! `/etc` lives on a volatile filesystem on the BMC, so after every password
//! attempt the credential database is copied into a directory on flash.
//! Copies into the same directory are serialized by an exclusive `flock` on
//! [`LOCK_FILE_NAME`] inside it, which also holds across `plat` processes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use nix::fcntl::{Flock, FlockArg};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Lock file created in every destination directory.
pub const LOCK_FILE_NAME: &str = ".persist.lock";

/// Block until this process holds the exclusive lock for `dest_dir`.
/// Released when the returned guard drops.
fn lock_dest(dest_dir: &Path) -> Result<Flock<File>> {
    let path = dest_dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| anyhow!("lock {}: {errno}", path.display()))
}

/// Copy each file into `dest_dir` under its own file name.
///
/// Every file is attempted even if an earlier one fails; the first error is
/// returned after all copies ran. Each copy is atomic (unique temp file +
/// rename).
#[instrument(skip_all, fields(dest_dir = %dest_dir.display(), files = files.len()))]
pub fn persist_credentials(files: &[PathBuf], dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("create directory {}", dest_dir.display()))?;
    let _guard = lock_dest(dest_dir)?;

    let mut first_err = None;
    for src in files {
        match copy_atomic(src, dest_dir) {
            Ok(dest) => debug!(src = %src.display(), dest = %dest.display(), "persisted"),
            Err(e) => {
                warn!(src = %src.display(), err = %format!("{e:#}"), "persist failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Persist and log the result; never fails.
///
/// The caller's own outcome must not depend on whether storage was writable.
pub fn persist_best_effort(files: &[PathBuf], dest_dir: &Path) -> bool {
    match persist_credentials(files, dest_dir) {
        Ok(()) => {
            info!(dest_dir = %dest_dir.display(), "credential files persisted");
            true
        }
        Err(e) => {
            warn!(
                dest_dir = %dest_dir.display(),
                err = %format!("{e:#}"),
                "credential persistence failed"
            );
            false
        }
    }
}

fn copy_atomic(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| anyhow!("source path has no file name {}", src.display()))?;
    let dest = dest_dir.join(name);

    let mut source = File::open(src).with_context(|| format!("open {}", src.display()))?;
    let permissions = source
        .metadata()
        .with_context(|| format!("stat {}", src.display()))?
        .permissions();

    let mut tmp = NamedTempFile::new_in(dest_dir)
        .with_context(|| format!("create temp file in {}", dest_dir.display()))?;
    // Mode is applied before any bytes are written.
    tmp.as_file()
        .set_permissions(permissions)
        .with_context(|| format!("chmod {}", tmp.path().display()))?;
    io::copy(&mut source, tmp.as_file_mut())
        .with_context(|| format!("copy {} to {}", src.display(), tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", tmp.path().display()))?;
    tmp.persist(&dest)
        .map_err(|e| e.error)
        .with_context(|| format!("replace {}", dest.display()))?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn copies_files_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let passwd = temp.path().join("passwd");
        let shadow = temp.path().join("shadow");
        fs::write(&passwd, "root:x:0:0:root:/root:/bin/sh\n").expect("write passwd");
        fs::write(&shadow, "root:$6$hash:19000::::::\n").expect("write shadow");
        fs::set_permissions(&shadow, fs::Permissions::from_mode(0o600)).expect("chmod");

        let dest = temp.path().join("mnt/data/etc");
        persist_credentials(&[passwd.clone(), shadow.clone()], &dest).expect("persist");

        assert_eq!(
            fs::read(dest.join("passwd")).expect("read"),
            fs::read(&passwd).expect("read")
        );
        assert_eq!(
            fs::read(dest.join("shadow")).expect("read"),
            fs::read(&shadow).expect("read")
        );
        let mode = fs::metadata(dest.join("shadow")).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let mut names: Vec<_> = fs::read_dir(&dest)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().into_string().expect("utf8"))
            .collect();
        names.sort();
        assert_eq!(names, vec![LOCK_FILE_NAME, "passwd", "shadow"]);
    }

    #[test]
    fn missing_source_reports_error_but_copies_the_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shadow = temp.path().join("shadow");
        fs::write(&shadow, "root:*:19000::::::\n").expect("write");
        let dest = temp.path().join("dest");

        let err = persist_credentials(&[temp.path().join("passwd"), shadow], &dest).unwrap_err();
        assert!(format!("{err:#}").contains("passwd"));
        assert!(dest.join("shadow").exists());
    }

    #[test]
    fn best_effort_swallows_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A regular file where the destination directory should be.
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "").expect("write");
        assert!(!persist_best_effort(&[temp.path().join("passwd")], &blocker.join("etc")));
    }

    #[test]
    fn concurrent_persists_to_same_dir_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("passwd");
        fs::write(&src, "admin:x:1000:1000::/home/admin:/bin/sh\n").expect("write");
        let dest = temp.path().join("dest");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let src = src.clone();
                let dest = dest.clone();
                thread::spawn(move || persist_credentials(&[src], &dest))
            })
            .collect();
        for handle in handles {
            handle.join().expect("join").expect("persist");
        }
        assert_eq!(
            fs::read(dest.join("passwd")).expect("read"),
            fs::read(&src).expect("read")
        );
    }

    #[test]
    fn same_directory_spelled_two_ways_is_serialized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shadow = temp.path().join("shadow");
        let line = "admin:$6$0123456789abcdef:19000::::::\n";
        fs::write(&shadow, line.repeat(4 * 1024 * 1024 / line.len())).expect("write");
        fs::create_dir_all(temp.path().join("sub")).expect("mkdir");
        let dest = temp.path().join("dest");
        let other_spelling = temp.path().join("sub/../dest");

        for _ in 0..10 {
            let handles: Vec<_> = [dest.clone(), other_spelling.clone()]
                .into_iter()
                .map(|dir| {
                    let src = shadow.clone();
                    thread::spawn(move || persist_credentials(&[src], &dir))
                })
                .collect();
            for handle in handles {
                handle.join().expect("join").expect("persist");
            }
        }
        assert_eq!(
            fs::read(dest.join("shadow")).expect("read"),
            fs::read(&shadow).expect("read")
        );
    }

    #[test]
    fn waits_for_lock_held_through_another_descriptor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("passwd");
        fs::write(&src, "admin:x:1000:1000::/home/admin:/bin/sh\n").expect("write");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).expect("mkdir");

        // A separate open file description conflicts the same way another
        // process's would.
        let held = lock_dest(&dest).expect("lock");
        let (tx, rx) = mpsc::channel();
        let worker = {
            let dest = dest.clone();
            thread::spawn(move || {
                let result = persist_credentials(&[src], &dest);
                let _ = tx.send(Instant::now());
                result
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(!dest.join("passwd").exists());
        let released = Instant::now();
        drop(held);

        let finished = rx.recv_timeout(Duration::from_secs(5)).expect("persist finished");
        assert!(finished >= released);
        worker.join().expect("join").expect("persist");
        assert!(dest.join("passwd").exists());
    }
}
