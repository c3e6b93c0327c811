//! Filesystem primitives shared by steps, backups and restore.
//!
//! Everything here works on files, directories and (on unix) symlinks
//! alike. Moves prefer `rename` and only fall back to copying when the
//! kernel reports a cross-device move.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Suffix given to a live file while a restored copy is swapped in.
pub const ASIDE_SUFFIX: &str = ".restore-backup";

/// Move `src` to `dst`, creating `dst`'s parent if needed.
///
/// Cross-device moves are done as copy, digest comparison, then delete of
/// the source. A copy that does not match is removed and the source is
/// left untouched.
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            log::debug!(
                "rename {} -> {} crosses devices, copying",
                src.display(),
                dst.display()
            );
            copy_verify_delete(src, dst)
        }
        Err(err) => Err(err),
    }
}

/// Copy `src` to `dst`, check the copy digest, then delete `src`.
pub fn copy_verify_delete(src: &Path, dst: &Path) -> io::Result<()> {
    copy_item(src, dst)?;
    if tree_digest(src)? != tree_digest(dst)? {
        let _ = remove_item(dst);
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("copy of {} does not match its source", src.display()),
        ));
    }
    remove_item(src)
}

/// Recursively copy a file, symlink or directory. Returns bytes copied.
pub fn copy_item(src: &Path, dst: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(src)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if !meta.is_dir() {
        return copy_entry(src, dst, meta.file_type().is_symlink());
    }

    let mut total = 0;
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            total += copy_entry(entry.path(), &target, file_type.is_symlink())?;
        }
    }
    Ok(total)
}

fn copy_entry(src: &Path, dst: &Path, is_symlink: bool) -> io::Result<u64> {
    if is_symlink {
        return copy_symlink(src, dst);
    }
    fs::copy(src, dst)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<u64> {
    let target = fs::read_link(src)?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(target, dst)?;
    Ok(0)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::copy(src, dst)
}

/// Remove a file, symlink or directory tree.
pub fn remove_item(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// SHA-256 over the relative paths, kinds and contents of a tree.
pub fn tree_digest(path: &Path) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            hasher.update(b"l");
            hasher.update(fs::read_link(entry.path())?.to_string_lossy().as_bytes());
        } else if file_type.is_dir() {
            hasher.update(b"d");
        } else {
            hasher.update(b"f");
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut hasher)?;
        }
    }
    Ok(hasher.finalize().into())
}

pub fn is_empty_dir(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Remove `path` if it is an empty directory. Returns whether it was removed.
pub fn remove_dir_if_empty(path: &Path) -> io::Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    if !is_empty_dir(path)? {
        return Ok(false);
    }
    fs::remove_dir(path)?;
    Ok(true)
}

/// Unique sibling temp path for an atomic write of `target`.
fn safe_temp_path(target: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    let temp_name = format!(
        "{}.tmp.{}.{}.{}",
        target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file"),
        std::process::id(),
        timestamp,
        counter
    );
    target.with_file_name(temp_name)
}

/// Replace `path` with `data` via a synced temp file and rename.
///
/// An existing file keeps its permission bits. The temp file is removed
/// if any stage fails.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());
    let temp = safe_temp_path(path);

    let result = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        if let Some(permissions) = permissions {
            fs::set_permissions(&temp, permissions)?;
        }
        fs::rename(&temp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn aside_path(live: &Path) -> PathBuf {
    let mut name = live.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(ASIDE_SUFFIX);
    live.with_file_name(name)
}

/// Remove a live item by renaming it to its `.restore-backup` sibling and
/// deleting that. Returns whether anything was there.
///
/// The live location is vacated in one rename; if deleting the sibling then
/// fails it is left behind with a warning.
pub fn retire(live: &Path) -> io::Result<bool> {
    if fs::symlink_metadata(live).is_err() {
        return Ok(false);
    }
    let aside = aside_path(live);
    if fs::symlink_metadata(&aside).is_ok() {
        remove_item(&aside)?;
    }
    fs::rename(live, &aside)?;
    if let Err(err) = remove_item(&aside) {
        log::warn!("leaving {} in place: {}", aside.display(), err);
    }
    Ok(true)
}

/// Swap a staged copy into a live location.
///
/// The live item, if any, is first renamed to a `.restore-backup` sibling.
/// The staged item is then moved into place. On success the sibling is
/// deleted; on failure the sibling is renamed back so the live location is
/// as it was before the swap.
#[derive(Debug)]
pub struct AtomicSwap<'a> {
    staged: &'a Path,
    live: &'a Path,
}

impl<'a> AtomicSwap<'a> {
    pub fn new(staged: &'a Path, live: &'a Path) -> Self {
        Self { staged, live }
    }

    pub fn aside_path(&self) -> PathBuf {
        aside_path(self.live)
    }

    pub fn commit(self) -> io::Result<()> {
        let aside = self.aside_path();
        let had_live = fs::symlink_metadata(self.live).is_ok();

        if had_live {
            if fs::symlink_metadata(&aside).is_ok() {
                remove_item(&aside)?;
            }
            fs::rename(self.live, &aside)?;
        }

        if let Err(err) = move_path(self.staged, self.live) {
            if had_live {
                if fs::symlink_metadata(self.live).is_ok() {
                    let _ = remove_item(self.live);
                }
                if let Err(restore_err) = fs::rename(&aside, self.live) {
                    log::error!(
                        "could not put {} back after failed swap: {}",
                        self.live.display(),
                        restore_err
                    );
                }
            }
            return Err(err);
        }

        if had_live {
            if let Err(err) = remove_item(&aside) {
                log::warn!("leaving {} in place: {}", aside.display(), err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn move_creates_parent() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("town.json");
        fs::write(&src, "{}").unwrap();
        let dst = tmp.path().join("mayor/town.json");

        move_path(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst).unwrap(), "{}");
    }

    #[test]
    fn copy_verify_delete_moves_directory() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/file.txt"), "data").unwrap();
        let before = tree_digest(&src).unwrap();

        let dst = tmp.path().join("b");
        copy_verify_delete(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(tree_digest(&dst).unwrap(), before);
    }

    #[test]
    fn digest_sees_content_changes() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("routes.jsonl");
        fs::write(&file, "one").unwrap();
        let first = tree_digest(&file).unwrap();
        fs::write(&file, "two").unwrap();
        assert_ne!(first, tree_digest(&file).unwrap());
    }

    #[test]
    fn write_atomic_keeps_permissions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("town.json");
        fs::write(&path, "old").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        }

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn remove_dir_if_empty_leaves_content() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".gastown");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("keep"), "x").unwrap();
        assert!(!remove_dir_if_empty(&dir).unwrap());
        fs::remove_file(dir.join("keep")).unwrap();
        assert!(remove_dir_if_empty(&dir).unwrap());
        assert!(!dir.exists());
    }

    #[test]
    fn swap_replaces_live_and_drops_aside() {
        let tmp = TempDir::new().unwrap();
        let staged = tmp.path().join("staged.json");
        let live = tmp.path().join("town.json");
        fs::write(&staged, "restored").unwrap();
        fs::write(&live, "current").unwrap();

        let swap = AtomicSwap::new(&staged, &live);
        let aside = swap.aside_path();
        swap.commit().unwrap();

        assert_eq!(fs::read_to_string(&live).unwrap(), "restored");
        assert!(!aside.exists());
        assert!(!staged.exists());
    }

    #[test]
    fn retire_clears_live_item() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("mayor");
        fs::create_dir_all(live.join("rig")).unwrap();
        fs::write(live.join("town.json"), "{}").unwrap();

        assert!(retire(&live).unwrap());
        assert!(!live.exists());
        assert!(!tmp.path().join("mayor.restore-backup").exists());
        assert!(!retire(&live).unwrap());
    }

    #[test]
    fn failed_swap_puts_live_back() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("town.json");
        fs::write(&live, "current").unwrap();
        let missing = tmp.path().join("never-staged");

        assert!(AtomicSwap::new(&missing, &live).commit().is_err());
        assert_eq!(fs::read_to_string(&live).unwrap(), "current");
        assert!(!tmp.path().join("town.json.restore-backup").exists());
    }
}
