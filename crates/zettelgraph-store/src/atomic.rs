//! Per-path locking and reversible filesystem effects
//!
//! Replaces ad-hoc "try, then clean up" sequences with:
//! 1. A lock table holding only the paths currently in use
//! 2. A journal that records each applied effect with enough data to undo it
//! 3. Transactions that lock, apply, call back, and roll back on failure

use crate::VaultError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ============================================================================
// Path Locks
// ============================================================================

/// Mutual exclusion keyed by path.
///
/// A path is present in the table only while some guard holds it. Sets of
/// paths are always acquired in sorted order, so two callers locking
/// overlapping sets cannot deadlock. Not re-entrant.
#[derive(Default)]
pub struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every path in `paths` is held by the returned guard.
    pub fn acquire<I>(&self, paths: I) -> PathGuard<'_>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut ordered: Vec<PathBuf> = paths.into_iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut held = self.held.lock();
        for path in &ordered {
            while held.contains(path) {
                self.released.wait(&mut held);
            }
            held.insert(path.clone());
        }
        drop(held);

        tracing::trace!(paths = ordered.len(), "acquired path locks");
        PathGuard {
            locks: self,
            paths: ordered,
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.held.lock().contains(path)
    }

    /// Number of paths currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Releases its paths on drop.
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    paths: Vec<PathBuf>,
}

impl PathGuard<'_> {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock();
        for path in &self.paths {
            held.remove(path);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

// ============================================================================
// Journal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug)]
enum FsEffect {
    Renamed { from: PathBuf, to: PathBuf },
    CreatedDir(PathBuf),
    CreatedFile(PathBuf),
    Replaced { path: PathBuf, previous: Vec<u8> },
    RemovedFile { path: PathBuf, contents: Vec<u8> },
    RemovedDir(PathBuf),
}

/// Filesystem effects applied so far, undoable in reverse order.
///
/// Dropping an active journal rolls it back, so a panic inside a
/// transaction still restores the tree.
#[derive(Debug)]
pub struct FsJournal {
    effects: Vec<FsEffect>,
    state: TxState,
}

impl Default for FsJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl FsJournal {
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
            state: TxState::Active,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Renames `from` to `to`; refuses to overwrite an existing entry.
    pub fn rename(&mut self, from: &Path, to: &Path) -> Result<(), VaultError> {
        if fs::symlink_metadata(from).is_err() {
            return Err(VaultError::NotFound(from.display().to_string()));
        }
        if from != to && fs::symlink_metadata(to).is_ok() {
            return Err(VaultError::RenameConflict(to.to_path_buf()));
        }
        fs::rename(from, to).map_err(VaultError::io(from))?;
        tracing::debug!(from = %from.display(), to = %to.display(), "renamed");
        self.effects.push(FsEffect::Renamed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    /// Creates `dir` and any missing ancestors, recording each one created.
    pub fn create_dir_all(&mut self, dir: &Path) -> Result<(), VaultError> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path.as_os_str().is_empty() || path.exists() {
                break;
            }
            missing.push(path.to_path_buf());
            current = path.parent();
        }
        for path in missing.into_iter().rev() {
            fs::create_dir(&path).map_err(VaultError::io(&path))?;
            self.effects.push(FsEffect::CreatedDir(path));
        }
        Ok(())
    }

    /// Creates a new file; fails with `RenameConflict` if it already exists.
    pub fn create_file(&mut self, path: &Path, contents: &[u8]) -> Result<(), VaultError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::AlreadyExists => VaultError::RenameConflict(path.to_path_buf()),
                _ => VaultError::IoFailure {
                    path: path.to_path_buf(),
                    source,
                },
            })?;
        self.effects.push(FsEffect::CreatedFile(path.to_path_buf()));
        file.write_all(contents).map_err(VaultError::io(path))?;
        file.sync_all().map_err(VaultError::io(path))?;
        Ok(())
    }

    /// Replaces the contents of an existing file, keeping the old bytes for undo.
    pub fn replace_contents(&mut self, path: &Path, contents: &[u8]) -> Result<(), VaultError> {
        let previous = fs::read(path).map_err(VaultError::io(path))?;
        write_atomically(path, contents)?;
        self.effects.push(FsEffect::Replaced {
            path: path.to_path_buf(),
            previous,
        });
        Ok(())
    }

    pub fn remove_file(&mut self, path: &Path) -> Result<(), VaultError> {
        let contents = fs::read(path).map_err(VaultError::io(path))?;
        fs::remove_file(path).map_err(VaultError::io(path))?;
        self.effects.push(FsEffect::RemovedFile {
            path: path.to_path_buf(),
            contents,
        });
        Ok(())
    }

    /// Removes an empty directory.
    pub fn remove_dir(&mut self, path: &Path) -> Result<(), VaultError> {
        fs::remove_dir(path).map_err(VaultError::io(path))?;
        self.effects.push(FsEffect::RemovedDir(path.to_path_buf()));
        Ok(())
    }

    /// Where `original` lives now, following renames recorded so far
    /// (including renames of any ancestor directory).
    pub fn current_path(&self, original: &Path) -> PathBuf {
        let mut path = original.to_path_buf();
        for effect in &self.effects {
            if let FsEffect::Renamed { from, to } = effect {
                if let Ok(rest) = path.strip_prefix(from) {
                    path = if rest.as_os_str().is_empty() {
                        to.clone()
                    } else {
                        to.join(rest)
                    };
                }
            }
        }
        path
    }

    pub fn commit(mut self) {
        self.state = TxState::Committed;
        self.effects.clear();
    }

    /// Undoes every effect, newest first. Returns the undo steps that failed.
    pub fn rollback(mut self) -> Vec<VaultError> {
        self.undo_all()
    }

    fn undo_all(&mut self) -> Vec<VaultError> {
        let mut failures = Vec::new();
        while let Some(effect) = self.effects.pop() {
            let result = match &effect {
                FsEffect::Renamed { from, to } => fs::rename(to, from).map_err(VaultError::io(to)),
                FsEffect::CreatedDir(path) => fs::remove_dir(path).map_err(VaultError::io(path)),
                FsEffect::CreatedFile(path) => fs::remove_file(path).map_err(VaultError::io(path)),
                FsEffect::Replaced { path, previous } => write_atomically(path, previous),
                FsEffect::RemovedFile { path, contents } => {
                    fs::write(path, contents).map_err(VaultError::io(path))
                }
                FsEffect::RemovedDir(path) => fs::create_dir(path).map_err(VaultError::io(path)),
            };
            if let Err(err) = result {
                tracing::warn!(effect = ?effect, error = %err, "undo step failed");
                failures.push(err);
            }
        }
        self.state = TxState::RolledBack;
        failures
    }
}

impl Drop for FsJournal {
    fn drop(&mut self) {
        if self.state == TxState::Active && !self.effects.is_empty() {
            tracing::warn!(effects = self.effects.len(), "journal dropped while active");
            self.undo_all();
        }
    }
}

/// Writes `contents` to a sibling temporary file and renames it over `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), VaultError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(VaultError::io(dir))?;
    if let Ok(meta) = fs::metadata(path) {
        if let Err(err) = tmp.as_file().set_permissions(meta.permissions()) {
            tracing::debug!(path = %path.display(), error = %err, "could not carry permissions over");
        }
    }
    tmp.write_all(contents).map_err(VaultError::io(path))?;
    tmp.as_file().sync_all().map_err(VaultError::io(path))?;
    tmp.persist(path).map_err(|err| VaultError::IoFailure {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

// ============================================================================
// Atomic Operations
// ============================================================================

/// Lock-then-apply primitives with rollback.
#[derive(Default)]
pub struct AtomicOps {
    locks: PathLocks,
}

impl AtomicOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Runs `body` while holding every path in `paths`.
    ///
    /// Effects recorded in the journal are undone if `body` fails; the
    /// locks are released only after the rollback.
    pub fn transaction<T, I, F>(&self, paths: I, body: F) -> Result<T, VaultError>
    where
        I: IntoIterator<Item = PathBuf>,
        F: FnOnce(&mut FsJournal) -> Result<T, VaultError>,
    {
        let _guard = self.locks.acquire(paths);
        let mut journal = FsJournal::new();
        match body(&mut journal) {
            Ok(value) => {
                journal.commit();
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, effects = journal.len(), "rolling back");
                let failures = journal.rollback();
                if !failures.is_empty() {
                    tracing::warn!(failed = failures.len(), "rollback incomplete");
                }
                Err(err)
            }
        }
    }

    /// Moves every source into `target_dir`, keeping file names, then calls
    /// `update` with the new paths.
    ///
    /// `also_lock` names the paths `update` touches beyond the moved entries,
    /// such as renamed destinations and files whose references get rewritten.
    pub fn atomic_move<T, F>(
        &self,
        sources: &[PathBuf],
        target_dir: &Path,
        also_lock: &[PathBuf],
        update: F,
    ) -> Result<T, VaultError>
    where
        F: FnOnce(&mut FsJournal, &[PathBuf]) -> Result<T, VaultError>,
    {
        let mut destinations = Vec::with_capacity(sources.len());
        for source in sources {
            let name = source
                .file_name()
                .ok_or_else(|| VaultError::NotFound(source.display().to_string()))?;
            destinations.push(target_dir.join(name));
        }

        let mut touched: Vec<PathBuf> = sources.to_vec();
        touched.extend(destinations.iter().cloned());
        touched.push(target_dir.to_path_buf());
        touched.extend(also_lock.iter().cloned());

        self.transaction(touched, |journal| {
            for (source, destination) in sources.iter().zip(&destinations) {
                journal.rename(source, destination)?;
            }
            update(journal, &destinations)
        })
    }

    /// Renames `old` to `new`, then calls `update`. `also_lock` works as for
    /// [`AtomicOps::atomic_move`].
    pub fn atomic_rename<T, F>(
        &self,
        old: &Path,
        new: &Path,
        also_lock: &[PathBuf],
        update: F,
    ) -> Result<T, VaultError>
    where
        F: FnOnce(&mut FsJournal) -> Result<T, VaultError>,
    {
        let mut touched = vec![old.to_path_buf(), new.to_path_buf()];
        touched.extend(also_lock.iter().cloned());
        self.transaction(touched, |journal| {
            journal.rename(old, new)?;
            update(journal)
        })
    }

    /// Creates `path` (and missing parent directories) with `contents`.
    pub fn atomic_create<T, F>(&self, path: &Path, contents: &[u8], update: F) -> Result<T, VaultError>
    where
        F: FnOnce(&mut FsJournal) -> Result<T, VaultError>,
    {
        self.transaction([path.to_path_buf()], |journal| {
            if let Some(parent) = path.parent() {
                journal.create_dir_all(parent)?;
            }
            journal.create_file(path, contents)?;
            update(journal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lock_table_only_holds_active_paths() {
        let locks = PathLocks::new();
        {
            let guard = locks.acquire(vec![PathBuf::from("/b"), PathBuf::from("/a"), PathBuf::from("/b")]);
            assert_eq!(guard.paths(), &[PathBuf::from("/a"), PathBuf::from("/b")]);
            assert!(locks.is_locked(Path::new("/a")));
            assert_eq!(locks.held_count(), 2);
        }
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn overlapping_sets_serialize_without_deadlock() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    // Opposite request orders for the same two paths.
                    let paths = if i % 2 == 0 {
                        vec![PathBuf::from("/x"), PathBuf::from("/y")]
                    } else {
                        vec![PathBuf::from("/y"), PathBuf::from("/x")]
                    };
                    barrier.wait();
                    for _ in 0..20 {
                        let _guard = locks.acquire(paths.clone());
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn disjoint_sets_do_not_block_each_other() {
        let locks = PathLocks::new();
        let _a = locks.acquire(vec![PathBuf::from("/a")]);
        let _b = locks.acquire(vec![PathBuf::from("/b")]);
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn failed_transaction_restores_tree() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("sub/b.md");
        let c = dir.path().join("c.md");
        fs::write(&a, "alpha").unwrap();
        fs::write(&c, "gamma").unwrap();

        let ops = AtomicOps::new();
        let result: Result<(), VaultError> =
            ops.transaction(vec![a.clone(), b.clone(), c.clone()], |journal| {
                journal.create_dir_all(b.parent().unwrap())?;
                journal.rename(&a, &b)?;
                journal.replace_contents(&c, b"changed")?;
                journal.create_file(&dir.path().join("new.md"), b"new")?;
                Err(VaultError::NotFound("boom".into()))
            });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&a).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(&c).unwrap(), "gamma");
        assert!(!dir.path().join("sub").exists());
        assert!(!dir.path().join("new.md").exists());
        assert_eq!(ops.locks().held_count(), 0);
    }

    #[test]
    fn atomic_move_rolls_back_when_update_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        let sources = vec![dir.path().join("one.md"), dir.path().join("two.md")];
        for s in &sources {
            fs::write(s, "x").unwrap();
        }

        let ops = AtomicOps::new();
        let result: Result<(), VaultError> = ops.atomic_move(&sources, &target, &[], |_, moved| {
            assert!(moved.iter().all(|p| p.exists()));
            Err(VaultError::NotFound("graph update".into()))
        });

        assert!(result.is_err());
        assert!(sources.iter().all(|p| p.exists()));
        assert!(!target.join("one.md").exists());
    }

    #[test]
    fn atomic_move_holds_extra_paths_during_update() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        let source = dir.path().join("one.md");
        fs::write(&source, "x").unwrap();
        let renamed = target.join("01a one.md");
        let reference = dir.path().join("refs.md");

        let ops = AtomicOps::new();
        ops.atomic_move(
            std::slice::from_ref(&source),
            &target,
            &[renamed.clone(), reference.clone()],
            |_, _| {
                assert!(ops.locks().is_locked(&renamed));
                assert!(ops.locks().is_locked(&reference));
                assert!(ops.locks().is_locked(&source));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(ops.locks().held_count(), 0);
    }

    #[test]
    fn atomic_move_stops_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("two.md"), "occupied").unwrap();
        let sources = vec![dir.path().join("one.md"), dir.path().join("two.md")];
        for s in &sources {
            fs::write(s, "x").unwrap();
        }

        let ops = AtomicOps::new();
        let result = ops.atomic_move(&sources, &target, &[], |_, _| Ok(()));
        assert!(matches!(result, Err(VaultError::RenameConflict(_))));
        assert!(dir.path().join("one.md").exists());
        assert_eq!(fs::read_to_string(target.join("two.md")).unwrap(), "occupied");
    }

    #[test]
    fn atomic_create_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/01 New.md");
        let ops = AtomicOps::new();

        let failed: Result<(), VaultError> = ops.atomic_create(&path, b"body", |_| {
            Err(VaultError::NotFound("no graph".into()))
        });
        assert!(failed.is_err());
        assert!(!dir.path().join("nested").exists());

        ops.atomic_create(&path, b"body", |_| Ok(())).unwrap();
        let renamed = dir.path().join("nested/01 Renamed.md");
        ops.atomic_rename(&path, &renamed, &[], |_| Ok(())).unwrap();
        assert_eq!(fs::read_to_string(&renamed).unwrap(), "body");
        assert!(matches!(
            ops.atomic_create(&renamed, b"again", |_| Ok(())),
            Err(VaultError::RenameConflict(_))
        ));
    }

    #[test]
    fn current_path_follows_directory_renames() {
        let dir = tempfile::tempdir().unwrap();
        let old_dir = dir.path().join("old");
        fs::create_dir(&old_dir).unwrap();
        fs::write(old_dir.join("n.md"), "x").unwrap();

        let mut journal = FsJournal::new();
        journal.rename(&old_dir, &dir.path().join("new")).unwrap();
        assert_eq!(
            journal.current_path(&old_dir.join("n.md")),
            dir.path().join("new/n.md")
        );
        assert_eq!(journal.current_path(&old_dir), dir.path().join("new"));
        journal.commit();
        assert!(dir.path().join("new/n.md").exists());
    }

    #[test]
    fn dropped_journal_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        fs::write(&a, "x").unwrap();
        {
            let mut journal = FsJournal::new();
            journal.rename(&a, &dir.path().join("b.md")).unwrap();
        }
        assert!(a.exists());
    }
}
