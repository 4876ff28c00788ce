//! Working directory stack.
//!
//! The OS keeps a single current directory per process, so a launch "in directory D"
//! temporarily moves the supervisor itself into D and back again. The stack records
//! where to return to. There is exactly one stack per process, behind a mutex, and that
//! mutex doubles as the launch lock: whoever holds it owns the process cwd.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::error::SupervisorError;

static SHARED: OnceLock<Mutex<WorkingDirectoryStack>> = OnceLock::new();

/// Ordered directories; never empty. The bottom entry is the startup directory.
#[derive(Debug)]
pub struct WorkingDirectoryStack {
    dirs: Vec<PathBuf>,
}

impl WorkingDirectoryStack {
    /// The process-wide stack. The first call records the current directory as the bottom entry.
    pub fn shared() -> &'static Mutex<WorkingDirectoryStack> {
        SHARED.get_or_init(|| Mutex::new(Self::capture()))
    }

    /// Locks the process-wide stack, serializing every caller that changes the cwd.
    pub fn lock_shared() -> MutexGuard<'static, WorkingDirectoryStack> {
        Self::shared()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn capture() -> Self {
        let startup = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            dirs: vec![startup],
        }
    }

    pub fn top(&self) -> &Path {
        // `dirs` is never empty: `pop` refuses to remove the bottom entry.
        self.dirs.last().map(PathBuf::as_path).unwrap_or(Path::new("."))
    }

    pub fn bottom(&self) -> &Path {
        self.dirs.first().map(PathBuf::as_path).unwrap_or(Path::new("."))
    }

    pub fn depth(&self) -> usize {
        self.dirs.len()
    }

    /// Enters `path` and records it as the new top.
    ///
    /// Relative paths resolve against the current top. On error the stack and the
    /// process cwd are left untouched.
    pub fn push(&mut self, path: &Path) -> Result<&Path, SupervisorError> {
        let resolved = path.canonicalize().map_err(|source| SupervisorError::Directory {
            path: path.to_path_buf(),
            source,
        })?;
        env::set_current_dir(&resolved).map_err(|source| SupervisorError::Directory {
            path: resolved.clone(),
            source,
        })?;
        self.dirs.push(resolved);
        Ok(self.top())
    }

    /// Drops the top entry and returns the process to the directory below it.
    pub fn pop(&mut self) -> Result<(), SupervisorError> {
        if self.dirs.len() <= 1 {
            return Err(SupervisorError::InvariantViolation(
                "working directory stack popped without a matching push".to_string(),
            ));
        }
        self.dirs.pop();
        let top = self.top().to_path_buf();
        env::set_current_dir(&top).map_err(|source| SupervisorError::Directory { path: top, source })
    }

    /// Runs `f` inside `path`, popping afterwards whether or not `f` succeeded.
    pub fn scoped<T>(
        &mut self,
        path: &Path,
        f: impl FnOnce(&Path) -> Result<T, SupervisorError>,
    ) -> Result<T, SupervisorError> {
        let entered = self.push(path)?.to_path_buf();
        let result = f(&entered);
        self.pop()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_dir() -> PathBuf {
        env::current_dir().unwrap()
    }

    #[test]
    fn pop_on_startup_entry_is_an_invariant_violation() {
        let mut stack = WorkingDirectoryStack::capture();
        let err = stack.pop().unwrap_err();
        assert!(matches!(err, SupervisorError::InvariantViolation(_)));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn push_of_missing_directory_leaves_stack_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let mut stack = WorkingDirectoryStack::lock_shared();
        let depth = stack.depth();
        let err = stack.push(&missing).unwrap_err();
        assert!(matches!(err, SupervisorError::Directory { .. }));
        assert_eq!(stack.depth(), depth);
        assert_eq!(current_dir(), stack.top());
    }

    #[test]
    fn push_of_a_file_is_a_directory_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        let mut stack = WorkingDirectoryStack::lock_shared();
        assert!(matches!(
            stack.push(&file),
            Err(SupervisorError::Directory { .. })
        ));
        assert_eq!(current_dir(), stack.top());
    }

    #[test]
    fn nested_push_pop_returns_to_startup() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("inner");
        std::fs::create_dir(&inner).unwrap();

        let mut stack = WorkingDirectoryStack::lock_shared();
        let startup = stack.bottom().to_path_buf();

        stack.push(outer.path()).unwrap();
        assert_eq!(current_dir(), outer.path().canonicalize().unwrap());
        stack.push(Path::new("inner")).unwrap();
        assert_eq!(current_dir(), inner.canonicalize().unwrap());
        assert_eq!(stack.depth(), 3);

        stack.pop().unwrap();
        assert_eq!(current_dir(), outer.path().canonicalize().unwrap());
        stack.pop().unwrap();
        assert_eq!(current_dir(), startup);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn scoped_pops_even_when_the_body_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = WorkingDirectoryStack::lock_shared();
        let startup = stack.bottom().to_path_buf();

        let seen = stack
            .scoped(dir.path(), |entered| Ok(entered.to_path_buf()))
            .unwrap();
        assert_eq!(seen, dir.path().canonicalize().unwrap());

        let result: Result<(), _> = stack.scoped(dir.path(), |_| {
            Err(SupervisorError::InvariantViolation("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(stack.depth(), 1);
        assert_eq!(current_dir(), startup);
    }
}
