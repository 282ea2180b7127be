//! Ephemeral staging workspaces inside the engine's virtual filesystem.
//!
//! A workspace is a uniquely named directory subtree that exists only for
//! the duration of one pipeline call: the bundle tree is materialized into
//! it, the engine signs it in place, the result is walked back out, and the
//! whole subtree is destroyed. Uniqueness comes from a wall-clock component
//! plus a process-wide monotonic counter, so concurrent (serialized) calls
//! never collide on paths.
//!
//! Traversal and removal are iterative with an explicit stack, which bounds
//! host memory on deeply nested or adversarial archive trees. Removal is
//! bottom-up: files are unlinked before their parent directory is removed.

use crate::engine::{DirEntry, EntryKind, SigningEngine};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A uniquely named staging subtree in the engine's virtual filesystem.
///
/// Owned exclusively by the pipeline call that created it; destroyed before
/// that call completes, whatever the outcome.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: String,
}

impl Workspace {
    /// Absolute root of the subtree, forward-slash form.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Absolute path of `relative` inside the workspace.
    pub fn join(&self, relative: &str) -> String {
        format!("{}/{}", self.root, relative.trim_start_matches('/'))
    }
}

/// Payload of a single materialized node: a directory marker or file bytes.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Directory,
    Bytes(&'a [u8]),
}

/// Normalizes an archive-relative path: backslashes become forward slashes,
/// repeated separators collapse, and leading/trailing slashes are stripped.
/// Returns an empty string for names that sanitize to nothing; callers skip
/// those.
pub(crate) fn normalize_relative_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Creates a fresh, uniquely named workspace directory.
pub fn create(engine: &mut dyn SigningEngine) -> Result<Workspace> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed);
    let root = format!("/zsign_ws_{nanos}_{seq}");
    engine.create_dir_all(&root)?;
    Ok(Workspace { root })
}

/// Materializes one node under the workspace root.
///
/// The relative path is normalized first; a path that sanitizes to empty is
/// skipped rather than written. File parents are created as needed, and a
/// zero-length payload produces a zero-length file.
pub fn materialize(
    engine: &mut dyn SigningEngine,
    workspace: &Workspace,
    relative_path: &str,
    payload: Payload<'_>,
) -> Result<()> {
    let clean = normalize_relative_path(relative_path);
    if clean.is_empty() {
        return Ok(());
    }
    if clean.split('/').any(|part| part == "..") {
        return Err(Error::InvalidInput(format!(
            "path escapes the workspace: {relative_path}"
        )));
    }
    let target = workspace.join(&clean);
    match payload {
        Payload::Directory => engine.create_dir_all(&target),
        Payload::Bytes(bytes) => {
            if let Some(idx) = target.rfind('/') {
                if idx > 0 {
                    engine.create_dir_all(&target[..idx])?;
                }
            }
            engine.write_file(&target, bytes)
        }
    }
}

/// Lazy depth-first traversal of every regular file under `root`.
///
/// Each call to [`walk`] starts a fresh traversal. Items are
/// `(relative_path, bytes)` pairs; directories themselves are not yielded.
/// The first error ends the iteration.
pub struct WalkFiles<'e> {
    engine: &'e mut dyn SigningEngine,
    root: String,
    stack: Vec<(String, EntryKind)>,
}

/// Starts a traversal rooted at an absolute engine path.
pub fn walk<'e>(engine: &'e mut dyn SigningEngine, root: &str) -> WalkFiles<'e> {
    let root = root.trim_end_matches('/').to_string();
    let stack = vec![(root.clone(), EntryKind::Directory)];
    WalkFiles { engine, root, stack }
}

impl WalkFiles<'_> {
    fn push_children(&mut self, dir: &str, mut entries: Vec<DirEntry>) {
        // Reverse so the stack pops children in listing order.
        entries.reverse();
        for entry in entries {
            self.stack.push((format!("{dir}/{}", entry.name), entry.kind));
        }
    }
}

impl Iterator for WalkFiles<'_> {
    type Item = Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, kind)) = self.stack.pop() {
            match kind {
                EntryKind::Directory => match self.engine.read_dir(&path) {
                    Ok(entries) => self.push_children(&path, entries),
                    Err(err) => {
                        self.stack.clear();
                        return Some(Err(err));
                    }
                },
                EntryKind::File => {
                    let relative = path[self.root.len() + 1..].to_string();
                    return match self.engine.read_file(&path) {
                        Ok(bytes) => Some(Ok((relative, bytes))),
                        Err(err) => {
                            self.stack.clear();
                            Some(Err(err))
                        }
                    };
                }
            }
        }
        None
    }
}

/// Recursively removes the workspace subtree, bottom-up.
///
/// A workspace that is already gone is not an error. Callers invoke this
/// unconditionally at the end of a pipeline call and log (rather than
/// propagate) any failure, so cleanup never masks the primary outcome.
pub fn destroy(engine: &mut dyn SigningEngine, workspace: &Workspace) -> Result<()> {
    if !engine.exists(workspace.root())? {
        return Ok(());
    }

    // Explicit-stack post-order removal: a directory is re-pushed as
    // "expanded" and removed only after all of its children.
    let mut stack: Vec<(String, EntryKind, bool)> =
        vec![(workspace.root().to_string(), EntryKind::Directory, false)];
    while let Some((path, kind, expanded)) = stack.pop() {
        match kind {
            EntryKind::File => engine.remove_file(&path)?,
            EntryKind::Directory if expanded => engine.remove_dir(&path)?,
            EntryKind::Directory => {
                stack.push((path.clone(), EntryKind::Directory, true));
                for entry in engine.read_dir(&path)? {
                    stack.push((format!("{path}/{}", entry.name), entry.kind, false));
                }
            }
        }
    }
    Ok(())
}

#[cfg(all(test, feature = "mock-engine"))]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    #[test]
    fn workspace_names_are_unique() {
        let mut engine = MockEngine::new();
        let mut roots = Vec::new();
        for _ in 0..32 {
            roots.push(create(&mut engine).unwrap().root().to_string());
        }
        let mut deduped = roots.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), roots.len());
    }

    #[test]
    fn normalize_strips_leading_slash_and_backslashes() {
        assert_eq!(normalize_relative_path("/Payload/App.app"), "Payload/App.app");
        assert_eq!(normalize_relative_path("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(normalize_relative_path("///"), "");
        assert_eq!(normalize_relative_path(""), "");
    }

    #[test]
    fn normalize_collapses_repeated_separators() {
        assert_eq!(normalize_relative_path("a//b"), "a/b");
        assert_eq!(normalize_relative_path("a\\\\b//c/"), "a/b/c");
        assert_eq!(normalize_relative_path("//a///b.txt"), "a/b.txt");
    }

    #[test]
    fn materialize_stages_doubled_separator_names() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        materialize(&mut engine, &ws, "input//sub//file.bin", Payload::Bytes(b"x")).unwrap();
        assert_eq!(
            engine.read_file(&ws.join("input/sub/file.bin")).unwrap(),
            b"x"
        );
    }

    #[test]
    fn materialize_skips_empty_names() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        materialize(&mut engine, &ws, "/", Payload::Bytes(b"ignored")).unwrap();
        materialize(&mut engine, &ws, "", Payload::Directory).unwrap();
        // Only the workspace root itself exists.
        assert_eq!(engine.vfs_paths(), vec![ws.root().to_string()]);
    }

    #[test]
    fn materialize_rejects_traversal() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        let err = materialize(&mut engine, &ws, "input/../../etc/passwd", Payload::Bytes(b"x"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn materialize_creates_parents_and_zero_length_files() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        materialize(&mut engine, &ws, "input/a/b/empty.txt", Payload::Bytes(b"")).unwrap();
        let path = ws.join("input/a/b/empty.txt");
        assert!(engine.exists(&path).unwrap());
        assert_eq!(engine.read_file(&path).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn walk_yields_all_files_depth_first() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        materialize(&mut engine, &ws, "input/root.txt", Payload::Bytes(b"r")).unwrap();
        materialize(&mut engine, &ws, "input/sub/leaf.txt", Payload::Bytes(b"l")).unwrap();
        materialize(&mut engine, &ws, "input/sub/empty", Payload::Directory).unwrap();

        let root = ws.join("input");
        let files: Vec<_> = walk(&mut engine, &root)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let mut paths: Vec<_> = files.iter().map(|(p, _)| p.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, ["root.txt", "sub/leaf.txt"]);
    }

    #[test]
    fn walk_is_restartable() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        materialize(&mut engine, &ws, "input/one.bin", Payload::Bytes(b"1")).unwrap();
        let root = ws.join("input");

        let first: Vec<_> = walk(&mut engine, &root).collect::<Result<Vec<_>>>().unwrap();
        let second: Vec<_> = walk(&mut engine, &root).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn destroy_removes_everything_bottom_up() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        materialize(&mut engine, &ws, "input/deep/nested/file.bin", Payload::Bytes(b"x")).unwrap();
        materialize(&mut engine, &ws, "assets/cert.bin", Payload::Bytes(b"c")).unwrap();

        // The mock's remove_dir refuses non-empty directories, so this only
        // succeeds when deletion order is bottom-up.
        destroy(&mut engine, &ws).unwrap();
        assert!(engine.vfs_is_empty());
    }

    #[test]
    fn destroy_of_missing_workspace_is_ok() {
        let mut engine = MockEngine::new();
        let ws = create(&mut engine).unwrap();
        destroy(&mut engine, &ws).unwrap();
        destroy(&mut engine, &ws).unwrap();
    }
}
