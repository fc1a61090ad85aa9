//! Per-call document resolution.
//!
//! Every document operation runs against either a file (path mode: load,
//! apply, save) or a live session document (session mode: lock, apply). A
//! supplied `session_id` always wins over `path`.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::document::{Document, DocumentKind, MailMessage, Workbook};
use crate::error::ToolError;
use crate::params::ParamSet;
use crate::AppState;

/// Whether an operation persists its changes in path mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// How the document for one call was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    Path,
    Session,
}

/// The document-addressing parameters of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTarget {
    pub path: Option<PathBuf>,
    pub session_id: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl DocumentTarget {
    pub fn from_params(params: &ParamSet) -> Result<Self, ToolError> {
        Ok(Self {
            path: params.maybe::<String>("path")?.map(PathBuf::from),
            session_id: params
                .maybe::<String>("session_id")?
                .map(|s| s.trim().to_string()),
            output_path: params.maybe::<String>("output_path")?.map(PathBuf::from),
        })
    }

    pub fn mode(&self) -> ResolutionMode {
        if self.session_id.is_some() {
            ResolutionMode::Session
        } else {
            ResolutionMode::Path
        }
    }
}

/// What a document operation sees of the resolved document.
pub struct DocumentContext<'a> {
    document: &'a mut Document,
    mode: ResolutionMode,
    output_path: Option<PathBuf>,
    source: Option<PathBuf>,
}

impl<'a> DocumentContext<'a> {
    pub fn document(&mut self) -> &mut Document {
        &mut *self.document
    }

    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    /// True when changes live in a session and no save step follows.
    pub fn is_session_backed(&self) -> bool {
        self.mode == ResolutionMode::Session
    }

    /// Where a path-mode write will be persisted, if not back to the source.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// File the document came from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn workbook_mut(&mut self) -> Result<&mut Workbook, ToolError> {
        let kind = self.document.kind();
        self.document
            .as_workbook_mut()
            .ok_or_else(|| kind_mismatch(kind, DocumentKind::Workbook))
    }

    pub fn mail_mut(&mut self) -> Result<&mut MailMessage, ToolError> {
        let kind = self.document.kind();
        self.document
            .as_mail_mut()
            .ok_or_else(|| kind_mismatch(kind, DocumentKind::Mail))
    }
}

fn kind_mismatch(found: DocumentKind, wanted: DocumentKind) -> ToolError {
    ToolError::Validation(format!(
        "this operation needs {} but the document is {}",
        wanted.describe(),
        found.describe()
    ))
}

/// Resolve `target` to a document of `kind` and run `apply` against it.
///
/// Path mode loads a fresh copy and, for [`Access::Write`], saves it to
/// `output_path` or back to `path` once `apply` succeeds. Session mode runs
/// `apply` under the session's lock with no save step.
pub fn with_document<R>(
    state: &AppState,
    target: &DocumentTarget,
    kind: DocumentKind,
    access: Access,
    apply: impl FnOnce(&mut DocumentContext<'_>) -> Result<R, ToolError>,
) -> Result<R, ToolError> {
    match &target.session_id {
        Some(id) => {
            if target.path.is_some() || target.output_path.is_some() {
                tracing::debug!(session = %id, "session_id supplied; ignoring path arguments");
            }
            state.sessions.with_document(id, |document, info| {
                if document.kind() != kind {
                    return Err(ToolError::Validation(format!(
                        "session '{id}' holds {} but this operation needs {}",
                        info.kind.describe(),
                        kind.describe()
                    )));
                }
                let mut ctx = DocumentContext {
                    document,
                    mode: ResolutionMode::Session,
                    output_path: None,
                    source: info.source.clone(),
                };
                apply(&mut ctx)
            })
        }
        None => with_path_document(state, target, kind, access, apply),
    }
}

fn with_path_document<R>(
    state: &AppState,
    target: &DocumentTarget,
    kind: DocumentKind,
    access: Access,
    apply: impl FnOnce(&mut DocumentContext<'_>) -> Result<R, ToolError>,
) -> Result<R, ToolError> {
    let path = target.path.as_deref().ok_or_else(|| {
        ToolError::Validation(
            "missing required parameter 'path' (or supply 'session_id' for an open session)"
                .into(),
        )
    })?;
    check_extension("path", path, kind)?;
    state.paths.check("path", path)?;

    let output = match access {
        Access::Write => target.output_path.as_deref(),
        Access::Read => None,
    };
    if let Some(out) = output {
        check_extension("output_path", out, kind)?;
        state.paths.check("output_path", out)?;
        check_parent_exists(out)?;
    }
    if !path.is_file() {
        return Err(ToolError::PathNotFound(path.to_path_buf()));
    }

    let mut document = Document::load(kind, path)?;
    let mut ctx = DocumentContext {
        document: &mut document,
        mode: ResolutionMode::Path,
        output_path: output.map(Path::to_path_buf),
        source: Some(path.to_path_buf()),
    };
    let result = apply(&mut ctx)?;

    if access == Access::Write {
        let dest = output.unwrap_or(path);
        document.save(dest)?;
        tracing::debug!(path = %dest.display(), "path-mode document persisted");
    }
    Ok(result)
}

/// Reject paths whose extension belongs to another document kind.
pub fn check_extension(param: &str, path: &Path, kind: DocumentKind) -> Result<(), ToolError> {
    if DocumentKind::from_path(path) == Some(kind) {
        return Ok(());
    }
    Err(ToolError::invalid(
        param,
        format!("'{}'", path.display()),
        &format!("{} file ending in .{}", kind.describe(), kind.extension()),
    ))
}

/// A save target's directory must already exist.
pub fn check_parent_exists(path: &Path) -> Result<(), ToolError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(ToolError::PathNotFound(parent.to_path_buf()))
        }
        _ => Ok(()),
    }
}

/// Restricts document paths to a set of root directories.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    roots: Vec<PathBuf>,
}

impl PathPolicy {
    /// Allow any path.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Allow only paths under one of `roots`. An empty list allows any path.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().map(|r| normalize(&r)).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Check `path` (supplied as parameter `param`) against the roots.
    ///
    /// Symlinks in the existing part of the path are resolved, and `..`
    /// segments cannot climb out of a root.
    pub fn check(&self, param: &str, path: &Path) -> Result<(), ToolError> {
        if self.roots.is_empty() {
            return Ok(());
        }
        let resolved = normalize(path);
        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            return Ok(());
        }
        let roots: Vec<String> = self.roots.iter().map(|r| r.display().to_string()).collect();
        Err(ToolError::invalid(
            param,
            format!("'{}'", path.display()),
            &format!("a path inside one of: {}", roots.join(", ")),
        ))
    }
}

/// Absolute form of `path` with the longest existing prefix canonicalized and
/// the remainder cleaned lexically.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut rest: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut resolved) = existing.canonicalize() {
            for part in rest.iter().rev() {
                resolved.push(part);
            }
            return lexical(&resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical(&absolute),
        }
    }
}

fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::workbook::CellValue;
    use crate::session::SessionStore;
    use serde_json::json;

    fn state() -> AppState {
        AppState::new(SessionStore::new(), PathPolicy::unrestricted())
    }

    fn target(path: Option<&Path>, session: Option<&str>, out: Option<&Path>) -> DocumentTarget {
        DocumentTarget {
            path: path.map(Path::to_path_buf),
            session_id: session.map(str::to_string),
            output_path: out.map(Path::to_path_buf),
        }
    }

    fn write_book(path: &Path, a1: &str) {
        std::fs::write(
            path,
            format!(r#"{{"sheets":[{{"name":"Sheet1","cells":{{"A1":"{a1}"}}}}]}}"#),
        )
        .unwrap();
    }

    fn read_a1(ctx: &mut DocumentContext<'_>) -> Result<Option<CellValue>, ToolError> {
        let book = ctx.workbook_mut()?;
        Ok(book.sheet(None).unwrap().get("A1".parse().unwrap()).cloned())
    }

    fn set_a1(ctx: &mut DocumentContext<'_>, text: &str) -> Result<(), ToolError> {
        ctx.workbook_mut()?
            .set("Sheet1", "A1".parse().unwrap(), CellValue::Text(text.into()))
            .unwrap();
        Ok(())
    }

    #[test]
    fn target_from_params() {
        let params = ParamSet::from_value(json!({
            "path": "/a/b.json",
            "session_id": " abc ",
            "output_path": "  ",
        }))
        .unwrap();
        let t = DocumentTarget::from_params(&params).unwrap();
        assert_eq!(t.path, Some(PathBuf::from("/a/b.json")));
        assert_eq!(t.session_id.as_deref(), Some("abc"));
        assert_eq!(t.output_path, None);
        assert_eq!(t.mode(), ResolutionMode::Session);
    }

    #[test]
    fn session_wins_over_path() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = dir.path().join("f1.json");
        let f2 = dir.path().join("f2.json");
        write_book(&f1, "from-f1");
        write_book(&f2, "from-f2");
        let state = state();
        let id = state.sessions.open(&f2).unwrap();

        let t = target(Some(&f1), Some(&id), None);
        let (value, backed) = with_document(&state, &t, DocumentKind::Workbook, Access::Read, |ctx| {
            Ok((read_a1(ctx)?, ctx.is_session_backed()))
        })
        .unwrap();
        assert_eq!(value, Some(CellValue::Text("from-f2".into())));
        assert!(backed);
    }

    #[test]
    fn missing_path_is_validation() {
        let err = with_document(
            &state(),
            &DocumentTarget::default(),
            DocumentKind::Workbook,
            Access::Read,
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert!(err.to_string().contains("'path'"), "got: {err}");
    }

    #[test]
    fn missing_file_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let err = with_document(
            &state(),
            &target(Some(&path), None, None),
            DocumentKind::Workbook,
            Access::Read,
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::PathNotFound(p) if p == path));
    }

    #[test]
    fn unknown_session_is_session_not_found() {
        let err = with_document(
            &state(),
            &target(None, Some("missing-id"), None),
            DocumentKind::Workbook,
            Access::Read,
            |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.code(), "session_not_found");
    }

    #[test]
    fn write_with_output_path_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.json");
        let out = dir.path().join("out.json");
        write_book(&src, "old");
        let before = std::fs::read(&src).unwrap();

        let t = target(Some(&src), None, Some(&out));
        with_document(&state(), &t, DocumentKind::Workbook, Access::Write, |ctx| {
            assert_eq!(ctx.output_path(), Some(out.as_path()));
            set_a1(ctx, "new")
        })
        .unwrap();

        assert_eq!(std::fs::read(&src).unwrap(), before);
        let Document::Workbook(book) = Document::load(DocumentKind::Workbook, &out).unwrap() else {
            panic!("expected workbook")
        };
        assert_eq!(
            book.sheet(None).unwrap().get("A1".parse().unwrap()),
            Some(&CellValue::Text("new".into()))
        );
    }

    #[test]
    fn write_without_output_overwrites_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.json");
        write_book(&src, "old");
        let t = target(Some(&src), None, None);
        with_document(&state(), &t, DocumentKind::Workbook, Access::Write, |ctx| {
            set_a1(ctx, "new")
        })
        .unwrap();
        assert!(std::fs::read_to_string(&src).unwrap().contains("new"));
    }

    #[test]
    fn read_access_never_saves() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.json");
        let out = dir.path().join("out.json");
        write_book(&src, "old");
        let before = std::fs::read(&src).unwrap();
        let t = target(Some(&src), None, Some(&out));
        with_document(&state(), &t, DocumentKind::Workbook, Access::Read, |ctx| {
            set_a1(ctx, "changed-in-memory")
        })
        .unwrap();
        assert_eq!(std::fs::read(&src).unwrap(), before);
        assert!(!out.exists());
    }

    #[test]
    fn failing_apply_never_saves() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.json");
        write_book(&src, "old");
        let before = std::fs::read(&src).unwrap();
        let t = target(Some(&src), None, None);
        let err = with_document(&state(), &t, DocumentKind::Workbook, Access::Write, |ctx| {
            set_a1(ctx, "half-done")?;
            Err::<(), _>(ToolError::InvalidOperationState("refused".into()))
        })
        .unwrap_err();
        assert_eq!(err.code(), "invalid_operation_state");
        assert_eq!(std::fs::read(&src).unwrap(), before);
    }

    #[test]
    fn session_kind_mismatch_is_validation() {
        let state = state();
        let id = state
            .sessions
            .insert(Document::blank(DocumentKind::Workbook), None)
            .unwrap();
        let mut called = false;
        let err = with_document(
            &state,
            &target(None, Some(&id), None),
            DocumentKind::Mail,
            Access::Write,
            |_| {
                called = true;
                Ok(())
            },
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert!(err.to_string().contains("a workbook"), "got: {err}");
        assert!(!called);
    }

    #[test]
    fn path_kind_mismatch_is_rejected_before_io() {
        let err = with_document(
            &state(),
            &target(Some(Path::new("/does/not/exist.eml")), None, None),
            DocumentKind::Workbook,
            Access::Read,
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)), "got: {err:?}");
    }

    #[test]
    fn output_into_missing_directory_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.json");
        write_book(&src, "old");
        let out = dir.path().join("missing").join("out.json");
        let err = with_document(
            &state(),
            &target(Some(&src), None, Some(&out)),
            DocumentKind::Workbook,
            Access::Write,
            |ctx| set_a1(ctx, "x"),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::PathNotFound(p) if p == dir.path().join("missing")));
    }

    #[test]
    fn path_policy_restricts_to_roots() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new([root.path().to_path_buf()]);

        assert!(policy.check("path", &root.path().join("a.json")).is_ok());
        assert!(policy
            .check("path", &root.path().join("new").join("b.json"))
            .is_ok());

        let err = policy
            .check("output_path", &other.path().join("a.json"))
            .unwrap_err();
        assert!(err.to_string().contains("'output_path'"), "got: {err}");

        let escape = root.path().join("..").join("escape.json");
        assert!(policy.check("path", &escape).is_err());

        let escape = root.path().join("missing").join("..").join("..").join("escape.json");
        assert!(policy.check("path", &escape).is_err());
    }

    #[test]
    fn policy_roots_are_canonical() {
        let root = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new([root.path().join("sub").join("..")]);
        assert_eq!(policy.roots(), [root.path().canonicalize().unwrap()]);
        assert!(PathPolicy::unrestricted().roots().is_empty());
    }

    #[test]
    fn empty_policy_allows_anything() {
        let policy = PathPolicy::new(Vec::new());
        assert!(policy.check("path", Path::new("/anywhere/at/all.json")).is_ok());
    }

    #[test]
    fn lexical_cleanup() {
        assert_eq!(lexical(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    }
}
