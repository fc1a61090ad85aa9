use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::document::{Document, DocumentKind};
use crate::error::ToolError;

/// Opaque session identifier (UUIDv4 text).
pub type SessionId = String;

/// Server-level session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened { id: SessionId, kind: DocumentKind },
    Closed { id: SessionId },
}

/// Metadata snapshot of one open session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: DocumentKind,
    /// File the session was opened from, if any.
    pub source: Option<PathBuf>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub last_accessed_at: u64,
}

/// The live state of one session. `document` is `None` once the session has
/// been closed; a caller that looked the slot up just before `close` removed
/// it sees that and reports the session as gone.
struct SessionSlot {
    kind: DocumentKind,
    document: Option<Document>,
    source: Option<PathBuf>,
    created_at: SystemTime,
    last_accessed_at: SystemTime,
}

impl SessionSlot {
    fn info(&self, id: &str) -> SessionInfo {
        SessionInfo {
            id: id.to_string(),
            kind: self.kind,
            source: self.source.clone(),
            created_at: epoch_ms(self.created_at),
            last_accessed_at: epoch_ms(self.last_accessed_at),
        }
    }
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct StoreInner {
    sessions: HashMap<SessionId, Arc<Mutex<SessionSlot>>>,
    max_sessions: Option<usize>,
}

/// Registry of open documents keyed by session id.
///
/// Cloning is cheap and every clone refers to the same sessions. The map lock
/// is only held for lookup, insert and remove. Each session has its own
/// mutex, so calls against one session run one at a time while calls against
/// different sessions proceed in parallel.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<StoreInner>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Default cap on open sessions when none is configured.
    pub const DEFAULT_MAX_SESSIONS: usize = 256;

    pub fn new() -> Self {
        Self::with_max_sessions(Some(Self::DEFAULT_MAX_SESSIONS))
    }

    /// Create an empty store. `None` means unbounded.
    pub fn with_max_sessions(max_sessions: Option<usize>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                sessions: HashMap::new(),
                max_sessions,
            })),
            events_tx,
        }
    }

    /// Load the document at `path` and register it as a new session.
    ///
    /// The file is read before any lock is taken; only the insert itself
    /// happens under the map's write lock.
    pub fn open(&self, path: &Path) -> Result<SessionId, ToolError> {
        let kind = DocumentKind::from_path(path).ok_or_else(|| unsupported_path(path))?;
        self.check_capacity()?;
        if !path.is_file() {
            return Err(ToolError::PathNotFound(path.to_path_buf()));
        }
        let document = Document::load(kind, path)?;
        self.insert(document, Some(path.to_path_buf()))
    }

    /// Register an in-memory document as a new session.
    pub fn insert(
        &self,
        document: Document,
        source: Option<PathBuf>,
    ) -> Result<SessionId, ToolError> {
        let kind = document.kind();
        let now = SystemTime::now();
        let slot = SessionSlot {
            kind,
            document: Some(document),
            source,
            created_at: now,
            last_accessed_at: now,
        };

        let id = {
            let mut inner = self.inner.write();
            if let Some(max) = inner.max_sessions {
                if inner.sessions.len() >= max {
                    return Err(ToolError::SessionLimit(max));
                }
            }
            let mut id = uuid::Uuid::new_v4().to_string();
            while inner.sessions.contains_key(&id) {
                id = uuid::Uuid::new_v4().to_string();
            }
            inner
                .sessions
                .insert(id.clone(), Arc::new(Mutex::new(slot)));
            id
        };

        tracing::info!(session = %id, kind = %kind, "session opened");
        let _ = self.events_tx.send(SessionEvent::Opened {
            id: id.clone(),
            kind,
        });
        Ok(id)
    }

    /// Advisory capacity check, so `open` can refuse before reading a file.
    /// `insert` repeats the check authoritatively under the write lock.
    fn check_capacity(&self) -> Result<(), ToolError> {
        let inner = self.inner.read();
        match inner.max_sessions {
            Some(max) if inner.sessions.len() >= max => Err(ToolError::SessionLimit(max)),
            _ => Ok(()),
        }
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<SessionSlot>>, ToolError> {
        let inner = self.inner.read();
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ToolError::SessionNotFound(id.to_string()))
    }

    /// Run `f` with exclusive access to the session's live document.
    ///
    /// Blocks while another call holds the same session. Changes made by `f`
    /// are visible to the next call immediately; nothing is written to disk.
    pub fn with_document<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Document, &SessionInfo) -> Result<R, ToolError>,
    ) -> Result<R, ToolError> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock();
        slot.last_accessed_at = SystemTime::now();
        let info = slot.info(id);
        let document = slot
            .document
            .as_mut()
            .ok_or_else(|| ToolError::SessionNotFound(id.to_string()))?;
        f(document, &info)
    }

    /// Metadata for one session.
    pub fn info(&self, id: &str) -> Result<SessionInfo, ToolError> {
        let slot = self.slot(id)?;
        let slot = slot.lock();
        if slot.document.is_none() {
            return Err(ToolError::SessionNotFound(id.to_string()));
        }
        Ok(slot.info(id))
    }

    /// Deep copy of the session's current document.
    pub fn snapshot(&self, id: &str) -> Result<Document, ToolError> {
        self.with_document(id, |doc, _| Ok(doc.clone()))
    }

    /// Metadata for every open session, oldest first.
    ///
    /// Sessions busy with another call are waited on, so the listing reflects
    /// settled access times.
    pub fn list(&self) -> Vec<SessionInfo> {
        let slots: Vec<(SessionId, Arc<Mutex<SessionSlot>>)> = {
            let inner = self.inner.read();
            inner
                .sessions
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };
        let mut infos: Vec<SessionInfo> = slots
            .iter()
            .filter_map(|(id, slot)| {
                let slot = slot.lock();
                slot.document.as_ref().map(|_| slot.info(id))
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close a session and release its document.
    ///
    /// The entry leaves the map first, then the session lock is taken, so an
    /// in-flight call finishes before the document is dropped and any call
    /// still queued on the lock finds the session gone.
    pub fn close(&self, id: &str) -> Result<SessionInfo, ToolError> {
        let slot = self
            .inner
            .write()
            .sessions
            .remove(id)
            .ok_or_else(|| ToolError::SessionNotFound(id.to_string()))?;
        let info = self.release(id, &slot);
        tracing::info!(session = %id, "session closed");
        let _ = self.events_tx.send(SessionEvent::Closed { id: id.to_string() });
        Ok(info)
    }

    fn release(&self, id: &str, slot: &Mutex<SessionSlot>) -> SessionInfo {
        let mut slot = slot.lock();
        let info = slot.info(id);
        drop(slot.document.take());
        info
    }

    /// Close every session. Used at shutdown.
    pub fn drain(&self) -> usize {
        let drained: Vec<(SessionId, Arc<Mutex<SessionSlot>>)> =
            self.inner.write().sessions.drain().collect();
        for (id, slot) in &drained {
            self.release(id, slot);
            let _ = self.events_tx.send(SessionEvent::Closed { id: id.clone() });
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "sessions drained");
        }
        drained.len()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

fn unsupported_path(path: &Path) -> ToolError {
    ToolError::invalid(
        "path",
        format!("'{}'", path.display()),
        "a .json workbook or an .eml message",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::workbook::CellValue;
    use std::time::Duration;

    fn write_book(dir: &Path, name: &str, a1: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            format!(r#"{{"sheets":[{{"name":"Sheet1","cells":{{"A1":"{a1}"}}}}]}}"#),
        )
        .unwrap();
        path
    }

    fn a1(doc: &Document) -> Option<CellValue> {
        match doc {
            Document::Workbook(book) => book
                .sheet(None)
                .unwrap()
                .get("A1".parse().unwrap())
                .cloned(),
            _ => None,
        }
    }

    #[test]
    fn open_then_snapshot_matches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path(), "book.json", "hello");
        let store = SessionStore::new();

        let id = store.open(&path).unwrap();
        let direct = Document::load(DocumentKind::Workbook, &path).unwrap();
        assert_eq!(store.snapshot(&id).unwrap(), direct);

        let info = store.info(&id).unwrap();
        assert_eq!(info.kind, DocumentKind::Workbook);
        assert_eq!(info.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn ids_are_unique_uuids() {
        let store = SessionStore::new();
        let a = store.insert(Document::blank(DocumentKind::Mail), None).unwrap();
        let b = store.insert(Document::blank(DocumentKind::Mail), None).unwrap();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn open_missing_file_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new();
        let err = store.open(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ToolError::PathNotFound(_)), "got: {err:?}");
        assert!(store.is_empty());
    }

    #[test]
    fn open_unknown_extension_is_validation() {
        let store = SessionStore::new();
        let err = store.open(Path::new("/nowhere/report.xlsx")).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)), "got: {err:?}");
    }

    #[test]
    fn mutations_are_visible_to_later_calls() {
        let store = SessionStore::new();
        let id = store
            .insert(Document::blank(DocumentKind::Workbook), None)
            .unwrap();
        store
            .with_document(&id, |doc, _| {
                doc.as_workbook_mut()
                    .unwrap()
                    .set("Sheet1", "A1".parse().unwrap(), CellValue::Text("X".into()))
                    .unwrap();
                Ok(())
            })
            .unwrap();
        let doc = store.snapshot(&id).unwrap();
        assert_eq!(a1(&doc), Some(CellValue::Text("X".into())));
    }

    #[test]
    fn close_then_access_is_session_not_found() {
        let store = SessionStore::new();
        let id = store.insert(Document::blank(DocumentKind::Mail), None).unwrap();
        store.close(&id).unwrap();

        assert!(matches!(store.info(&id), Err(ToolError::SessionNotFound(_))));
        assert!(matches!(
            store.with_document(&id, |_, _| Ok(())),
            Err(ToolError::SessionNotFound(_))
        ));
        assert!(matches!(store.close(&id), Err(ToolError::SessionNotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let store = SessionStore::with_max_sessions(Some(1));
        store.insert(Document::blank(DocumentKind::Mail), None).unwrap();
        let err = store
            .insert(Document::blank(DocumentKind::Mail), None)
            .unwrap_err();
        assert!(matches!(err, ToolError::SessionLimit(1)));

        let unbounded = SessionStore::with_max_sessions(None);
        for _ in 0..300 {
            unbounded
                .insert(Document::blank(DocumentKind::Mail), None)
                .unwrap();
        }
        assert_eq!(unbounded.len(), 300);
    }

    #[test]
    fn list_is_oldest_first() {
        let store = SessionStore::new();
        let first = store.insert(Document::blank(DocumentKind::Mail), None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = store
            .insert(Document::blank(DocumentKind::Workbook), None)
            .unwrap();
        let ids: Vec<_> = store.list().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn emits_lifecycle_events() {
        let store = SessionStore::new();
        let mut rx = store.subscribe_events();
        let id = store.insert(Document::blank(DocumentKind::Mail), None).unwrap();
        store.close(&id).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Opened {
                id: id.clone(),
                kind: DocumentKind::Mail
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Closed { id });
    }

    #[test]
    fn drain_closes_everything() {
        let store = SessionStore::new();
        let ids: Vec<_> = (0..3)
            .map(|_| store.insert(Document::blank(DocumentKind::Mail), None).unwrap())
            .collect();
        assert_eq!(store.drain(), 3);
        assert!(store.is_empty());
        for id in ids {
            assert!(matches!(store.info(&id), Err(ToolError::SessionNotFound(_))));
        }
        assert_eq!(store.drain(), 0);
    }

    #[test]
    fn same_session_calls_are_serialized() {
        let store = SessionStore::new();
        let id = store
            .insert(Document::blank(DocumentKind::Workbook), None)
            .unwrap();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .with_document(&id, |doc, _| {
                                let book = doc.as_workbook_mut().unwrap();
                                let cell = "A1".parse().unwrap();
                                let n = match book.sheet(None).unwrap().get(cell) {
                                    Some(CellValue::Number(n)) => *n,
                                    _ => 0.0,
                                };
                                // Widen the read-modify-write window.
                                std::thread::yield_now();
                                book.set("Sheet1", cell, CellValue::Number(n + 1.0)).unwrap();
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let doc = store.snapshot(&id).unwrap();
        assert_eq!(a1(&doc), Some(CellValue::Number(400.0)));
    }

    #[test]
    fn close_waits_for_in_flight_call() {
        let store = SessionStore::new();
        let id = store
            .insert(Document::blank(DocumentKind::Workbook), None)
            .unwrap();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let worker = {
            let store = store.clone();
            let id = id.clone();
            std::thread::spawn(move || {
                store.with_document(&id, |_, _| {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(100));
                    Ok("done")
                })
            })
        };
        entered_rx.recv().unwrap();
        store.close(&id).unwrap();
        assert_eq!(worker.join().unwrap().unwrap(), "done");
        assert!(matches!(store.info(&id), Err(ToolError::SessionNotFound(_))));
    }
}
