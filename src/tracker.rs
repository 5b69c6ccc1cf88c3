use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::aggregate::{DailyStat, aggregate};
use crate::session::{CurrentSession, DocumentRef, Session, SessionRecorder};
use crate::store::SessionStore;

pub type SharedTracker = Arc<Mutex<ActivityTracker>>;

/// Session-tracking context owned by the host process: one recorder, one
/// store. Every finalized session is appended and persisted immediately.
#[derive(Debug)]
pub struct ActivityTracker {
    recorder: SessionRecorder,
    store: SessionStore,
}

impl ActivityTracker {
    pub fn new(store: SessionStore) -> Self {
        Self {
            recorder: SessionRecorder::new(),
            store,
        }
    }

    pub fn load(sessions_path: &Path) -> Self {
        Self::new(SessionStore::load(sessions_path))
    }

    pub fn into_shared(self) -> SharedTracker {
        Arc::new(Mutex::new(self))
    }

    pub fn document_opened(&mut self, doc: &DocumentRef, now: i64) {
        if let Some(session) = self.recorder.on_open(doc, now) {
            self.commit(session);
        }
        debug!(path = %doc.path, language = %doc.language, "session opened");
    }

    pub fn document_closed(&mut self, doc: &DocumentRef, now: i64) {
        if let Some(session) = self.recorder.on_close(doc, now) {
            self.commit(session);
        }
    }

    /// Finalizes and persists the open session, if any. Returns whether a
    /// session was committed.
    pub fn flush(&mut self, now: i64) -> bool {
        match self.recorder.finalize(now) {
            Some(session) => {
                info!(path = %session.file_path, "finalized open session on shutdown");
                self.commit(session);
                true
            }
            None => false,
        }
    }

    pub fn sessions(&self) -> &[Session] {
        self.store.sessions()
    }

    pub fn current(&self, now: i64) -> Option<CurrentSession> {
        self.recorder.current(now)
    }

    pub fn daily_stats(&self) -> Vec<DailyStat> {
        aggregate(self.store.sessions())
    }

    fn commit(&mut self, session: Session) {
        debug!(
            path = %session.file_path,
            duration_ms = session.duration_ms(),
            "session finalized"
        );
        self.store.append(session);
        self.store.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_sessions;
    use tempfile::TempDir;

    fn doc(path: &str, language: &str) -> DocumentRef {
        DocumentRef::new(path, language)
    }

    #[test]
    fn open_open_close_persists_two_sessions() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("sessions.json");
        let mut tracker = ActivityTracker::load(&path);

        tracker.document_opened(&doc("a.ts", "ts"), 0);
        tracker.document_opened(&doc("b.py", "python"), 3_600_000);
        assert_eq!(read_sessions(&path).expect("read").len(), 1);

        tracker.document_closed(&doc("b.py", "python"), 5_400_000);
        let persisted = read_sessions(&path).expect("read");
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].file_path, "a.ts");
        assert_eq!(persisted[1].file_path, "b.py");
        assert!(tracker.current(5_400_000).is_none());

        let stats = tracker.daily_stats();
        assert_eq!(stats.len(), 1);
        assert!((stats[0].total_hours - 1.5).abs() < 1e-12);
    }

    #[test]
    fn flush_persists_open_session() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("sessions.json");
        let mut tracker = ActivityTracker::load(&path);

        assert!(!tracker.flush(10));
        tracker.document_opened(&doc("a.ts", "ts"), 0);
        assert!(tracker.flush(1_000));
        assert!(!tracker.flush(2_000));

        let persisted = read_sessions(&path).expect("read");
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].end_time, 1_000);
    }

    #[test]
    fn history_survives_restart() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("sessions.json");
        {
            let mut tracker = ActivityTracker::load(&path);
            tracker.document_opened(&doc("a.ts", "ts"), 0);
            tracker.document_closed(&doc("a.ts", "ts"), 1_000);
        }

        let mut tracker = ActivityTracker::load(&path);
        assert_eq!(tracker.sessions().len(), 1);
        tracker.document_opened(&doc("b.py", "python"), 2_000);
        tracker.flush(3_000);
        assert_eq!(read_sessions(&path).expect("read").len(), 2);
    }
}
