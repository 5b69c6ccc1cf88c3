use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::util::ms_to_hours;

pub const DEFAULT_LANGUAGE: &str = "plaintext";

/// One finalized coding interval attributed to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub start_time: i64,
    pub end_time: i64,
    pub file_path: String,
    pub language: String,
}

impl Session {
    pub fn duration_ms(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time).max(0)
    }
}

/// A document as reported by the editor lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub path: String,
    pub language: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub start_time: i64,
    pub file_path: String,
    pub language: String,
}

impl OpenSession {
    fn finalize(self, now: i64) -> Session {
        Session {
            end_time: now.max(self.start_time),
            start_time: self.start_time,
            file_path: self.file_path,
            language: self.language,
        }
    }
}

/// Live view of the in-progress session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSession {
    pub file_path: String,
    pub language: String,
    pub start_time: i64,
    pub elapsed_ms: i64,
    pub elapsed_hours: f64,
}

/// Tracks at most one open session and turns editor lifecycle transitions
/// into finalized [`Session`] records. Appending them is the caller's job.
///
/// Close events only finalize the open session when the closed path matches
/// the open one; a close for any other document is ignored.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    open: Option<OpenSession>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalizes the previously open session (if any) and opens a new one
    /// for `doc`.
    pub fn on_open(&mut self, doc: &DocumentRef, now: i64) -> Option<Session> {
        let finalized = self.open.take().map(|open| open.finalize(now));
        self.open = Some(OpenSession {
            start_time: now,
            file_path: doc.path.clone(),
            language: doc.language.clone(),
        });
        finalized
    }

    pub fn on_close(&mut self, doc: &DocumentRef, now: i64) -> Option<Session> {
        match &self.open {
            Some(open) if open.file_path == doc.path => {}
            Some(open) => {
                debug!(
                    closed = %doc.path,
                    open = %open.file_path,
                    "close does not match open session; ignoring"
                );
                return None;
            }
            None => {
                debug!(closed = %doc.path, "close with no open session; ignoring");
                return None;
            }
        }
        self.open.take().map(|open| open.finalize(now))
    }

    /// Shutdown hook: finalizes the open session instead of dropping it.
    pub fn finalize(&mut self, now: i64) -> Option<Session> {
        self.open.take().map(|open| open.finalize(now))
    }

    pub fn open_session(&self) -> Option<&OpenSession> {
        self.open.as_ref()
    }

    pub fn current(&self, now: i64) -> Option<CurrentSession> {
        self.open.as_ref().map(|open| {
            let elapsed_ms = now.saturating_sub(open.start_time).max(0);
            CurrentSession {
                file_path: open.file_path.clone(),
                language: open.language.clone(),
                start_time: open.start_time,
                elapsed_ms,
                elapsed_hours: ms_to_hours(elapsed_ms),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, language: &str) -> DocumentRef {
        DocumentRef::new(path, language)
    }

    #[test]
    fn first_open_finalizes_nothing() {
        let mut recorder = SessionRecorder::new();
        assert!(recorder.on_open(&doc("a.ts", "typescript"), 1_000).is_none());
        let open = recorder.open_session().expect("open session");
        assert_eq!(open.start_time, 1_000);
        assert_eq!(open.file_path, "a.ts");
        assert_eq!(open.language, "typescript");
    }

    #[test]
    fn opening_second_document_finalizes_first_exactly_once() {
        let mut recorder = SessionRecorder::new();
        recorder.on_open(&doc("a.ts", "typescript"), 1_000);

        let finalized = recorder
            .on_open(&doc("b.py", "python"), 4_000)
            .expect("finalized session for a.ts");
        assert_eq!(
            finalized,
            Session {
                start_time: 1_000,
                end_time: 4_000,
                file_path: "a.ts".to_string(),
                language: "typescript".to_string(),
            }
        );
        let open = recorder.open_session().expect("b.py is open");
        assert_eq!(open.file_path, "b.py");
        assert_eq!(open.start_time, 4_000);
    }

    #[test]
    fn close_with_matching_path_finalizes_and_clears() {
        let mut recorder = SessionRecorder::new();
        recorder.on_open(&doc("a.ts", "typescript"), 0);
        let finalized = recorder
            .on_close(&doc("a.ts", "typescript"), 3_600_000)
            .expect("finalized");
        assert_eq!(finalized.duration_ms(), 3_600_000);
        assert!(recorder.open_session().is_none());
    }

    #[test]
    fn close_with_other_path_is_ignored() {
        let mut recorder = SessionRecorder::new();
        recorder.on_open(&doc("a.ts", "typescript"), 0);
        assert!(recorder.on_close(&doc("b.py", "python"), 10).is_none());
        assert_eq!(
            recorder.open_session().map(|open| open.file_path.as_str()),
            Some("a.ts")
        );
    }

    #[test]
    fn close_without_open_session_is_ignored() {
        let mut recorder = SessionRecorder::new();
        assert!(recorder.on_close(&doc("a.ts", "typescript"), 10).is_none());
    }

    #[test]
    fn backwards_clock_never_produces_negative_session() {
        let mut recorder = SessionRecorder::new();
        recorder.on_open(&doc("a.ts", "typescript"), 5_000);
        let finalized = recorder.finalize(4_000).expect("finalized");
        assert!(finalized.end_time >= finalized.start_time);
        assert_eq!(finalized.duration_ms(), 0);
    }

    #[test]
    fn finalize_on_shutdown_only_when_open() {
        let mut recorder = SessionRecorder::new();
        assert!(recorder.finalize(100).is_none());
        recorder.on_open(&doc("a.ts", "typescript"), 0);
        assert!(recorder.finalize(100).is_some());
        assert!(recorder.finalize(200).is_none());
    }

    #[test]
    fn transitions_count_matches_finalized_sessions() {
        let mut recorder = SessionRecorder::new();
        let mut finalized = Vec::new();
        let mut transitions = 0;
        let events: [(&str, &str); 7] = [
            ("open", "a.ts"),
            ("open", "b.py"),
            ("close", "b.py"),
            ("close", "b.py"),
            ("open", "c.rs"),
            ("close", "a.ts"),
            ("open", "a.ts"),
        ];
        for (step, (kind, path)) in events.iter().enumerate() {
            let now = (step as i64) * 1_000;
            let was_open = recorder.open_session().cloned();
            let result = if *kind == "open" {
                recorder.on_open(&doc(path, "x"), now)
            } else {
                recorder.on_close(&doc(path, "x"), now)
            };
            let transition = match &was_open {
                None => false,
                Some(_) if *kind == "open" => true,
                Some(open) => open.file_path == *path,
            };
            if transition {
                transitions += 1;
            }
            finalized.extend(result);
        }
        assert_eq!(finalized.len(), transitions);
        assert_eq!(finalized.len(), 3);
        assert!(finalized.iter().all(|s| s.end_time >= s.start_time));
    }

    #[test]
    fn current_session_reports_elapsed_time() {
        let mut recorder = SessionRecorder::new();
        assert!(recorder.current(0).is_none());
        recorder.on_open(&doc("a.ts", "typescript"), 1_000);
        let current = recorder.current(1_000 + 1_800_000).expect("current");
        assert_eq!(current.elapsed_ms, 1_800_000);
        assert!((current.elapsed_hours - 0.5).abs() < f64::EPSILON);
        assert_eq!(current.file_path, "a.ts");
    }

    #[test]
    fn session_json_uses_camel_case_fields() {
        let session = Session {
            start_time: 0,
            end_time: 10,
            file_path: "a.ts".to_string(),
            language: "ts".to_string(),
        };
        let value = serde_json::to_value(&session).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "startTime": 0,
                "endTime": 10,
                "filePath": "a.ts",
                "language": "ts"
            })
        );
    }
}
