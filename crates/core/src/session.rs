//! Session-scoped log capture.
//!
//! Concurrent sessions each get their own ring of log lines so a caller can
//! fetch "what happened in my session" without seeing anyone else's output.
//! The session id is propagated as a tokio task-local value through the call
//! chain; [`SessionLayer`] hooks into `tracing` and appends every event that
//! fires inside a session scope to that session's buffer. Buffers drain into
//! per-session histories on read.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::error::{Error, Result};

tokio::task_local! {
    static SESSION_ID: String;
}

#[derive(Default)]
struct SessionState {
    /// session_id → undrained log lines
    buffers: HashMap<String, Vec<String>>,
    /// session_id → drained log lines
    histories: HashMap<String, Vec<String>>,
    /// session_id → number of live scopes
    active: HashMap<String, usize>,
}

fn state() -> &'static Mutex<SessionState> {
    static STATE: OnceLock<Mutex<SessionState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(SessionState::default()))
}

/// Run a future inside a session scope. Log events emitted while the future
/// is polled are routed to this session's buffer.
pub async fn with_session<F>(session_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    let session_id = session_id.into();
    {
        let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
        *guard.active.entry(session_id.clone()).or_insert(0) += 1;
        guard.buffers.entry(session_id.clone()).or_default();
    }

    let output = SESSION_ID.scope(session_id.clone(), fut).await;

    {
        let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = guard.active.get_mut(&session_id) {
            *count -= 1;
            if *count == 0 {
                guard.active.remove(&session_id);
            }
        }
    }
    output
}

/// The session id of the current task scope, if any.
pub fn current_session() -> Option<String> {
    SESSION_ID.try_with(|id| id.clone()).ok()
}

fn record(session_id: &str, line: String) {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard
        .buffers
        .entry(session_id.to_string())
        .or_default()
        .push(line);
}

/// Drain and return the pending log lines of a session. Drained lines move
/// into the session history.
pub fn get_buffer(session_id: &str) -> Result<Vec<String>> {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    let buffer = guard
        .buffers
        .get_mut(session_id)
        .ok_or_else(|| Error::NotFound(format!("session `{session_id}`")))?;
    let lines = std::mem::take(buffer);
    guard
        .histories
        .entry(session_id.to_string())
        .or_default()
        .extend(lines.iter().cloned());
    Ok(lines)
}

/// All log lines drained so far for a session.
pub fn get_history(session_id: &str) -> Result<Vec<String>> {
    let guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard
        .histories
        .get(session_id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("session `{session_id}`")))
}

/// Flush the current session's buffer into its history.
pub fn clear_buffer() {
    let Some(session_id) = current_session() else {
        return;
    };
    let _ = get_buffer(&session_id);
}

/// Drop the current session's history.
pub fn clear_history() {
    let Some(session_id) = current_session() else {
        return;
    };
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard.histories.remove(&session_id);
}

/// Remove all traces of a session.
pub fn cleanup_session(session_id: &str) {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard.buffers.remove(session_id);
    guard.histories.remove(session_id);
    guard.active.remove(session_id);
}

/// Ids of sessions with a live scope.
pub fn active_sessions() -> Vec<String> {
    let guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard.active.keys().cloned().collect()
}

/// A `tracing` layer that copies events into the current session's buffer.
/// Events fired outside any session scope are ignored.
#[derive(Default)]
pub struct SessionLayer;

impl<S: Subscriber> Layer<S> for SessionLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(session_id) = current_session() else {
            return;
        };
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "[{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            visitor.rendered()
        );
        record(&session_id, line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn rendered(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_route_to_their_session() {
        with_session("sess_a", async {
            record(&current_session().unwrap(), "line a".into());
        })
        .await;
        with_session("sess_b", async {
            record(&current_session().unwrap(), "line b".into());
        })
        .await;

        let a = get_buffer("sess_a").unwrap();
        let b = get_buffer("sess_b").unwrap();
        assert_eq!(a, vec!["line a".to_string()]);
        assert_eq!(b, vec!["line b".to_string()]);

        cleanup_session("sess_a");
        cleanup_session("sess_b");
    }

    #[tokio::test]
    async fn buffer_drains_into_history() {
        with_session("sess_hist", async {
            record("sess_hist", "first".into());
        })
        .await;

        let drained = get_buffer("sess_hist").unwrap();
        assert_eq!(drained.len(), 1);
        // Second read is empty; history keeps the line.
        assert!(get_buffer("sess_hist").unwrap().is_empty());
        assert_eq!(get_history("sess_hist").unwrap(), drained);

        cleanup_session("sess_hist");
    }

    #[test]
    fn unknown_session_errors() {
        assert!(matches!(
            get_buffer("no_such_session"),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn no_session_outside_scope() {
        assert!(current_session().is_none());
        with_session("sess_scope", async {
            assert_eq!(current_session().as_deref(), Some("sess_scope"));
        })
        .await;
        assert!(current_session().is_none());
        cleanup_session("sess_scope");
    }
}
