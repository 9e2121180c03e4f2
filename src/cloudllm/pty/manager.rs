//! Tracks and bounds the set of live PTY sessions.
//!
//! Grounded on `original_source/reagent/pty/manager.py`'s `PTYManager`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::cloudllm::config::PtyManagerConfig;
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::wire::{EventType, Wire};

use super::session::PtySession;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub title: String,
    pub command: String,
    pub alive: bool,
    pub status: String,
    pub line_count: usize,
}

struct Inner {
    order: VecDeque<String>,
    sessions: std::collections::HashMap<String, Arc<PtySession>>,
}

/// Owns every live PTY session, evicting the oldest once `config.max_sessions`
/// is exceeded, and wires natural process exit to a `PTY_EXIT` wire event.
pub struct PtyManager {
    inner: Mutex<Inner>,
    wire: Option<Arc<Wire>>,
    config: PtyManagerConfig,
}

impl PtyManager {
    pub fn new(wire: Option<Arc<Wire>>) -> Self {
        Self::with_config(wire, PtyManagerConfig::default())
    }

    pub fn with_config(wire: Option<Arc<Wire>>, config: PtyManagerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner { order: VecDeque::new(), sessions: std::collections::HashMap::new() }),
            wire,
            config,
        }
    }

    /// Spawns a new session, keyed by a freshly generated id, with `title`
    /// as its display title.
    pub fn spawn(&self, title: impl Into<String>, command: &str) -> CoreResult<Arc<PtySession>> {
        let id = Uuid::new_v4().simple().to_string();
        self.spawn_keyed(id, title, command)
    }

    /// Returns the session already registered under `id`, or spawns and
    /// registers a fresh one keyed by `id` (with `id` itself as the title) if
    /// none exists yet. This is how an interactive session survives across
    /// multiple calls sharing the same caller-supplied `id` (SPEC_FULL
    /// §4.5.1, grounded on `original_source/reagent/tool/builtin/shell.py`'s
    /// `_ensure_session`), unlike [`Self::spawn`], which always registers
    /// under a fresh generated key.
    pub fn get_or_spawn(&self, id: &str, command: &str) -> CoreResult<Arc<PtySession>> {
        if let Ok(session) = self.get(id) {
            return Ok(session);
        }
        self.spawn_keyed(id.to_string(), id.to_string(), command)
    }

    fn spawn_keyed(&self, id: String, title: impl Into<String>, command: &str) -> CoreResult<Arc<PtySession>> {
        let title = title.into();
        let session = PtySession::spawn_with_config(id.clone(), title.clone(), command, &self.config)?;

        let wire = self.wire.clone();
        let session_id = id.clone();
        let session_title = title.clone();
        let buffer = session.buffer.clone();
        session.set_on_exit(Box::new(move |exit_code| {
            if let Some(wire) = &wire {
                let tail = buffer.read_tail(3).join("\n");
                wire.send(
                    EventType::PtyExit,
                    serde_json::json!({
                        "id": session_id,
                        "title": session_title,
                        "exit_code": exit_code,
                        "output_tail": tail,
                    }),
                );
            }
        }));

        let mut inner = self.inner.lock().unwrap();
        if inner.order.len() >= self.config.max_sessions {
            if let Some(oldest_id) = inner.order.pop_front() {
                if let Some(oldest) = inner.sessions.remove(&oldest_id) {
                    oldest.kill();
                    log::warn!("pty session cap reached, evicted '{oldest_id}'");
                }
            }
        }
        inner.order.push_back(id.clone());
        inner.sessions.insert(id, session.clone());

        Ok(session)
    }

    pub fn get(&self, id: &str) -> CoreResult<Arc<PtySession>> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::PtyUnknownSession(id.to_string()))
    }

    pub fn kill(&self, id: &str) -> CoreResult<()> {
        self.get(id)?.kill();
        Ok(())
    }

    /// Kills every tracked session. Idempotent: sessions already killed are
    /// no-ops.
    pub fn cleanup(&self) {
        let inner = self.inner.lock().unwrap();
        for session in inner.sessions.values() {
            session.kill();
        }
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .map(|s| SessionSnapshot {
                id: s.id.clone(),
                title: s.title.clone(),
                command: s.command.clone(),
                alive: s.is_alive(),
                status: format!("{:?}", s.status()).to_lowercase(),
                line_count: s.buffer.line_count(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PtyManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
