//! A single interactive PTY session.
//!
//! Grounded on `original_source/reagent/pty/session.py`'s `PTYSession`: owns
//! a process-group-isolated pseudo-terminal, a background reader, and a
//! settle-based `send`/`send_and_match` framing protocol. The Python version
//! polls its buffer every 0.05s inside `_wait_for_output`; this version waits
//! on [`RollingBuffer::wait_for_data`] instead of sleep-polling.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::cloudllm::config::PtyManagerConfig;
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::tool::truncation::{sanitize_binary_output, strip_ansi};

use super::buffer::RollingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Killing,
    Killed,
    Exited,
}

/// Callback invoked exactly once, only on a *natural* process exit (never on
/// an explicit [`PtySession::kill`]).
pub type OnExit = Box<dyn Fn(i32) + Send + Sync>;

pub struct PtySession {
    pub id: String,
    pub title: String,
    pub command: String,
    writer: Mutex<Box<dyn Write + Send>>,
    #[allow(dead_code)]
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pub buffer: Arc<RollingBuffer>,
    status: Mutex<SessionStatus>,
    killed_flag: Arc<AtomicBool>,
    on_exit: Mutex<Option<OnExit>>,
    pid: Option<u32>,
    default_settle: Duration,
}

impl PtySession {
    /// Spawns `command` via a shell, in its own process group, with
    /// `TERM=dumb` and no inherited `PROMPT_COMMAND`, using the defaults of
    /// [`PtyManagerConfig::default`] for buffer size and settle window.
    pub fn spawn(id: impl Into<String>, title: impl Into<String>, command: &str) -> CoreResult<Arc<Self>> {
        Self::spawn_with_config(id, title, command, &PtyManagerConfig::default())
    }

    /// Like [`Self::spawn`], but takes the rolling-buffer size and settle
    /// window from `config` instead of its defaults.
    pub fn spawn_with_config(
        id: impl Into<String>,
        title: impl Into<String>,
        command: &str,
        config: &PtyManagerConfig,
    ) -> CoreResult<Arc<Self>> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize { rows: 40, cols: 200, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| CoreError::PtySpawn(e.to_string()))?;

        let mut builder = CommandBuilder::new("bash");
        builder.arg("-c");
        builder.arg(command);
        builder.env("TERM", "dumb");
        builder.env_remove("PROMPT_COMMAND");

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| CoreError::PtySpawn(e.to_string()))?;
        let pid = child.process_id();

        let writer = pair.master.take_writer().map_err(|e| CoreError::PtySpawn(e.to_string()))?;
        let reader = pair.master.try_clone_reader().map_err(|e| CoreError::PtySpawn(e.to_string()))?;

        let buffer = Arc::new(RollingBuffer::new(config.rolling_buffer_lines));
        let killed_flag = Arc::new(AtomicBool::new(false));

        let session = Arc::new(Self {
            id: id.into(),
            title: title.into(),
            command: command.to_string(),
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            buffer: buffer.clone(),
            status: Mutex::new(SessionStatus::Running),
            killed_flag: killed_flag.clone(),
            on_exit: Mutex::new(None),
            pid,
            default_settle: config.settle,
        });

        spawn_reader_thread(reader, buffer, Arc::downgrade(&session), killed_flag);

        log::info!("pty session '{}' spawned: pid={pid:?}, command={command:?}", session.id);
        Ok(session)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.status(), SessionStatus::Running)
    }

    pub fn set_on_exit(&self, callback: OnExit) {
        *self.on_exit.lock().unwrap() = Some(callback);
    }

    /// Writes `input` (a newline is appended) and waits for output to settle
    /// (no new data for `settle`, default 300ms), bounded by an overall
    /// `timeout` (default 30s, matching `original_source`'s `send(data,
    /// timeout=30.0)`) so a continuously-emitting command still returns
    /// whatever accumulated instead of blocking forever (SPEC_FULL §4.2/§5).
    pub async fn send(&self, input: &str, settle: Option<Duration>, timeout: Option<Duration>) -> CoreResult<String> {
        let settle = settle.unwrap_or(self.default_settle);
        let timeout = timeout.unwrap_or(Duration::from_secs(30));
        let start_line = self.buffer.total_lines();
        self.write_line(input)?;
        self.wait_for_settle(settle, Some(timeout)).await;
        Ok(self.lines_since(start_line))
    }

    /// Like [`Self::send`], but returns as soon as the output matches
    /// `pattern`, or once `timeout` elapses (whichever comes first).
    pub async fn send_and_match(
        &self,
        input: &str,
        pattern: &regex::Regex,
        timeout: Duration,
    ) -> CoreResult<String> {
        let start_line = self.buffer.total_lines();
        self.write_line(input)?;

        let deadline = Instant::now() + timeout;
        loop {
            let text = self.lines_since(start_line);
            if pattern.is_match(&text) {
                return Ok(text);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(text);
            }
            self.buffer.wait_for_data(remaining.min(Duration::from_millis(100))).await;
        }
    }

    fn write_line(&self, input: &str) -> CoreResult<()> {
        let mut writer = self.writer.lock().unwrap();
        writer
            .write_all(format!("{input}\n").as_bytes())
            .map_err(|e| CoreError::PtyNotRunning(e.to_string()))?;
        writer.flush().map_err(|e| CoreError::PtyNotRunning(e.to_string()))
    }

    fn lines_since(&self, start_total: u64) -> String {
        let total_now = self.buffer.total_lines();
        let produced = (total_now - start_total) as usize;
        self.buffer.read_tail(produced).join("\n")
    }

    async fn wait_for_settle(&self, settle: Duration, overall_timeout: Option<Duration>) {
        let deadline = overall_timeout.map(|t| Instant::now() + t);
        loop {
            let got_data = self.buffer.wait_for_data(settle).await;
            if !got_data {
                return;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return;
                }
            }
        }
    }

    /// Waits up to `timeout` for the process to exit. Returns `true` if it
    /// had already exited by the deadline.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Idempotent. Sends `SIGKILL` to the whole process group so no
    /// descendant is left orphaned.
    pub fn kill(&self) {
        let mut status = self.status.lock().unwrap();
        if *status != SessionStatus::Running {
            return;
        }
        *status = SessionStatus::Killing;
        drop(status);

        log::info!("pty session '{}' killing process group", self.id);
        self.killed_flag.store(true, Ordering::SeqCst);

        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        } else if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }

        *self.status.lock().unwrap() = SessionStatus::Killed;
    }
}

fn spawn_reader_thread(
    mut reader: Box<dyn Read + Send>,
    buffer: Arc<RollingBuffer>,
    session: std::sync::Weak<PtySession>,
    killed_flag: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        let mut pending = String::new();
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let raw = String::from_utf8_lossy(&chunk[..n]);
                    pending.push_str(&raw);
                    while let Some(pos) = pending.find('\n') {
                        let line = pending[..pos].to_string();
                        pending = pending[pos + 1..].to_string();
                        let cleaned = sanitize_binary_output(&strip_ansi(&line));
                        buffer.append(cleaned, line);
                    }
                }
                Err(_) => break,
            }
        }
        if !pending.is_empty() {
            let cleaned = sanitize_binary_output(&strip_ansi(&pending));
            buffer.append(cleaned, pending);
        }

        let Some(session) = session.upgrade() else { return };
        let was_killed = killed_flag.load(Ordering::SeqCst);

        let exit_code = session
            .child
            .lock()
            .ok()
            .and_then(|mut c| c.wait().ok())
            .map(|status| status.exit_code() as i32)
            .unwrap_or(-1);

        {
            let mut status = session.status.lock().unwrap();
            if *status == SessionStatus::Running {
                *status = SessionStatus::Exited;
            }
        }

        if !was_killed {
            log::info!("pty session '{}' exited naturally with code {exit_code}", session.id);
            if let Some(callback) = session.on_exit.lock().unwrap().as_ref() {
                callback(exit_code);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_send_round_trips_output() {
        let session = PtySession::spawn("s1", "echo test", "echo hello").unwrap();
        session.wait_for_exit(Duration::from_secs(5)).await;
        let output = session.buffer.read_all();
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let session = PtySession::spawn("s2", "sleep", "sleep 5").unwrap();
        session.kill();
        session.kill();
        assert_eq!(session.status(), SessionStatus::Killed);
    }
}
