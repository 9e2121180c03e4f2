//! Rolling output buffer for PTY sessions.
//!
//! Grounded on `original_source/reagent/pty/buffer.py`'s `RollingBuffer`
//! (a `deque(maxlen=max_lines)` guarded by a lock), extended per SPEC_FULL
//! §4.1 with a second "raw" track (pre-ANSI-strip bytes alongside the
//! cleaned text) and an edge-triggered `wait_for_data` readiness signal so
//! PTY consumers can settle-wait instead of sleep-polling a counter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use tokio::sync::Notify;

struct Inner {
    cleaned: VecDeque<String>,
    raw: VecDeque<String>,
    total_lines: u64,
}

/// Thread-safe rolling buffer of PTY output lines, bounded to `max_lines`.
///
/// `cleaned` holds ANSI-stripped, sanitized text (what the model/UI reads);
/// `raw` holds the undecorated line as received. Both tracks are evicted
/// together so `cleaned.len() == raw.len()` always (SPEC_FULL §8 property 8).
pub struct RollingBuffer {
    max_lines: usize,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl RollingBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            inner: Mutex::new(Inner {
                cleaned: VecDeque::new(),
                raw: VecDeque::new(),
                total_lines: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends one already-split line to both tracks, evicting the oldest
    /// entry if `max_lines` would be exceeded. `total_lines` keeps counting
    /// past the eviction point.
    pub fn append(&self, cleaned: impl Into<String>, raw: impl Into<String>) {
        let cleaned = cleaned.into();
        log::trace!("pty buffer append: {cleaned:?}");
        let mut inner = self.inner.lock().unwrap();
        inner.cleaned.push_back(cleaned);
        inner.raw.push_back(raw.into());
        inner.total_lines += 1;
        while inner.cleaned.len() > self.max_lines {
            inner.cleaned.pop_front();
            inner.raw.pop_front();
        }
        drop(inner);
        // `notify_one` stores a permit when nobody is waiting yet, so a
        // `wait_for_data` call that starts *after* this append still
        // observes it (edge-triggered, not missed) — `notify_waiters` would
        // only reach callers already parked at the time of the call.
        self.notify.notify_one();
    }

    /// Splits `cleaned`/`raw` text on `\n` and appends each line pair.
    pub fn append_text(&self, cleaned: &str, raw: &str) {
        let cleaned_lines: Vec<&str> = cleaned.split('\n').collect();
        let raw_lines: Vec<&str> = raw.split('\n').collect();
        let n = cleaned_lines.len().max(raw_lines.len());
        for i in 0..n {
            let c = cleaned_lines.get(i).copied().unwrap_or("");
            let r = raw_lines.get(i).copied().unwrap_or(c);
            self.append(c, r);
        }
    }

    pub fn read(&self, offset: usize, limit: usize) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let start = offset.min(inner.cleaned.len());
        let end = (start + limit).min(inner.cleaned.len());
        inner.cleaned.iter().skip(start).take(end - start).cloned().collect()
    }

    pub fn read_all(&self) -> String {
        let inner = self.inner.lock().unwrap();
        inner.cleaned.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    pub fn read_tail(&self, n: usize) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let len = inner.cleaned.len();
        let start = len.saturating_sub(n);
        inner.cleaned.iter().skip(start).cloned().collect()
    }

    /// Returns `(line_index, line)` pairs for every cleaned line matching
    /// `pattern`, capped at `limit`. An invalid regex yields no matches.
    pub fn search(&self, pattern: &str, limit: usize) -> Vec<(usize, String)> {
        let compiled = match Regex::new(pattern) {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        let inner = self.inner.lock().unwrap();
        let mut results = Vec::new();
        for (i, line) in inner.cleaned.iter().enumerate() {
            if compiled.is_match(line) {
                results.push((i, line.clone()));
                if results.len() >= limit {
                    break;
                }
            }
        }
        results
    }

    pub fn line_count(&self) -> usize {
        self.inner.lock().unwrap().cleaned.len()
    }

    pub fn total_lines(&self) -> u64 {
        self.inner.lock().unwrap().total_lines
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cleaned.clear();
        inner.raw.clear();
        inner.total_lines = 0;
    }

    /// Waits until at least one `append` has occurred since the last
    /// successful wait (edge-triggered), or `timeout` elapses. Returns
    /// `true` on the former, `false` on timeout.
    pub async fn wait_for_data(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified()).await.is_ok()
    }
}
