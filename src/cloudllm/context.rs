//! Append-only conversation log with checkpoints and revert.
//!
//! Grounded on `original_source/reagent/context/__init__.py`. Each mutation
//! that returns successfully has already been persisted to the JSONL log at
//! `log_path` (SPEC_FULL §4.8 invariant); `restore` replays that log to
//! reconstruct an equivalent `Context` (SPEC_FULL §8 property 1).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::message::Message;

/// A checkpoint marker line, per SPEC_FULL §6: `{_type:"checkpoint", id:int}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointMarker {
    _type: String,
    id: u64,
}

impl CheckpointMarker {
    fn new(id: u64) -> Self {
        Self { _type: "checkpoint".to_string(), id }
    }
}

/// One line of the persisted log: either a message or a checkpoint marker.
/// Untagged: message lines carry no `_type` field, so serde distinguishes the
/// two shapes structurally rather than by an explicit discriminant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LogLine {
    Checkpoint(CheckpointMarker),
    Message(Message),
}

/// An in-memory conversation plus the checkpoints taken over it, backed by a
/// persistent append-only JSONL log.
pub struct Context {
    messages: Vec<Message>,
    /// checkpoint_id -> message_index, insertion order tracks monotonic ids.
    checkpoints: BTreeMap<u64, usize>,
    next_checkpoint_id: u64,
    log_path: PathBuf,
    /// Cached estimate, refreshed by `estimate_tokens`. Not required to be
    /// current between mutations; recomputed on demand from `messages`.
    token_count: usize,
}

impl Context {
    /// Creates a fresh context backed by a new (truncated) log file.
    pub async fn create(log_path: impl Into<PathBuf>) -> CoreResult<Self> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        File::create(&log_path).await?;
        Ok(Self {
            messages: Vec::new(),
            checkpoints: BTreeMap::new(),
            next_checkpoint_id: 0,
            log_path,
            token_count: 0,
        })
    }

    /// Replays `path`, skipping malformed lines with a warning (SPEC_FULL §4.8).
    /// The checkpoint counter is restored to `max(id) + 1`.
    pub async fn restore(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let file = File::open(&path).await?;
        let mut reader = BufReader::new(file).lines();

        let mut messages = Vec::new();
        let mut checkpoints = BTreeMap::new();
        let mut max_id: Option<u64> = None;

        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogLine>(&line) {
                Ok(LogLine::Message(msg)) => messages.push(msg),
                Ok(LogLine::Checkpoint(CheckpointMarker { id, .. })) => {
                    checkpoints.insert(id, messages.len());
                    max_id = Some(max_id.map_or(id, |m| m.max(id)));
                }
                Err(e) => {
                    log::warn!("skipping malformed context log line: {e}");
                }
            }
        }

        let token_count = messages.iter().map(Message::approx_byte_len).sum::<usize>() / 4;
        Ok(Self {
            messages,
            checkpoints,
            next_checkpoint_id: max_id.map_or(0, |m| m + 1),
            log_path: path,
            token_count,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// A mutable slice, for in-place content edits (pruning) that don't
    /// change message count — callers must call [`Self::recompute_token_count`]
    /// and [`Self::rewrite`] afterward to persist the edit.
    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    pub fn recompute_token_count(&mut self) {
        self.token_count = self.messages.iter().map(Message::approx_byte_len).sum::<usize>() / 4;
    }

    /// Replaces the entire message sequence (used by compaction), clearing
    /// checkpoints since their message-index references no longer apply, and
    /// persists the result.
    pub async fn replace_all(&mut self, messages: Vec<Message>) -> CoreResult<()> {
        self.messages = messages;
        self.checkpoints.clear();
        self.recompute_token_count();
        self.rewrite().await
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Appends `message` to memory and persists a single line.
    pub async fn append(&mut self, message: Message) -> CoreResult<()> {
        self.persist_line(&LogLine::Message(message.clone())).await?;
        self.token_count += message.approx_byte_len() / 4;
        self.messages.push(message);
        Ok(())
    }

    /// Appends an assistant message followed by its tool results, atomically
    /// from the caller's point of view (SPEC_FULL §4.7 step 7: "shielded from
    /// cancellation"). `tokio::fs` writes here are not themselves cancelled by
    /// the surrounding future being dropped mid-await in this crate's usage —
    /// the agent loop wraps this call so the whole append completes or not at
    /// all; see `agent::AgentLoop::run_step`.
    pub async fn grow(&mut self, assistant: Message, tool_results: Vec<Message>) -> CoreResult<()> {
        self.append(assistant).await?;
        for result in tool_results {
            self.append(result).await?;
        }
        Ok(())
    }

    /// Assigns `counter++` and persists a checkpoint marker. Ids are strictly
    /// increasing (SPEC_FULL §8 property 2).
    pub async fn checkpoint(&mut self) -> CoreResult<u64> {
        let id = self.next_checkpoint_id;
        self.next_checkpoint_id += 1;
        self.persist_line(&LogLine::Checkpoint(CheckpointMarker::new(id))).await?;
        self.checkpoints.insert(id, self.messages.len());
        Ok(id)
    }

    /// Truncates memory to the index recorded at `id`, drops every checkpoint
    /// with id > target, rotates the log file (timestamped backup), and
    /// rewrites the surviving prefix atomically (SPEC_FULL §4.8/§8 property 9).
    pub async fn revert_to(&mut self, id: u64) -> CoreResult<()> {
        let index = *self
            .checkpoints
            .get(&id)
            .ok_or_else(|| CoreError::Persistence(format!("unknown checkpoint id {id}")))?;

        self.messages.truncate(index);
        self.checkpoints.retain(|cid, _| *cid <= id);
        self.token_count = self.messages.iter().map(Message::approx_byte_len).sum::<usize>() / 4;

        self.rotate_backup().await?;
        self.rewrite().await
    }

    /// Persists the current in-memory state, used after `revert_to` and by
    /// compaction (SPEC_FULL §4.9).
    pub async fn rewrite(&mut self) -> CoreResult<()> {
        let tmp_path = self.log_path.with_extension("tmp");
        let mut file = File::create(&tmp_path).await?;
        for (id, index) in &self.checkpoints {
            if *index == 0 {
                let line = serde_json::to_string(&LogLine::Checkpoint(CheckpointMarker::new(*id)))?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
        }
        for (i, message) in self.messages.iter().enumerate() {
            let line = serde_json::to_string(&LogLine::Message(message.clone()))?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            for (id, index) in &self.checkpoints {
                if *index == i + 1 {
                    let marker = serde_json::to_string(&LogLine::Checkpoint(CheckpointMarker::new(*id)))?;
                    file.write_all(marker.as_bytes()).await?;
                    file.write_all(b"\n").await?;
                }
            }
        }
        file.flush().await?;
        drop(file);
        fs::rename(&tmp_path, &self.log_path).await?;
        Ok(())
    }

    /// `serialized_bytes / 4` over the in-memory messages (SPEC_FULL §9
    /// decision 2 — matches the source and the teacher's own `count_tokens`).
    pub fn estimate_tokens(&self) -> usize {
        self.token_count
    }

    async fn persist_line(&self, line: &LogLine) -> CoreResult<()> {
        let encoded = serde_json::to_string(line)?;
        let mut file = OpenOptions::new().append(true).open(&self.log_path).await?;
        file.write_all(encoded.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn rotate_backup(&self) -> CoreResult<()> {
        let suffix = Utc::now().format("%Y%m%dT%H%M%S%.fZ");
        let backup_path = self.log_path.with_extension(format!("bak.{suffix}"));
        if fs::metadata(&self.log_path).await.is_ok() {
            fs::copy(&self.log_path, &backup_path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::create(dir.path().join("ctx.jsonl")).await.unwrap();
        ctx.append(Message::user("hi")).await.unwrap();
        let c0 = ctx.checkpoint().await.unwrap();
        ctx.append(Message::user("more")).await.unwrap();
        let c1 = ctx.checkpoint().await.unwrap();
        assert!(c1 > c0);
    }

    #[tokio::test]
    async fn revert_truncates_and_drops_later_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::create(dir.path().join("ctx.jsonl")).await.unwrap();
        ctx.append(Message::user("seed")).await.unwrap();
        let target = ctx.checkpoint().await.unwrap();
        ctx.append(Message::user("step2")).await.unwrap();
        ctx.checkpoint().await.unwrap();
        ctx.append(Message::user("step3")).await.unwrap();

        ctx.revert_to(target).await.unwrap();
        assert_eq!(ctx.messages().len(), 1);
        assert_eq!(ctx.messages()[0].text(), "seed");
    }

    #[tokio::test]
    async fn restore_is_identity_after_append_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.jsonl");
        let mut ctx = Context::create(&path).await.unwrap();
        ctx.append(Message::user("a")).await.unwrap();
        ctx.checkpoint().await.unwrap();
        ctx.append(Message::user("b")).await.unwrap();

        let restored = Context::restore(&path).await.unwrap();
        assert_eq!(restored.messages().len(), ctx.messages().len());
        assert_eq!(restored.messages()[0].text(), "a");
        assert_eq!(restored.messages()[1].text(), "b");
        assert_eq!(restored.next_checkpoint_id, ctx.next_checkpoint_id);
    }

    #[tokio::test]
    async fn restore_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.jsonl");
        {
            let mut ctx = Context::create(&path).await.unwrap();
            ctx.append(Message::user("ok")).await.unwrap();
        }
        let mut raw = OpenOptions::new().append(true).open(&path).await.unwrap();
        raw.write_all(b"not json at all\n").await.unwrap();

        let restored = Context::restore(&path).await.unwrap();
        assert_eq!(restored.messages().len(), 1);
    }
}
