//! Append-only JSONL chat replay log with sequential record ids.
//!
//! Each line is one `type:"chat"` record. Ids are assigned by the logger at
//! append time; on open the highest existing id is recovered by scanning the
//! file. Malformed lines are skipped, and legacy records without a usable id
//! get positional fallback ids so indexed lookups stay stable.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use duet_core::current_unix_timestamp_ms;

const CHAT_RECORD_TYPE: &str = "chat";
/// Prompt text retained per record, in characters.
const PROMPT_RETAIN_CHARS: usize = 600;

fn chat_record_type() -> String {
    CHAT_RECORD_TYPE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One replayable chat event.
pub struct ChatReplayRecord {
    #[serde(default)]
    pub id: u64,
    #[serde(rename = "type", default = "chat_record_type")]
    pub record_type: String,
    #[serde(default)]
    pub timestamp_unix_ms: u64,
    #[serde(default)]
    pub guild_id: Option<u64>,
    #[serde(default)]
    pub guild_name: Option<String>,
    pub channel_id: u64,
    #[serde(default)]
    pub channel_name: Option<String>,
    pub user_id: u64,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_display: String,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub reply_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Fields callers supply for one appended chat event.
pub struct ChatEventDraft {
    pub guild_id: Option<u64>,
    pub guild_name: Option<String>,
    pub channel_id: u64,
    pub channel_name: Option<String>,
    pub user_id: u64,
    pub user_name: String,
    pub user_display: String,
    pub trigger: String,
    pub prompt: String,
    pub reply_length: usize,
}

struct ReplayLogState {
    file: File,
    next_id: u64,
}

/// Line-oriented replay log; writes are lock-serialized and flushed.
pub struct ChatReplayLog {
    path: PathBuf,
    state: Mutex<ReplayLogState>,
}

impl ChatReplayLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let next_id = highest_record_id(&path)?.saturating_add(1);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        Ok(Self {
            path,
            state: Mutex::new(ReplayLogState { file, next_id }),
        })
    }

    /// Appends one chat event and returns its assigned record id.
    pub fn append(&self, draft: ChatEventDraft) -> Result<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("replay log lock is poisoned"))?;
        let record_id = state.next_id;

        let record = ChatReplayRecord {
            id: record_id,
            record_type: chat_record_type(),
            timestamp_unix_ms: current_unix_timestamp_ms(),
            guild_id: draft.guild_id,
            guild_name: draft.guild_name,
            channel_id: draft.channel_id,
            channel_name: draft.channel_name,
            user_id: draft.user_id,
            user_name: draft.user_name,
            user_display: draft.user_display,
            trigger: draft.trigger,
            prompt: draft.prompt.chars().take(PROMPT_RETAIN_CHARS).collect(),
            reply_length: draft.reply_length,
        };
        let line = serde_json::to_string(&record).context("failed to encode replay record")?;

        writeln!(state.file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        state
            .file
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        state.next_id = record_id.saturating_add(1);
        Ok(record_id)
    }

    /// Returns up to `limit` newest records, newest first, optionally
    /// filtered to one guild.
    pub fn read_recent(&self, limit: usize, guild_id: Option<u64>) -> Result<Vec<ChatReplayRecord>> {
        let limit = limit.max(1);
        let records = read_chat_records(&self.path, guild_id)?;
        let keep_from = records.len().saturating_sub(limit);
        let mut recent = records[keep_from..].to_vec();
        recent.reverse();
        Ok(recent)
    }

    /// Returns the record with `record_id`, honoring the guild filter.
    pub fn get_by_id(
        &self,
        record_id: u64,
        guild_id: Option<u64>,
    ) -> Result<Option<ChatReplayRecord>> {
        if record_id == 0 {
            return Ok(None);
        }
        for record in read_chat_records(&self.path, guild_id)? {
            if record.id == record_id {
                return Ok(Some(record));
            }
            if record.id > record_id {
                break;
            }
        }
        Ok(None)
    }
}

fn highest_record_id(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let records = read_chat_records(path, None)?;
    Ok(records.iter().map(|record| record.id).max().unwrap_or(0))
}

fn read_chat_records(path: &Path, guild_id: Option<u64>) -> Result<Vec<ChatReplayRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file =
        File::open(path).with_context(|| format!("failed to read {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut fallback_id = 0_u64;

    for raw in reader.lines() {
        let raw = raw.with_context(|| format!("failed to read line from {}", path.display()))?;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let Ok(mut record) = serde_json::from_str::<ChatReplayRecord>(line) else {
            continue;
        };
        if record.record_type != CHAT_RECORD_TYPE {
            continue;
        }

        if record.id > 0 {
            fallback_id = fallback_id.max(record.id);
        } else {
            fallback_id += 1;
            record.id = fallback_id;
        }

        if guild_id.is_some() && record.guild_id != guild_id {
            continue;
        }
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{ChatEventDraft, ChatReplayLog};

    fn draft(guild_id: Option<u64>, prompt: &str) -> ChatEventDraft {
        ChatEventDraft {
            guild_id,
            guild_name: guild_id.map(|id| format!("guild-{id}")),
            channel_id: 77,
            channel_name: Some("general".to_string()),
            user_id: 42,
            user_name: "someone".to_string(),
            user_display: "Someone".to_string(),
            trigger: "mention".to_string(),
            prompt: prompt.to_string(),
            reply_length: 120,
        }
    }

    #[test]
    fn functional_ids_are_sequential_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("replay.jsonl");

        let log = ChatReplayLog::open(&path).expect("open");
        assert_eq!(log.append(draft(None, "first")).expect("append"), 1);
        assert_eq!(log.append(draft(None, "second")).expect("append"), 2);
        drop(log);

        let reopened = ChatReplayLog::open(&path).expect("reopen");
        assert_eq!(reopened.append(draft(None, "third")).expect("append"), 3);
    }

    #[test]
    fn functional_read_recent_returns_newest_first_with_guild_filter() {
        let dir = tempdir().expect("tempdir");
        let log = ChatReplayLog::open(dir.path().join("replay.jsonl")).expect("open");
        log.append(draft(Some(1), "a")).expect("append");
        log.append(draft(Some(2), "b")).expect("append");
        log.append(draft(Some(1), "c")).expect("append");

        let recent = log.read_recent(10, Some(1)).expect("read");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].prompt, "c");
        assert_eq!(recent[1].prompt, "a");

        let capped = log.read_recent(1, None).expect("read");
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].prompt, "c");
    }

    #[test]
    fn functional_get_by_id_honors_guild_filter() {
        let dir = tempdir().expect("tempdir");
        let log = ChatReplayLog::open(dir.path().join("replay.jsonl")).expect("open");
        let first = log.append(draft(Some(1), "a")).expect("append");
        let second = log.append(draft(Some(2), "b")).expect("append");

        assert_eq!(
            log.get_by_id(first, None).expect("read").map(|r| r.prompt),
            Some("a".to_string())
        );
        assert!(log.get_by_id(second, Some(1)).expect("read").is_none());
        assert!(log.get_by_id(0, None).expect("read").is_none());
        assert!(log.get_by_id(99, None).expect("read").is_none());
    }

    #[test]
    fn regression_malformed_lines_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("replay.jsonl");
        let log = ChatReplayLog::open(&path).expect("open");
        log.append(draft(None, "good")).expect("append");
        std::fs::write(
            &path,
            format!(
                "{}\nnot json at all\n{{\"type\":\"other\"}}\n",
                std::fs::read_to_string(&path).expect("read").trim_end()
            ),
        )
        .expect("write");

        let reopened = ChatReplayLog::open(&path).expect("reopen");
        let recent = reopened.read_recent(10, None).expect("read");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].prompt, "good");
        assert_eq!(reopened.append(draft(None, "next")).expect("append"), 2);
    }

    #[test]
    fn unit_prompt_is_truncated_to_retention_cap() {
        let dir = tempdir().expect("tempdir");
        let log = ChatReplayLog::open(dir.path().join("replay.jsonl")).expect("open");
        let long_prompt = "x".repeat(1_000);
        log.append(draft(None, &long_prompt)).expect("append");

        let recent = log.read_recent(1, None).expect("read");
        assert_eq!(recent[0].prompt.chars().count(), 600);
    }
}
