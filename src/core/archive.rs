//! Flat-file persistence for transcripts and training snapshots.
//!
//! Every file is named after a second-resolution local timestamp. Files are
//! written through a temp file in the target directory and persisted without
//! clobbering, so two writes in the same second get distinct names instead of
//! overwriting each other.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::core::message::Conversation;
use crate::core::profile::Profile;

pub const CONVERSATIONS_DIR: &str = "conversations";
pub const TRAINING_DATA_DIR: &str = "training_data";
const FALLBACK_ROOT: &str = "deepchat";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug)]
pub enum ArchiveError {
    Serialize(serde_json::Error),
    Write { path: PathBuf, source: io::Error },
    Read { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    /// No single file or part files exist for the requested base name.
    MissingTranscript { dir: PathBuf, base_name: String },
    /// Part files exist but their numbering does not run from 1 without gaps.
    IncompleteTranscript {
        dir: PathBuf,
        base_name: String,
        missing_part: usize,
    },
    /// Every candidate file name for this second is already taken.
    NameExhausted { dir: PathBuf, stem: String },
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Serialize(err) => write!(f, "Failed to serialize record: {err}"),
            ArchiveError::Write { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
            ArchiveError::Read { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            ArchiveError::Parse { path, source } => {
                write!(f, "Failed to parse transcript in {}: {}", path.display(), source)
            }
            ArchiveError::MissingTranscript { dir, base_name } => write!(
                f,
                "No transcript named {} in {}",
                base_name,
                dir.display()
            ),
            ArchiveError::IncompleteTranscript {
                dir,
                base_name,
                missing_part,
            } => write!(
                f,
                "Transcript {} in {} is missing part {}",
                base_name,
                dir.display(),
                missing_part
            ),
            ArchiveError::NameExhausted { dir, stem } => write!(
                f,
                "No free file name for {} in {}",
                stem,
                dir.display()
            ),
        }
    }
}

impl StdError for ArchiveError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ArchiveError::Serialize(err) => Some(err),
            ArchiveError::Write { source, .. } | ArchiveError::Read { source, .. } => Some(source),
            ArchiveError::Parse { source, .. } => Some(source),
            ArchiveError::MissingTranscript { .. }
            | ArchiveError::IncompleteTranscript { .. }
            | ArchiveError::NameExhausted { .. } => None,
        }
    }
}

/// One raw user message plus the profile in effect when it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub timestamp: String,
    pub message: String,
    pub profile: Profile,
}

/// Directories the archive writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirs {
    pub conversations: PathBuf,
    pub training_data: PathBuf,
}

impl DataDirs {
    /// Layout under `root` without touching the filesystem.
    pub fn under(root: &Path) -> Self {
        Self {
            conversations: root.join(CONVERSATIONS_DIR),
            training_data: root.join(TRAINING_DATA_DIR),
        }
    }

    /// Create both directories under `root`, falling back to the platform
    /// temp directory for any that cannot be created.
    pub fn ensure(root: &Path) -> Self {
        Self::ensure_with_fallback(root, &std::env::temp_dir().join(FALLBACK_ROOT))
    }

    /// Like [`DataDirs::ensure`], with an explicit fallback root.
    pub fn ensure_with_fallback(root: &Path, fallback_root: &Path) -> Self {
        Self {
            conversations: ensure_dir(root, fallback_root, CONVERSATIONS_DIR),
            training_data: ensure_dir(root, fallback_root, TRAINING_DATA_DIR),
        }
    }
}

fn ensure_dir(root: &Path, fallback_root: &Path, subdir: &str) -> PathBuf {
    let primary = root.join(subdir);
    match fs::create_dir_all(&primary) {
        Ok(()) => primary,
        Err(err) => {
            let fallback = fallback_root.join(subdir);
            warn!(
                path = %primary.display(),
                fallback = %fallback.display(),
                error = %err,
                "cannot create data directory, using fallback"
            );
            if let Err(err) = fs::create_dir_all(&fallback) {
                // Leave the primary path in place; writes will fail and be logged.
                warn!(path = %fallback.display(), error = %err, "fallback directory unavailable");
                return primary;
            }
            fallback
        }
    }
}

fn timestamp(now: &DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Split `text` into consecutive slices of at most `chunk_chars` characters.
pub fn split_chunks(text: &str, chunk_chars: usize) -> Vec<&str> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == chunk_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

fn write_new_file(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(contents.as_bytes())?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist_noclobber(path).map_err(|err| err.error)?;
    Ok(())
}

fn candidate_stem(stem: &str, attempt: usize) -> String {
    if attempt == 0 {
        stem.to_string()
    } else {
        format!("{stem}_{attempt}")
    }
}

#[derive(Debug, Clone)]
pub struct Archive {
    dirs: DataDirs,
    chunk_chars: usize,
}

impl Archive {
    pub fn new(dirs: DataDirs, chunk_chars: usize) -> Self {
        Self {
            dirs,
            chunk_chars: chunk_chars.max(1),
        }
    }

    pub fn dirs(&self) -> &DataDirs {
        &self.dirs
    }

    pub fn save_training_snapshot(
        &self,
        message: &str,
        profile: &Profile,
    ) -> Result<PathBuf, ArchiveError> {
        self.save_training_snapshot_at(message, profile, Local::now())
    }

    pub fn save_training_snapshot_at(
        &self,
        message: &str,
        profile: &Profile,
        now: DateTime<Local>,
    ) -> Result<PathBuf, ArchiveError> {
        let snapshot = TrainingSnapshot {
            timestamp: timestamp(&now),
            message: message.to_string(),
            profile: profile.clone(),
        };
        let contents = serde_json::to_string_pretty(&snapshot).map_err(ArchiveError::Serialize)?;
        let stem = format!("training_{}", snapshot.timestamp);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .dirs
                .training_data
                .join(format!("{}.json", candidate_stem(&stem, attempt)));
            match write_new_file(&path, &contents) {
                Ok(()) => {
                    debug!(path = %path.display(), "saved training snapshot");
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArchiveError::Write { path, source }),
            }
        }

        Err(ArchiveError::NameExhausted {
            dir: self.dirs.training_data.clone(),
            stem,
        })
    }

    /// Write the full conversation, split into part files when oversized.
    /// Returns the written paths in part order.
    pub fn save_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        self.save_conversation_at(conversation, Local::now())
    }

    pub fn save_conversation_at(
        &self,
        conversation: &Conversation,
        now: DateTime<Local>,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let serialized = conversation.to_json().map_err(ArchiveError::Serialize)?;
        self.write_transcript(&serialized, &now)
    }

    fn write_transcript(
        &self,
        serialized: &str,
        now: &DateTime<Local>,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let dir = &self.dirs.conversations;
        let base_name = self.free_transcript_name(&format!("conversation_{}", timestamp(now)))?;

        let chunks = if serialized.chars().count() > self.chunk_chars {
            split_chunks(serialized, self.chunk_chars)
                .into_iter()
                .enumerate()
                .map(|(idx, chunk)| (dir.join(format!("{base_name}_part{}.json", idx + 1)), chunk))
                .collect::<Vec<_>>()
        } else {
            vec![(dir.join(format!("{base_name}.json")), serialized)]
        };

        let mut written = Vec::with_capacity(chunks.len());
        for (path, chunk) in chunks {
            if let Err(source) = write_new_file(&path, chunk) {
                remove_parts(&written);
                return Err(ArchiveError::Write { path, source });
            }
            written.push(path);
        }
        debug!(base_name = %base_name, parts = written.len(), "saved conversation");
        Ok(written)
    }

    fn free_transcript_name(&self, stem: &str) -> Result<String, ArchiveError> {
        let dir = &self.dirs.conversations;
        (0..MAX_NAME_ATTEMPTS)
            .map(|attempt| candidate_stem(stem, attempt))
            .find(|name| {
                !dir.join(format!("{name}.json")).exists()
                    && !dir.join(format!("{name}_part1.json")).exists()
            })
            .ok_or_else(|| ArchiveError::NameExhausted {
                dir: dir.clone(),
                stem: stem.to_string(),
            })
    }
}

/// Best-effort removal of the parts of a transcript that failed midway.
fn remove_parts(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove partial transcript");
        }
    }
}

/// Serialized transcript for `base_name` (e.g. `conversation_20240501_120000`),
/// joining part files in ascending numeric order when the transcript was split.
pub fn reassemble_transcript(dir: &Path, base_name: &str) -> Result<String, ArchiveError> {
    let single = dir.join(format!("{base_name}.json"));
    if single.is_file() {
        return fs::read_to_string(&single).map_err(|source| ArchiveError::Read {
            path: single,
            source,
        });
    }

    let read_dir = |source: io::Error| ArchiveError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let prefix = format!("{base_name}_part");
    let mut parts = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_dir)? {
        let entry = entry.map_err(read_dir)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let index = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|digits| digits.parse::<usize>().ok());
        if let Some(index) = index {
            parts.push((index, entry.path()));
        }
    }

    if parts.is_empty() {
        return Err(ArchiveError::MissingTranscript {
            dir: dir.to_path_buf(),
            base_name: base_name.to_string(),
        });
    }
    parts.sort_by_key(|(index, _)| *index);
    if let Some(missing_part) = (1..)
        .zip(&parts)
        .find_map(|(expected, (index, _))| (*index != expected).then_some(expected))
    {
        return Err(ArchiveError::IncompleteTranscript {
            dir: dir.to_path_buf(),
            base_name: base_name.to_string(),
            missing_part,
        });
    }

    let mut serialized = String::new();
    for (_, path) in parts {
        let chunk = fs::read_to_string(&path).map_err(|source| ArchiveError::Read {
            path: path.clone(),
            source,
        })?;
        serialized.push_str(&chunk);
    }
    Ok(serialized)
}

pub fn load_transcript(dir: &Path, base_name: &str) -> Result<Conversation, ArchiveError> {
    let serialized = reassemble_transcript(dir, base_name)?;
    serde_json::from_str(&serialized).map_err(|source| ArchiveError::Parse {
        path: dir.join(base_name),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Turn;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time(second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, 12, 0, second)
            .single()
            .expect("unambiguous local time")
    }

    fn archive(temp_dir: &TempDir, chunk_chars: usize) -> Archive {
        Archive::new(DataDirs::ensure(temp_dir.path()), chunk_chars)
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn ensure_creates_both_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dirs = DataDirs::ensure(&temp_dir.path().join("data"));
        assert_eq!(dirs, DataDirs::under(&temp_dir.path().join("data")));
        assert!(dirs.conversations.is_dir());
        assert!(dirs.training_data.is_dir());
    }

    #[test]
    fn ensure_falls_back_when_root_is_blocked() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        // A regular file where the data root should be makes creation fail.
        let blocked = temp_dir.path().join("blocked");
        fs::write(&blocked, "").unwrap();

        let fallback = temp_dir.path().join("fallback");
        let dirs = DataDirs::ensure_with_fallback(&blocked, &fallback);
        assert_eq!(dirs.conversations, fallback.join(CONVERSATIONS_DIR));
        assert_eq!(dirs.training_data, fallback.join(TRAINING_DATA_DIR));
        assert!(dirs.conversations.is_dir());
        assert!(dirs.training_data.is_dir());
    }

    #[test]
    fn split_chunks_counts_characters() {
        let text = "x".repeat(25_000);
        let sizes: Vec<usize> = split_chunks(&text, 10_000).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![10_000, 10_000, 5_000]);

        let exact = "y".repeat(20_000);
        assert_eq!(split_chunks(&exact, 10_000).len(), 2);

        let wide = "你好世界呀";
        assert_eq!(split_chunks(wide, 2), vec!["你好", "世界", "呀"]);
        assert!(split_chunks("", 10).is_empty());
    }

    #[test]
    fn small_conversation_writes_single_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10_000);
        let conversation: Conversation = vec![Turn::new("你好", "你好！有什么可以帮你？")].into();

        let written = archive
            .save_conversation_at(&conversation, fixed_time(0))
            .unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("conversation_20240501_120000.json"));
        assert_eq!(
            fs::read_to_string(&written[0]).unwrap(),
            conversation.to_json().unwrap()
        );
    }

    #[test]
    fn oversized_conversation_splits_into_three_parts() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10_000);
        // [["<user>",""]] adds nine characters of framing.
        let conversation: Conversation = vec![Turn::new("a".repeat(24_991), "")].into();
        let serialized = conversation.to_json().unwrap();
        assert_eq!(serialized.len(), 25_000);

        let written = archive
            .save_conversation_at(&conversation, fixed_time(0))
            .unwrap();
        let sizes: Vec<usize> = written
            .iter()
            .map(|path| fs::read_to_string(path).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![10_000, 10_000, 5_000]);
        assert_eq!(
            file_names(&archive.dirs().conversations),
            vec![
                "conversation_20240501_120000_part1.json",
                "conversation_20240501_120000_part2.json",
                "conversation_20240501_120000_part3.json",
            ]
        );
    }

    #[test]
    fn reassembled_parts_match_serialization_byte_for_byte() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 7);
        let conversation: Conversation = (0..12)
            .map(|i| Turn::new(format!("问题 {i}"), format!("answer {i} 答案")))
            .collect();

        let written = archive
            .save_conversation_at(&conversation, fixed_time(5))
            .unwrap();
        assert!(written.len() > 10, "needs double-digit part numbers");

        let dir = &archive.dirs().conversations;
        let joined = reassemble_transcript(dir, "conversation_20240501_120005").unwrap();
        assert_eq!(joined.as_bytes(), conversation.to_json().unwrap().as_bytes());
        assert_eq!(
            load_transcript(dir, "conversation_20240501_120005").unwrap(),
            conversation
        );
    }

    #[test]
    fn gap_in_part_numbers_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10);
        let conversation: Conversation = vec![Turn::new("a".repeat(30), "b")].into();
        let written = archive
            .save_conversation_at(&conversation, fixed_time(7))
            .unwrap();
        assert!(written.len() >= 3);

        let dir = &archive.dirs().conversations;
        fs::remove_file(dir.join("conversation_20240501_120007_part2.json")).unwrap();

        let err = reassemble_transcript(dir, "conversation_20240501_120007").unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::IncompleteTranscript { missing_part: 2, .. }
        ));
        assert!(load_transcript(dir, "conversation_20240501_120007").is_err());
    }

    #[test]
    fn failed_part_write_removes_earlier_parts() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10);
        let dir = archive.dirs().conversations.clone();
        // A directory squatting on the second part's name makes that write fail.
        fs::create_dir(dir.join("conversation_20240501_120008_part2.json")).unwrap();

        let conversation: Conversation = vec![Turn::new("a".repeat(30), "b")].into();
        let err = archive
            .save_conversation_at(&conversation, fixed_time(8))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Write { .. }));
        assert!(!dir.join("conversation_20240501_120008_part1.json").exists());
        assert_eq!(
            file_names(&dir),
            vec!["conversation_20240501_120008_part2.json"]
        );
    }

    #[test]
    fn transcripts_in_same_second_do_not_overwrite() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10_000);
        let first: Conversation = vec![Turn::new("one", "1")].into();
        let second: Conversation = vec![Turn::new("two", "2")].into();

        archive.save_conversation_at(&first, fixed_time(9)).unwrap();
        let written = archive.save_conversation_at(&second, fixed_time(9)).unwrap();
        assert!(written[0].ends_with("conversation_20240501_120009_1.json"));

        let dir = &archive.dirs().conversations;
        assert_eq!(load_transcript(dir, "conversation_20240501_120009").unwrap(), first);
        assert_eq!(load_transcript(dir, "conversation_20240501_120009_1").unwrap(), second);
    }

    #[test]
    fn missing_transcript_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10_000);
        let err = reassemble_transcript(&archive.dirs().conversations, "conversation_x").unwrap_err();
        assert!(matches!(err, ArchiveError::MissingTranscript { .. }));
    }

    #[test]
    fn training_snapshot_contains_message_and_profile() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10_000);
        let profile = Profile::default();

        let path = archive
            .save_training_snapshot_at("今天天气怎么样", &profile, fixed_time(30))
            .unwrap();
        assert!(path.ends_with("training_20240501_120030.json"));

        let snapshot: TrainingSnapshot =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(snapshot.timestamp, "20240501_120030");
        assert_eq!(snapshot.message, "今天天气怎么样");
        assert_eq!(snapshot.profile, profile);
    }

    #[test]
    fn repeated_snapshots_never_overwrite() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive = archive(&temp_dir, 10_000);
        let profile = Profile::default();

        let a = archive
            .save_training_snapshot_at("same", &profile, fixed_time(1))
            .unwrap();
        let b = archive
            .save_training_snapshot_at("same", &profile, fixed_time(2))
            .unwrap();
        let c = archive
            .save_training_snapshot_at("same", &profile, fixed_time(2))
            .unwrap();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(c.ends_with("training_20240501_120002_1.json"));
        assert_eq!(file_names(&archive.dirs().training_data).len(), 3);
    }

    #[test]
    fn snapshot_write_failure_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dirs = DataDirs::under(&temp_dir.path().join("never-created"));
        let archive = Archive::new(dirs, 10_000);

        let err = archive
            .save_training_snapshot("hi", &Profile::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Write { .. }));
    }
}
