use crate::traits::LogMessage;
use anyhow::Result;
use log::{debug, trace};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One physical line of a log file, with its position.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Byte offset of the start of the line.
    pub byte_offset: u64,
    /// 1-based line number, counted from the start of the file.
    pub line_number: u64,
    /// Lossily decoded line text, without the trailing newline.
    pub text: String,
}

/// Lazy iterator over the lines of a log file from a byte offset.
///
/// When the starting offset does not fall on a line boundary, the partial
/// fragment is discarded by advancing to the next newline before the first
/// record is emitted. Line numbers are always counted from the true start of
/// the file so they stay stable across incremental runs. Invalid byte
/// sequences are replaced with substitution characters rather than aborting.
pub struct LogLines {
    reader: BufReader<File>,
    offset: u64,
    line_number: u64,
}

impl LogLines {
    /// Opens `path` positioned at `start_offset`, synchronized to the next
    /// line boundary if the offset lands mid-line.
    pub fn from_offset(path: &Path, start_offset: u64) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut offset = start_offset.min(len);
        if offset > 0 && !at_line_boundary(&mut reader, offset)? {
            // Discard the partial fragment up to the next newline.
            reader.seek(SeekFrom::Start(offset))?;
            let mut skipped = Vec::new();
            let n = reader.read_until(b'\n', &mut skipped)? as u64;
            debug!("Skipped {} bytes of partial line at offset {}", n, offset);
            offset += n;
        } else {
            reader.seek(SeekFrom::Start(offset))?;
        }

        let line_number = count_lines_before(path, offset)?;

        Ok(LogLines {
            reader,
            offset,
            line_number,
        })
    }

    /// Byte offset one past the last consumed line (the end-of-data position
    /// once the iterator is exhausted).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for LogLines {
    type Item = std::io::Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        let n = match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => return None,
            Ok(n) => n as u64,
            Err(e) => return Some(Err(e)),
        };

        let byte_offset = self.offset;
        self.offset += n;
        self.line_number += 1;

        while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
            buf.pop();
        }

        Some(Ok(LogRecord {
            byte_offset,
            line_number: self.line_number,
            text: String::from_utf8_lossy(&buf).into_owned(),
        }))
    }
}

/// True when `offset` sits directly after a newline (i.e. on a line boundary).
fn at_line_boundary(reader: &mut BufReader<File>, offset: u64) -> std::io::Result<bool> {
    reader.seek(SeekFrom::Start(offset - 1))?;
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0] == b'\n')
}

/// Counts complete lines in `[0, upto)` so resumed scans report the same line
/// numbers as a full scan.
fn count_lines_before(path: &Path, upto: u64) -> std::io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut remaining = upto;
    let mut count = 0u64;
    let mut chunk = [0u8; 8192];
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let n = reader.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        count += chunk[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        remaining -= n as u64;
    }
    Ok(count)
}

/// Message body: either a plain string or an ordered list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentField {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ContentField {
    fn default() -> Self {
        ContentField::Text(String::new())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub content: ContentField,
}

/// A raw log entry as it appears on one JSONL line.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub message: RawMessage,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
}

/// Extracts user-facing prose from a message body.
///
/// Plain string content is returned verbatim. Block lists keep only `text`
/// blocks, newline-joined in original order; thinking traces, tool
/// invocations and tool results are dropped.
pub fn extract_text_content(content: &ContentField) -> String {
    match content {
        ContentField::Text(text) => text.clone(),
        ContentField::Blocks(blocks) => blocks
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Parses a single log line, returning None if it is malformed or not a
/// `user`/`assistant` entry. Skipping is silent: foreign record types are not
/// an error condition for the file.
pub fn parse_log_line(line: &str) -> Option<RawEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let entry: RawEntry = match serde_json::from_str(line) {
        Ok(entry) => entry,
        Err(e) => {
            trace!("Skipping unparseable log line: {}", e);
            return None;
        }
    };

    if entry.entry_type != "user" && entry.entry_type != "assistant" {
        return None;
    }

    Some(entry)
}

/// Converts one parsed line into an indexable message, or None when the
/// record is skippable (foreign type, malformed, or no extractable text).
pub fn extract_message(record: &LogRecord, file_path: &str) -> Option<LogMessage> {
    let entry = parse_log_line(&record.text)?;
    let content = extract_text_content(&entry.message.content);
    if content.trim().is_empty() {
        return None;
    }

    Some(LogMessage {
        uuid: entry.uuid,
        role: entry.entry_type,
        content,
        timestamp: entry.timestamp,
        session_id: entry.session_id,
        file_path: file_path.to_string(),
        line_number: record.line_number,
        byte_offset: record.byte_offset,
    })
}

/// Materializes all indexable messages in `path` from `start_offset` to the
/// current end of file. Returns the messages together with the end-of-data
/// offset observed by the scan, which callers record as progress after a
/// successful store write.
pub fn collect_messages(path: &Path, start_offset: u64) -> Result<(Vec<LogMessage>, u64)> {
    let file_path = path.to_string_lossy().into_owned();
    let mut lines = LogLines::from_offset(path, start_offset)?;

    let mut messages = Vec::new();
    for record in &mut lines {
        let record = record?;
        if let Some(message) = extract_message(&record, &file_path) {
            messages.push(message);
        }
    }

    let end_offset = lines.offset();
    debug!(
        "Collected {} message(s) from {} (offset {}..{})",
        messages.len(),
        file_path,
        start_offset,
        end_offset
    );
    Ok((messages, end_offset))
}

/// Discover all log files in a project directory, sorted by name. A missing
/// directory yields an empty list.
pub fn discover_log_files(project_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(project_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("jsonl")
        })
        .collect();
    files.sort();
    files
}

/// List all project names under the logs root that contain at least one log
/// file, sorted.
pub fn list_all_projects(logs_root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(logs_root) else {
        return Vec::new();
    };
    let mut projects: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && !discover_log_files(path).is_empty())
        .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    projects.sort();
    projects
}

/// Path to a project's log directory under the logs root.
pub fn project_path(logs_root: &Path, project: &str) -> PathBuf {
    logs_root.join(project)
}
