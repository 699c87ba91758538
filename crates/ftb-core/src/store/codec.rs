//! Text grammar of the storage channels.
//!
//! ```text
//! CATEGORIES_BLOCK:
//! CATEGORY:<id>
//! NAME:<name>
//! CREATED_BY:<owner-id>
//! TIMER:<seconds>
//! FILES:
//! <fileId>|<fileType>|<caption>
//! CATEGORY:<id2>
//! ...
//! ```
//!
//! and the singleton global timer record:
//!
//! ```text
//! ===== GLOBAL TIMER =====
//! <seconds>
//! ```
//!
//! A [`Block`] is edited line-wise so that touching one category never rewrites
//! the bytes of its neighbours. Fields inside a category are located by tag, not
//! by offset; malformed lines are skipped.

use std::{fmt, ops::Range, str::FromStr};

use crate::domain::{CategoryId, UserId};

pub const BLOCK_HEADER: &str = "CATEGORIES_BLOCK:";
pub const GLOBAL_TIMER_HEADER: &str = "===== GLOBAL TIMER =====";
pub const CATEGORIES_PER_BLOCK: usize = 10;
pub const MAX_CAPTION_LEN: usize = 1024;

const CATEGORY_TAG: &str = "CATEGORY:";
const NAME_TAG: &str = "NAME:";
const CREATED_BY_TAG: &str = "CREATED_BY:";
const TIMER_TAG: &str = "TIMER:";
const FILES_TAG: &str = "FILES:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Document,
    Photo,
    Video,
    Audio,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Document => "document",
            FileType::Photo => "photo",
            FileType::Video => "video",
            FileType::Audio => "audio",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "document" => Ok(FileType::Document),
            "photo" => Ok(FileType::Photo),
            "video" => Ok(FileType::Video),
            "audio" => Ok(FileType::Audio),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: String,
    pub file_type: FileType,
    pub caption: String,
}

impl FileRecord {
    pub fn new(file_id: impl Into<String>, file_type: FileType, caption: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_type,
            caption: caption.into(),
        }
    }

    /// `<fileId>|<fileType>|<caption>`; line breaks in the caption are flattened.
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}",
            self.file_id,
            self.file_type,
            single_line(&self.caption)
        )
    }

    /// The caption may itself contain `|`; only the first two separators split.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, '|');
        let file_id = parts.next()?.trim();
        let file_type = parts.next()?.parse::<FileType>().ok()?;
        if file_id.is_empty() {
            return None;
        }
        let caption = parts.next().unwrap_or_default();
        Some(Self::new(file_id, file_type, caption))
    }

    /// Caption as sent to recipients (truncated, never rejected).
    pub fn delivery_caption(&self) -> String {
        self.caption.chars().take(MAX_CAPTION_LEN).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    pub created_by: UserId,
    /// `None` inherits the global timer at delivery time.
    pub timer_seconds: Option<u64>,
    /// Most recently added first.
    pub files: Vec<FileRecord>,
}

impl CategoryRecord {
    pub fn new(id: CategoryId, name: &str, created_by: UserId) -> Self {
        Self {
            id,
            name: name.to_string(),
            created_by,
            timer_seconds: None,
            files: Vec::new(),
        }
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{CATEGORY_TAG}{}", self.id),
            format!("{NAME_TAG}{}", single_line(&self.name)),
            format!("{CREATED_BY_TAG}{}", self.created_by.0),
        ];
        if let Some(t) = self.timer_seconds {
            lines.push(format!("{TIMER_TAG}{t}"));
        }
        lines.push(FILES_TAG.to_string());
        lines.extend(self.files.iter().map(FileRecord::to_line));
        lines
    }

    /// Parse the lines of one category section (first line is `CATEGORY:<id>`).
    fn parse_section(lines: &[String]) -> Option<Self> {
        let (first, rest) = lines.split_first()?;
        let id = category_id_of(first)?;

        let mut name = None;
        let mut created_by = None;
        let mut timer_seconds = None;
        let mut files = Vec::new();
        let mut in_files = false;

        for line in rest {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if in_files {
                if let Some(f) = FileRecord::parse_line(line) {
                    files.push(f);
                }
                continue;
            }
            if let Some(v) = line.strip_prefix(NAME_TAG) {
                name.get_or_insert_with(|| v.to_string());
            } else if let Some(v) = line.strip_prefix(CREATED_BY_TAG) {
                created_by = v.trim().parse::<i64>().ok().map(UserId).or(created_by);
            } else if let Some(v) = line.strip_prefix(TIMER_TAG) {
                timer_seconds = v.trim().parse::<u64>().ok().or(timer_seconds);
            } else if line.starts_with(FILES_TAG) {
                in_files = true;
            }
        }

        Some(Self {
            id,
            name: name?,
            created_by: created_by.unwrap_or(UserId(0)),
            timer_seconds,
            files,
        })
    }
}

/// One `CATEGORIES_BLOCK:` message, kept as raw lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    lines: Vec<String>,
}

impl Block {
    pub fn new() -> Self {
        Self {
            lines: vec![BLOCK_HEADER.to_string()],
        }
    }

    pub fn with_category(record: &CategoryRecord) -> Self {
        let mut b = Self::new();
        b.push_category(record);
        b
    }

    /// `None` unless the text is a categories block.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.starts_with(BLOCK_HEADER) {
            return None;
        }
        Some(Self {
            lines: text.split('\n').map(str::to_string).collect(),
        })
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn category_count(&self) -> usize {
        self.lines.iter().filter(|l| category_id_of(l).is_some()).count()
    }

    pub fn has_room(&self) -> bool {
        self.category_count() < CATEGORIES_PER_BLOCK
    }

    pub fn is_empty(&self) -> bool {
        self.category_count() == 0
    }

    pub fn contains(&self, id: &CategoryId) -> bool {
        self.range_of(id).is_some()
    }

    pub fn ids(&self) -> Vec<CategoryId> {
        self.lines.iter().filter_map(|l| category_id_of(l)).collect()
    }

    pub fn categories(&self) -> Vec<CategoryRecord> {
        self.section_ranges()
            .into_iter()
            .filter_map(|r| CategoryRecord::parse_section(&self.lines[r]))
            .collect()
    }

    pub fn category(&self, id: &CategoryId) -> Option<CategoryRecord> {
        let r = self.range_of(id)?;
        CategoryRecord::parse_section(&self.lines[r])
    }

    pub fn push_category(&mut self, record: &CategoryRecord) {
        self.lines.extend(record.to_lines());
    }

    /// Remove the category's whole line range. Other lines are untouched.
    pub fn remove_category(&mut self, id: &CategoryId) -> bool {
        let Some(r) = self.range_of(id) else {
            return false;
        };
        self.lines.drain(r);
        true
    }

    /// Insert a file line right after the category's `FILES:` marker.
    pub fn insert_file(&mut self, id: &CategoryId, file: &FileRecord) -> bool {
        let Some(r) = self.range_of(id) else {
            return false;
        };
        let files_at = match self.find_tag(r.clone(), FILES_TAG) {
            Some(i) => i,
            None => {
                // Section without a FILES marker: repair it at the end of the range.
                self.lines.insert(r.end, FILES_TAG.to_string());
                r.end
            }
        };
        self.lines.insert(files_at + 1, file.to_line());
        true
    }

    /// Replace the category's `TIMER:` line, or insert one after `CREATED_BY:`.
    pub fn set_timer(&mut self, id: &CategoryId, seconds: u64) -> bool {
        let Some(r) = self.range_of(id) else {
            return false;
        };
        let line = format!("{TIMER_TAG}{seconds}");
        if let Some(i) = self.find_tag(r.clone(), TIMER_TAG) {
            self.lines[i] = line;
            return true;
        }
        let at = self
            .find_tag(r.clone(), CREATED_BY_TAG)
            .or_else(|| self.find_tag(r.clone(), NAME_TAG))
            .map(|i| i + 1)
            .or_else(|| self.find_tag(r.clone(), FILES_TAG))
            .unwrap_or(r.end);
        self.lines.insert(at, line);
        true
    }

    fn section_ranges(&self) -> Vec<Range<usize>> {
        let starts: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| category_id_of(l).is_some())
            .map(|(i, _)| i)
            .collect();
        starts
            .iter()
            .enumerate()
            .map(|(n, &s)| s..starts.get(n + 1).copied().unwrap_or(self.lines.len()))
            .collect()
    }

    fn range_of(&self, id: &CategoryId) -> Option<Range<usize>> {
        self.section_ranges()
            .into_iter()
            .find(|r| category_id_of(&self.lines[r.start]).as_ref() == Some(id))
    }

    /// Header tag inside a section, before the file lines begin.
    fn find_tag(&self, r: Range<usize>, tag: &str) -> Option<usize> {
        for i in r.start + 1..r.end {
            let line = &self.lines[i];
            if line.starts_with(tag) {
                return Some(i);
            }
            if line.starts_with(FILES_TAG) {
                return None;
            }
        }
        None
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

pub fn render_global_timer(seconds: u64) -> String {
    format!("{GLOBAL_TIMER_HEADER}\n{seconds}")
}

pub fn is_global_timer(text: &str) -> bool {
    text.starts_with(GLOBAL_TIMER_HEADER)
}

pub fn parse_global_timer(text: &str) -> Option<u64> {
    if !is_global_timer(text) {
        return None;
    }
    text.split('\n').nth(1)?.trim().parse::<u64>().ok()
}

fn category_id_of(line: &str) -> Option<CategoryId> {
    let id = line.strip_prefix(CATEGORY_TAG)?.trim();
    if id.is_empty() {
        return None;
    }
    Some(CategoryId(id.to_string()))
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}
