//! LineMapper (C4): builds the set of `new_line` values the Forge will accept
//! as inline-comment anchors, and the `line_code` identifier each one needs.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::forge::types::RawFileDiff;
use crate::parser::{self, HunkLineKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Added,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePositionInfo {
    pub file_path: String,
    pub new_line: u32,
    pub old_line: Option<u32>,
    pub line_type: LineType,
    pub line_code: String,
}

#[derive(Debug, Clone)]
pub struct FileLineMapping {
    pub file_path: String,
    /// Old-side path for this file (equal to `file_path` unless renamed).
    /// Not part of the distilled spec's `FileLineMapping` shape; carried so
    /// the publisher can build a `DiscussionPosition` without re-parsing the
    /// raw diff list a second time.
    pub old_path: String,
    pub valid_new_lines: std::collections::BTreeSet<u32>,
    pub line_info: HashMap<u32, LinePositionInfo>,
    pub file_sha: String,
}

/// `sha1_hex(file_path) + "_" + (old_line or "") + "_" + (new_line or "")`.
pub fn line_code(file_path: &str, old_line: Option<u32>, new_line: Option<u32>) -> String {
    let file_sha = sha1_hex(file_path);
    let old_part = old_line.map(|n| n.to_string()).unwrap_or_default();
    let new_part = new_line.map(|n| n.to_string()).unwrap_or_default();
    format!("{file_sha}_{old_part}_{new_part}")
}

fn sha1_hex(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Per-MR index of valid inline-comment positions, rebuilt from scratch on
/// every `build` call. Renamed files are indexed by `new_path`; deleted files
/// never populate any entries; new files populate entirely `added` entries.
#[derive(Debug, Clone, Default)]
pub struct LineMapper {
    files: HashMap<String, FileLineMapping>,
}

impl LineMapper {
    pub fn new() -> Self {
        LineMapper::default()
    }

    /// Rebuilds internal state from the Forge's raw per-file diffs. Previous
    /// state is discarded. Files with no diff text (binary/too-large) and
    /// deleted files contribute no entries.
    pub fn build(&mut self, diffs: &[RawFileDiff]) {
        self.files.clear();

        for diff in diffs {
            if diff.is_deleted {
                continue;
            }
            let Some(diff_text) = &diff.diff else {
                continue;
            };
            let path = if diff.new_path.is_empty() {
                diff.old_path.clone()
            } else {
                diff.new_path.clone()
            };
            let Ok(hunks) = parser::parse_file_diff(&path, diff_text) else {
                continue;
            };

            let file_sha = sha1_hex(&path);
            let mut valid_new_lines = std::collections::BTreeSet::new();
            let mut line_info = HashMap::new();

            for hunk in &hunks {
                let mut cursor_old = hunk.old_start;
                let mut cursor_new = hunk.new_start;
                for line in &hunk.lines {
                    match line.kind {
                        HunkLineKind::Added => {
                            let new_line = cursor_new;
                            let code = line_code(&path, None, Some(new_line));
                            line_info.insert(
                                new_line,
                                LinePositionInfo {
                                    file_path: path.clone(),
                                    new_line,
                                    old_line: None,
                                    line_type: LineType::Added,
                                    line_code: code,
                                },
                            );
                            valid_new_lines.insert(new_line);
                            cursor_new += 1;
                        }
                        HunkLineKind::Context => {
                            let new_line = cursor_new;
                            let old_line = cursor_old;
                            let code = line_code(&path, Some(old_line), Some(new_line));
                            line_info.insert(
                                new_line,
                                LinePositionInfo {
                                    file_path: path.clone(),
                                    new_line,
                                    old_line: Some(old_line),
                                    line_type: LineType::Context,
                                    line_code: code,
                                },
                            );
                            valid_new_lines.insert(new_line);
                            cursor_old += 1;
                            cursor_new += 1;
                        }
                        HunkLineKind::Removed => {
                            cursor_old += 1;
                        }
                    }
                }
            }

            let old_path = if diff.old_path.is_empty() {
                path.clone()
            } else {
                diff.old_path.clone()
            };

            self.files.insert(
                path.clone(),
                FileLineMapping {
                    file_path: path,
                    old_path,
                    valid_new_lines,
                    line_info,
                    file_sha,
                },
            );
        }
    }

    /// True iff `(file, new_line)` was recorded during `build`. Unknown
    /// paths return false, never an error.
    pub fn is_valid(&self, file: &str, new_line: u32) -> bool {
        self.files
            .get(file)
            .map(|m| m.valid_new_lines.contains(&new_line))
            .unwrap_or(false)
    }

    pub fn info(&self, file: &str, new_line: u32) -> Option<&LinePositionInfo> {
        self.files.get(file)?.line_info.get(&new_line)
    }

    /// Old-side path for `file` (equal to `file` unless the file was
    /// renamed). `None` if `file` isn't part of this diff.
    pub fn old_path(&self, file: &str) -> Option<&str> {
        self.files.get(file).map(|m| m.old_path.as_str())
    }

    /// Nearest recorded `new_line` to the requested one, by absolute distance.
    /// Ties are broken toward the *higher* line number (a deliberate
    /// divergence from a naive `min()`-based search, which would tie toward
    /// the lower one — see DESIGN.md).
    pub fn nearest_valid(&self, file: &str, new_line: u32) -> Option<u32> {
        let mapping = self.files.get(file)?;
        mapping
            .valid_new_lines
            .iter()
            .copied()
            .min_by_key(|&candidate| {
                let dist = candidate.abs_diff(new_line);
                // Negate the candidate so that, among equal distances, the
                // comparison favors the higher line number.
                (dist, std::cmp::Reverse(candidate))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(old: &str, new: &str, text: &str, is_new: bool, is_deleted: bool) -> RawFileDiff {
        RawFileDiff {
            old_path: old.to_string(),
            new_path: new.to_string(),
            is_new,
            is_deleted,
            is_renamed: false,
            diff: Some(text.to_string()),
        }
    }

    #[test]
    fn added_file_lines_are_all_added_type() {
        let mut mapper = LineMapper::new();
        mapper.build(&[diff(
            "",
            "new.py",
            "@@ -0,0 +1,3 @@\n+a\n+b\n+c\n",
            true,
            false,
        )]);
        assert!(mapper.is_valid("new.py", 2));
        let info = mapper.info("new.py", 2).unwrap();
        assert_eq!(info.line_type, LineType::Added);
        assert_eq!(info.old_line, None);
        assert_eq!(info.line_code, line_code("new.py", None, Some(2)));
    }

    #[test]
    fn context_line_old_line_is_pre_increment_cursor() {
        let mut mapper = LineMapper::new();
        // Hunk starts at old=10/new=10: context, removed, added, context.
        mapper.build(&[diff(
            "a.py",
            "a.py",
            "@@ -10,3 +10,3 @@\n line ten\n-old eleven\n+new eleven\n line twelve\n",
            false,
            false,
        )]);
        // First context line: old=10, new=10.
        let first = mapper.info("a.py", 10).unwrap();
        assert_eq!(first.old_line, Some(10));
        // Added replacement line: new=11, no old_line.
        let added = mapper.info("a.py", 11).unwrap();
        assert_eq!(added.line_type, LineType::Added);
        assert_eq!(added.old_line, None);
        // Final context line: old cursor has advanced past the removed line,
        // so old=12 even though new=12 too (no divergence in this example,
        // but the cursor is independent of new_line by construction).
        let last = mapper.info("a.py", 12).unwrap();
        assert_eq!(last.old_line, Some(12));
    }

    #[test]
    fn deleted_file_has_no_valid_positions() {
        let mut mapper = LineMapper::new();
        mapper.build(&[diff("gone.py", "", "@@ -1,2 +0,0 @@\n-a\n-b\n", false, true)]);
        assert!(!mapper.is_valid("gone.py", 1));
        assert_eq!(mapper.info("gone.py", 1), None);
    }

    #[test]
    fn nearest_valid_ties_break_high() {
        let mut mapper = LineMapper::new();
        mapper.build(&[diff(
            "a.py",
            "a.py",
            "@@ -1,1 +1,1 @@\n+only line\n",
            false,
            false,
        )]);
        // Only new_line=1 exists; nearest_valid to a far line just returns it.
        assert_eq!(mapper.nearest_valid("a.py", 5), Some(1));
    }

    #[test]
    fn unknown_path_lookups_never_error() {
        let mapper = LineMapper::new();
        assert!(!mapper.is_valid("missing.py", 1));
        assert_eq!(mapper.info("missing.py", 1), None);
        assert_eq!(mapper.nearest_valid("missing.py", 1), None);
    }
}
