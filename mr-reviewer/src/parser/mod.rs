//! Unified-diff parser and token-budget chunker (C3).
//!
//! Parses the Forge's per-file diff fragments into `FileDiff`/`Hunk`/`HunkLine`
//! and groups the result into `DiffChunk`s under a configured token budget.
//! `LineMapper` (C4) consumes the same raw per-file diff text independently —
//! this module does not hand hunks to it directly, it hands back the parsed
//! `FileDiff` list the orchestrator threads through both.

use crate::config::ChunkerConfig;
use crate::errors::ParseError;
use crate::forge::types::RawFileDiff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLineKind {
    Added,
    Removed,
    Context,
}

#[derive(Debug, Clone)]
pub struct HunkLine {
    pub kind: HunkLineKind,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<Hunk>,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_renamed: bool,
}

impl FileDiff {
    /// Path inline comments and LineMapper entries are indexed by: the new
    /// path, falling back to the old path for deletions (no new path exists).
    pub fn index_path(&self) -> &str {
        if self.new_path.is_empty() {
            &self.old_path
        } else {
            &self.new_path
        }
    }
}

/// Parses one file's unified-diff fragment into hunks. `path` is used only
/// to label errors.
pub fn parse_file_diff(path: &str, diff_text: &str) -> Result<Vec<Hunk>, ParseError> {
    let mut hunks = Vec::new();
    let mut cursor_old = 0u32;
    let mut cursor_new = 0u32;
    let mut cur: Option<Hunk> = None;

    for (line_no, line) in diff_text.lines().enumerate() {
        if line.starts_with("@@") {
            if let Some(h) = cur.take() {
                hunks.push(h);
            }
            let (old_start, old_count, new_start, new_count) =
                parse_hunk_header(line).ok_or_else(|| ParseError::InvalidHunkHeader {
                    file: path.to_string(),
                    line_no: line_no + 1,
                    excerpt: line.to_string(),
                })?;
            cursor_old = old_start;
            cursor_new = new_start;
            cur = Some(Hunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: Vec::new(),
            });
            continue;
        }

        if line.starts_with("\\ ") {
            continue; // "\ No newline at end of file"
        }

        let Some(hunk) = cur.as_mut() else {
            continue; // prelude before the first hunk header (file headers etc)
        };

        if let Some(rest) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine {
                kind: HunkLineKind::Added,
                text: rest.to_string(),
            });
            cursor_new += 1;
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine {
                kind: HunkLineKind::Removed,
                text: rest.to_string(),
            });
            cursor_old += 1;
        } else {
            let rest = line.strip_prefix(' ').unwrap_or(line);
            hunk.lines.push(HunkLine {
                kind: HunkLineKind::Context,
                text: rest.to_string(),
            });
            cursor_old += 1;
            cursor_new += 1;
        }

        if cursor_old > hunk.old_start + hunk.old_count || cursor_new > hunk.new_start + hunk.new_count
        {
            return Err(ParseError::BookkeepingMismatch {
                file: path.to_string(),
                line_no: line_no + 1,
                excerpt: line.to_string(),
            });
        }
    }

    if let Some(h) = cur {
        hunks.push(h);
    }
    Ok(hunks)
}

/// Parses `@@ -O[,C] +O[,C] @@` into `(old_start, old_count, new_start, new_count)`.
/// Counts default to 1 when omitted, per unified-diff convention.
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    let body = line.strip_prefix("@@ ")?;
    let body = &body[..body.find(" @@")?];
    let (old_part, new_part) = body.split_once(' ')?;
    let old_part = old_part.strip_prefix('-')?;
    let new_part = new_part.strip_prefix('+')?;
    let (old_start, old_count) = split_start_count(old_part)?;
    let (new_start, new_count) = split_start_count(new_part)?;
    Some((old_start, old_count, new_start, new_count))
}

fn split_start_count(s: &str) -> Option<(u32, u32)> {
    match s.split_once(',') {
        Some((a, b)) => Some((a.parse().ok()?, b.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Parses every file in a raw-diff list. A single malformed file aborts the
/// whole parse: LineMapper must be self-consistent across the MR.
pub fn parse_all(raw: &[RawFileDiff]) -> Result<Vec<FileDiff>, ParseError> {
    let mut out = Vec::with_capacity(raw.len());
    for f in raw {
        let path = if f.new_path.is_empty() {
            &f.old_path
        } else {
            &f.new_path
        };
        let hunks = match &f.diff {
            Some(text) => parse_file_diff(path, text)?,
            None => Vec::new(),
        };
        out.push(FileDiff {
            old_path: f.old_path.clone(),
            new_path: f.new_path.clone(),
            hunks,
            is_new: f.is_new,
            is_deleted: f.is_deleted,
            is_renamed: f.is_renamed,
        });
    }
    Ok(out)
}

/// An ordered group of FileDiffs whose estimated serialized size stays under
/// the configured token budget.
#[derive(Debug, Clone)]
pub struct DiffChunk {
    pub files: Vec<FileDiff>,
    pub estimated_tokens: usize,
}

fn serialized_len(file: &FileDiff) -> usize {
    file.hunks
        .iter()
        .map(|h| h.lines.iter().map(|l| l.text.len() + 1).sum::<usize>())
        .sum()
}

fn token_ratio_for(path: &str, cfg: &ChunkerConfig) -> f64 {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match crate::config::language_for_extension(&ext) {
        Some(_) => cfg.token_ratios.code,
        None => cfg.token_ratios.text,
    }
}

fn estimate_tokens(file: &FileDiff, cfg: &ChunkerConfig) -> usize {
    let len = serialized_len(file);
    let ratio = token_ratio_for(file.index_path(), cfg);
    ((len as f64) * ratio).ceil() as usize
}

fn priority_of(path: &str, cfg: &ChunkerConfig) -> i32 {
    if cfg.patterns.is_prioritized(path) {
        0
    } else {
        1
    }
}

/// Filters out ignored files, orders the rest by priority (prioritized
/// patterns first, stable tie-break on input order), then groups them into
/// token-budget-bounded chunks. A single file whose own estimate exceeds the
/// budget becomes its own chunk rather than being split mid-hunk.
pub fn build_chunks(files: Vec<FileDiff>, cfg: &ChunkerConfig) -> Vec<DiffChunk> {
    let mut indexed: Vec<(usize, FileDiff)> = files
        .into_iter()
        .enumerate()
        .filter(|(_, f)| !cfg.patterns.is_ignored(f.index_path()))
        .collect();

    indexed.sort_by(|(ia, a), (ib, b)| {
        let pa = priority_of(a.index_path(), cfg);
        let pb = priority_of(b.index_path(), cfg);
        pa.cmp(&pb).then(ia.cmp(ib))
    });

    let mut chunks: Vec<DiffChunk> = Vec::new();
    let mut current_files: Vec<FileDiff> = Vec::new();
    let mut current_tokens = 0usize;

    for (_, file) in indexed {
        let tokens = estimate_tokens(&file, cfg);

        if tokens > cfg.max_chunk_tokens {
            if !current_files.is_empty() {
                chunks.push(DiffChunk {
                    files: std::mem::take(&mut current_files),
                    estimated_tokens: current_tokens,
                });
                current_tokens = 0;
            }
            chunks.push(DiffChunk {
                files: vec![file],
                estimated_tokens: tokens,
            });
            continue;
        }

        if current_tokens + tokens > cfg.max_chunk_tokens && !current_files.is_empty() {
            chunks.push(DiffChunk {
                files: std::mem::take(&mut current_files),
                estimated_tokens: current_tokens,
            });
            current_tokens = 0;
        }

        current_tokens += tokens;
        current_files.push(file);
    }

    if !current_files.is_empty() {
        chunks.push(DiffChunk {
            files: current_files,
            estimated_tokens: current_tokens,
        });
    }

    if let Some(max) = cfg.max_chunks {
        chunks.truncate(max);
    }

    chunks
}

/// Renders a `DiffChunk` back into unified-diff text suitable for submission
/// to the LLM as the user turn of a chat-completion request.
pub fn render_chunk_text(chunk: &DiffChunk) -> String {
    let mut out = String::new();
    for file in &chunk.files {
        out.push_str(&format!(
            "--- {}\n+++ {}\n",
            if file.old_path.is_empty() {
                "/dev/null"
            } else {
                &file.old_path
            },
            if file.new_path.is_empty() {
                "/dev/null"
            } else {
                &file.new_path
            }
        ));
        for hunk in &file.hunks {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            ));
            for line in &hunk.lines {
                let prefix = match line.kind {
                    HunkLineKind::Added => '+',
                    HunkLineKind::Removed => '-',
                    HunkLineKind::Context => ' ',
                };
                out.push(prefix);
                out.push_str(&line.text);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(old: &str, new: &str, diff: &str) -> RawFileDiff {
        RawFileDiff {
            old_path: old.to_string(),
            new_path: new.to_string(),
            is_new: old.is_empty(),
            is_deleted: new.is_empty(),
            is_renamed: false,
            diff: Some(diff.to_string()),
        }
    }

    #[test]
    fn parses_added_file_hunk() {
        let diff = "@@ -0,0 +1,3 @@\n+a\n+b\n+c\n";
        let files = parse_all(&[raw("", "new.py", diff)]).unwrap();
        assert_eq!(files.len(), 1);
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.new_start, 1);
        assert_eq!(hunk.lines.len(), 3);
        assert!(hunk.lines.iter().all(|l| l.kind == HunkLineKind::Added));
    }

    #[test]
    fn parses_context_and_removed_lines() {
        let diff = "@@ -10,3 +10,3 @@\n line ten\n-old eleven\n+new eleven\n line twelve\n";
        let files = parse_all(&[raw("a.py", "a.py", diff)]).unwrap();
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.lines[0].kind, HunkLineKind::Context);
        assert_eq!(hunk.lines[1].kind, HunkLineKind::Removed);
        assert_eq!(hunk.lines[2].kind, HunkLineKind::Added);
        assert_eq!(hunk.lines[3].kind, HunkLineKind::Context);
    }

    #[test]
    fn malformed_hunk_header_is_an_error() {
        let diff = "@@ nonsense @@\n+x\n";
        let err = parse_file_diff("broken.py", diff).unwrap_err();
        assert!(matches!(err, ParseError::InvalidHunkHeader { .. }));
    }

    #[test]
    fn oversized_file_gets_its_own_chunk() {
        let mut cfg = ChunkerConfig::default();
        cfg.max_chunk_tokens = 1;
        let big_diff = "@@ -1,1 +1,1 @@\n+a very long replacement line of content\n";
        let files = parse_all(&[raw("big.py", "big.py", big_diff)]).unwrap();
        let chunks = build_chunks(files, &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].files.len(), 1);
    }

    #[test]
    fn ignored_files_are_excluded() {
        let mut cfg = ChunkerConfig::default();
        cfg.patterns = crate::config::FilePatterns::compile(
            &["*.lock".to_string()],
            &[],
        )
        .unwrap();
        let diff = "@@ -1,1 +1,1 @@\n+x\n";
        let files = parse_all(&[raw("Cargo.lock", "Cargo.lock", diff)]).unwrap();
        let chunks = build_chunks(files, &cfg);
        assert!(chunks.is_empty());
    }
}
