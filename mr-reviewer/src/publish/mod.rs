//! CommentPublisher (C6): formats critiques as markdown, publishes the
//! summary/inline/file comments for a review, applies the inline→general
//! fallback protocol when a position is rejected or simply isn't part of
//! the diff, and paces successive publish calls.

pub mod gitlab;

pub use gitlab::CommentPublisher;

use crate::llm::{Critique, CritiqueKind, Severity};

/// Critique plus presentation fields. Either file-level (`line = None`) or
/// inline (`line = Some`).
#[derive(Debug, Clone)]
pub struct FormattedComment {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub kind: CritiqueKind,
    pub severity: Severity,
    pub comment: String,
    pub title: String,
    pub code_snippet: Option<String>,
    pub suggestion: Option<String>,
}

impl FormattedComment {
    pub fn from_critique(c: Critique) -> Self {
        let code_snippet = extract_fenced_block(&c.comment, false);
        let suggestion = if c.kind == CritiqueKind::Suggestion {
            extract_fenced_block(&c.comment, true)
        } else {
            None
        };
        FormattedComment {
            title: title_for(c.kind, c.severity),
            file: c.file,
            line: c.line,
            kind: c.kind,
            severity: c.severity,
            comment: c.comment,
            code_snippet,
            suggestion,
        }
    }
}

fn title_for(kind: CritiqueKind, severity: Severity) -> String {
    format!("{} {}", type_emoji(kind), severity_label(severity))
}

fn type_emoji(kind: CritiqueKind) -> &'static str {
    match kind {
        CritiqueKind::Issue => "\u{1F41B}",       // bug
        CritiqueKind::Suggestion => "\u{1F4A1}",  // bulb
        CritiqueKind::Question => "\u{2753}",     // question mark
        CritiqueKind::Summary => "\u{1F4CB}",     // clipboard
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "\u{1F7E2}",      // green circle
        Severity::Medium => "\u{1F7E1}",   // yellow circle
        Severity::High => "\u{1F7E0}",     // orange circle
        Severity::Critical => "\u{1F534}", // red circle
    }
}

fn severity_label(severity: Severity) -> String {
    let word = match severity {
        Severity::Low => "LOW",
        Severity::Medium => "MEDIUM",
        Severity::High => "HIGH",
        Severity::Critical => "CRITICAL",
    };
    format!("{} **{word}**", severity_emoji(severity))
}

/// Pulls the first ``` fenced block out of `text`, if any. When
/// `prefer_diff_fence` is set this only matches fences tagged `diff` or
/// `suggestion`, used to separate an LLM's "suggested fix" block from an
/// illustrative code snippet.
fn extract_fenced_block(text: &str, prefer_diff_fence: bool) -> Option<String> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    let lang_end = after_open.find('\n')?;
    let lang = after_open[..lang_end].trim();
    if prefer_diff_fence && !matches!(lang, "diff" | "suggestion") {
        return None;
    }
    let body_start = start + 3 + lang_end + 1;
    let end = text[body_start..].find("```")?;
    Some(text[body_start..body_start + end].trim_end().to_string())
}

/// Batch of comments ready for publishing, partitioned by presentation kind.
#[derive(Debug, Clone, Default)]
pub struct CommentBatch {
    pub summary: Option<String>,
    pub file_comments: Vec<FormattedComment>,
    pub inline_comments: Vec<FormattedComment>,
}

impl CommentBatch {
    /// Partitions raw critiques: `Summary`-kind critiques are concatenated
    /// into `summary`; critiques with both a file and a line become inline
    /// candidates (LineMapper decides validity at publish time); everything
    /// else becomes a file-level/general comment.
    pub fn from_critiques(critiques: Vec<Critique>) -> Self {
        let mut batch = CommentBatch::default();
        let mut summary_parts = Vec::new();

        for critique in critiques {
            if critique.kind == CritiqueKind::Summary {
                summary_parts.push(critique.comment);
                continue;
            }
            let is_inline = critique.file.is_some() && critique.line.is_some();
            let formatted = FormattedComment::from_critique(critique);
            if is_inline {
                batch.inline_comments.push(formatted);
            } else {
                batch.file_comments.push(formatted);
            }
        }

        if !summary_parts.is_empty() {
            batch.summary = Some(summary_parts.join("\n\n"));
        }
        batch
    }
}

/// Fixed banner prefixed to the one summary note per review.
pub const SUMMARY_BANNER: &str = "## \u{1F916} Automated Code Review";

/// Renders one `FormattedComment` as a complete markdown comment body,
/// including the severity badge, an optional code-fence, and a trailing
/// `file:line` footer.
pub fn format_comment(fc: &FormattedComment) -> String {
    let mut body = format!("{}\n\n{}", fc.title, fc.comment);

    if let Some(snippet) = &fc.code_snippet {
        body.push_str(&format!("\n\n```\n{snippet}\n```"));
    }
    if let Some(suggestion) = &fc.suggestion {
        body.push_str(&format!("\n\n**Suggested fix:**\n```\n{suggestion}\n```"));
    }

    match (&fc.file, fc.line) {
        (Some(file), Some(line)) => body.push_str(&format!("\n\n---\n`{file}:{line}`")),
        (Some(file), None) => body.push_str(&format!("\n\n---\n`{file}`")),
        (None, _) => {}
    }

    body
}

/// Outcome counters for one `CommentPublisher::publish` invocation.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub summary_posted: bool,
    pub inline_posted: usize,
    pub general_posted: usize,
    /// Inline comments that degraded to a general note (either the line
    /// wasn't part of the diff, or the Forge rejected the position).
    pub fallback_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critique(file: Option<&str>, line: Option<u32>, kind: CritiqueKind) -> Critique {
        Critique {
            file: file.map(String::from),
            line,
            comment: "body text".into(),
            kind,
            severity: Severity::Medium,
        }
    }

    #[test]
    fn summary_critiques_are_concatenated_separately() {
        let batch = CommentBatch::from_critiques(vec![
            critique(None, None, CritiqueKind::Summary),
            critique(Some("a.py"), Some(3), CritiqueKind::Issue),
        ]);
        assert_eq!(batch.summary, Some("body text".to_string()));
        assert_eq!(batch.inline_comments.len(), 1);
        assert!(batch.file_comments.is_empty());
    }

    #[test]
    fn critique_without_line_becomes_file_level() {
        let batch = CommentBatch::from_critiques(vec![critique(
            Some("a.py"),
            None,
            CritiqueKind::Question,
        )]);
        assert_eq!(batch.file_comments.len(), 1);
        assert!(batch.inline_comments.is_empty());
    }

    #[test]
    fn format_comment_includes_footer_for_inline() {
        let fc = FormattedComment::from_critique(critique(
            Some("a.py"),
            Some(10),
            CritiqueKind::Issue,
        ));
        let body = format_comment(&fc);
        assert!(body.contains("`a.py:10`"));
    }

    #[test]
    fn extract_fenced_block_finds_first_fence() {
        let text = "some text\n```python\nprint(1)\n```\nmore text";
        assert_eq!(
            extract_fenced_block(text, false),
            Some("print(1)".to_string())
        );
    }
}
