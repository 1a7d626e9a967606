//! Line-based unified diffs and selective hunk application
//!
//! Hunks are produced by a Myers diff over lines (line terminators kept)
//! with zero context lines, so every hunk is an independent edit that can be
//! accepted or rejected on its own.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, group_diff_ops, Algorithm, DiffTag};
use std::fmt::Write as _;

/// Role of a line inside a hunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Add,
    Delete,
}

impl LineKind {
    fn marker(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Add => '+',
            Self::Delete => '-',
        }
    }
}

/// One line of a hunk, without its terminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkLine {
    pub kind: LineKind,
    pub content: String,
    /// Last line of its file and not newline-terminated
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_newline: bool,
}

impl HunkLine {
    fn from_raw(kind: LineKind, raw: &str) -> Self {
        match raw.strip_suffix('\n') {
            Some(content) => Self {
                kind,
                content: content.to_string(),
                no_newline: false,
            },
            None => Self {
                kind,
                content: raw.to_string(),
                no_newline: true,
            },
        }
    }

    fn raw(&self) -> String {
        if self.no_newline {
            self.content.clone()
        } else {
            format!("{}\n", self.content)
        }
    }
}

/// Contiguous edit, in unified-diff coordinates
///
/// Starts are 1-based. A zero-length side points at the line *after which*
/// the edit happens (0 for the start of the file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Check if the hunk only adds lines
    #[inline]
    #[must_use]
    pub fn is_insertion(&self) -> bool {
        self.old_lines == 0
    }

    /// 0-based index of the first old line this hunk replaces
    #[inline]
    #[must_use]
    pub fn old_begin(&self) -> usize {
        if self.old_lines == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }

    fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }

    fn removed(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines
            .iter()
            .filter(|l| matches!(l.kind, LineKind::Delete | LineKind::Context))
    }

    fn added(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines
            .iter()
            .filter(|l| matches!(l.kind, LineKind::Add | LineKind::Context))
    }
}

/// Diff of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub label: String,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// Check if the two sides were identical
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Unified-diff text
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.hunks.is_empty() {
            return out;
        }
        let _ = writeln!(out, "--- a/{}", self.label);
        let _ = writeln!(out, "+++ b/{}", self.label);
        for hunk in &self.hunks {
            let _ = writeln!(out, "{}", hunk.header());
            for line in &hunk.lines {
                let _ = writeln!(out, "{}{}", line.kind.marker(), line.content);
                if line.no_newline {
                    out.push_str("\\ No newline at end of file\n");
                }
            }
        }
        out
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Compute hunks turning `current` into `updated`
#[must_use]
pub fn generate_hunks(current: &str, updated: &str, label: &str) -> FileDiff {
    let old = split_lines(current);
    let new = split_lines(updated);
    let ops = capture_diff_slices(Algorithm::Myers, &old, &new);

    let mut hunks = Vec::new();
    for group in group_diff_ops(ops, 0) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut lines = Vec::new();
        for op in &group {
            match op.tag() {
                DiffTag::Equal => {
                    lines.extend(old[op.old_range()].iter().map(|l| HunkLine::from_raw(LineKind::Context, l)));
                }
                DiffTag::Delete => {
                    lines.extend(old[op.old_range()].iter().map(|l| HunkLine::from_raw(LineKind::Delete, l)));
                }
                DiffTag::Insert => {
                    lines.extend(new[op.new_range()].iter().map(|l| HunkLine::from_raw(LineKind::Add, l)));
                }
                DiffTag::Replace => {
                    lines.extend(old[op.old_range()].iter().map(|l| HunkLine::from_raw(LineKind::Delete, l)));
                    lines.extend(new[op.new_range()].iter().map(|l| HunkLine::from_raw(LineKind::Add, l)));
                }
            }
        }

        hunks.push(Hunk {
            old_start: unified_start(&old_range),
            old_lines: old_range.len(),
            new_start: unified_start(&new_range),
            new_lines: new_range.len(),
            lines,
        });
    }

    FileDiff {
        label: label.to_string(),
        hunks,
    }
}

fn unified_start(range: &std::ops::Range<usize>) -> usize {
    if range.is_empty() {
        range.start
    } else {
        range.start + 1
    }
}

/// Apply the accepted subset of `hunks` to `current`
///
/// Hunks must be ordered and non-overlapping in old coordinates, which is
/// what [`generate_hunks`] produces. Rejected hunks leave their region as-is.
///
/// # Errors
/// Returns [`DiffError`] when `accepted` has the wrong length or a hunk does
/// not fit `current`
pub fn apply_hunks(current: &str, hunks: &[Hunk], accepted: &[bool]) -> Result<String, DiffError> {
    if hunks.len() != accepted.len() {
        return Err(DiffError::SelectionMismatch {
            hunks: hunks.len(),
            selected: accepted.len(),
        });
    }
    let old = split_lines(current);
    let mut out = String::with_capacity(current.len());
    let mut cursor = 0usize;

    for (index, (hunk, take)) in hunks.iter().zip(accepted).enumerate() {
        if hunk.removed().count() != hunk.old_lines || hunk.added().count() != hunk.new_lines {
            return Err(DiffError::InvalidHunk { index });
        }
        let begin = hunk.old_begin();
        let end = begin + hunk.old_lines;
        if begin < cursor {
            return Err(DiffError::Overlap { index });
        }
        if end > old.len() {
            return Err(DiffError::OutOfRange {
                index,
                end,
                available: old.len(),
            });
        }

        for line in &old[cursor..begin] {
            out.push_str(line);
        }
        if *take {
            let matches = old[begin..end]
                .iter()
                .zip(hunk.removed())
                .all(|(have, want)| *have == want.raw());
            if !matches {
                return Err(DiffError::ContextMismatch {
                    index,
                    line: begin + 1,
                });
            }
            for line in hunk.added() {
                out.push_str(&line.raw());
            }
        } else {
            for line in &old[begin..end] {
                out.push_str(line);
            }
        }
        cursor = end;
    }

    for line in &old[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Errors applying hunks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("{selected} selections given for {hunks} hunks")]
    SelectionMismatch { hunks: usize, selected: usize },

    #[error("hunk {index} line counts do not match its header")]
    InvalidHunk { index: usize },

    #[error("hunk {index} overlaps the previous hunk")]
    Overlap { index: usize },

    #[error("hunk {index} ends at line {end}, file has {available}")]
    OutOfRange {
        index: usize,
        end: usize,
        available: usize,
    },

    #[error("hunk {index} does not match the file at line {line}")]
    ContextMismatch { index: usize, line: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn identical_inputs_have_no_hunks() {
        let diff = generate_hunks("a\nb\n", "a\nb\n", "x.md");
        assert!(diff.is_empty());
        assert_eq!(diff.render(), "");
    }

    #[test]
    fn single_replacement_renders_unified() {
        let diff = generate_hunks("a\nb\nc\n", "a\nB\nc\n", "doc.md");
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(
            diff.render(),
            "--- a/doc.md\n+++ b/doc.md\n@@ -2,1 +2,1 @@\n-b\n+B\n"
        );
    }

    #[test]
    fn insertion_coordinates_point_after_line() {
        let diff = generate_hunks("a\nc\n", "a\nb\nc\n", "f");
        let hunk = &diff.hunks[0];
        assert_eq!((hunk.old_start, hunk.old_lines), (1, 0));
        assert!(hunk.is_insertion());
        assert_eq!(hunk.old_begin(), 1);
    }

    #[test]
    fn partial_acceptance() {
        let current = "one\ntwo\nthree\nfour\n";
        let updated = "ONE\ntwo\nthree\nFOUR\n";
        let diff = generate_hunks(current, updated, "f");
        assert_eq!(diff.hunks.len(), 2);

        let result = apply_hunks(current, &diff.hunks, &[true, false]).unwrap();
        assert_eq!(result, "ONE\ntwo\nthree\nfour\n");
        let result = apply_hunks(current, &diff.hunks, &[false, true]).unwrap();
        assert_eq!(result, "one\ntwo\nthree\nFOUR\n");
    }

    #[test]
    fn missing_trailing_newline_is_tracked() {
        let diff = generate_hunks("a\nb", "a\nb\n", "f");
        assert!(diff.render().contains("\\ No newline at end of file"));
        let result = apply_hunks("a\nb", &diff.hunks, &[true]).unwrap();
        assert_eq!(result, "a\nb\n");
    }

    #[test]
    fn selection_length_is_checked() {
        let diff = generate_hunks("a\n", "b\n", "f");
        assert_eq!(
            apply_hunks("a\n", &diff.hunks, &[]),
            Err(DiffError::SelectionMismatch { hunks: 1, selected: 0 })
        );
    }

    #[test]
    fn stale_hunk_is_rejected() {
        let diff = generate_hunks("a\nb\n", "a\nc\n", "f");
        let err = apply_hunks("a\nx\n", &diff.hunks, &[true]).unwrap_err();
        assert!(matches!(err, DiffError::ContextMismatch { .. }));
    }

    #[test]
    fn out_of_range_hunk_is_rejected() {
        let diff = generate_hunks("a\nb\nc\n", "a\nb\nC\n", "f");
        let err = apply_hunks("a\n", &diff.hunks, &[false]).unwrap_err();
        assert!(matches!(err, DiffError::OutOfRange { .. }));
    }

    fn text() -> impl Strategy<Value = String> {
        prop::collection::vec("[abc]{0,3}", 0..8).prop_map(|lines| {
            let mut s = lines.join("\n");
            if !s.is_empty() {
                s.push('\n');
            }
            s
        })
    }

    proptest! {
        #[test]
        fn accepting_every_hunk_yields_updated(a in text(), b in text()) {
            let diff = generate_hunks(&a, &b, "p");
            let all = vec![true; diff.hunks.len()];
            prop_assert_eq!(apply_hunks(&a, &diff.hunks, &all).unwrap(), b);
        }

        #[test]
        fn rejecting_every_hunk_yields_current(a in text(), b in text()) {
            let diff = generate_hunks(&a, &b, "p");
            let none = vec![false; diff.hunks.len()];
            prop_assert_eq!(apply_hunks(&a, &diff.hunks, &none).unwrap(), a);
        }
    }
}
