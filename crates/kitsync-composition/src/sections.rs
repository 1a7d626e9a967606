//! Markdown section boundaries for owned-section merges

use crate::diff::Hunk;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

/// Heading-delimited region of a markdown document
///
/// Lines are 0-based; `end_line` is exclusive. A section runs until the next
/// heading of the same or a higher level, so nested subsections belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub level: u8,
    pub start_line: usize,
    pub end_line: usize,
}

impl Section {
    fn contains_edit(&self, hunk: &Hunk) -> bool {
        let begin = hunk.old_begin();
        if hunk.is_insertion() {
            self.start_line < begin && begin <= self.end_line
        } else {
            self.start_line <= begin && begin + hunk.old_lines <= self.end_line
        }
    }
}

fn heading_rank(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Strip `#` markers and surrounding whitespace from a section name
#[must_use]
pub fn section_key(name: &str) -> &str {
    name.trim().trim_start_matches('#').trim()
}

/// All heading sections of `text`, in document order
#[must_use]
pub fn markdown_sections(text: &str) -> Vec<Section> {
    let line_of = |offset: usize| text[..offset].matches('\n').count();
    let total_lines = text.split_inclusive('\n').count();

    let mut headings: Vec<(String, u8, usize)> = Vec::new();
    let mut current: Option<(u8, usize, String)> = None;
    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some((heading_rank(level), line_of(range.start), String::new()));
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, title)) = current.as_mut() {
                    title.push_str(&t);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, line, title)) = current.take() {
                    headings.push((title.trim().to_string(), level, line));
                }
            }
            _ => {}
        }
    }

    headings
        .iter()
        .enumerate()
        .map(|(i, (title, level, line))| {
            let end_line = headings[i + 1..]
                .iter()
                .find(|(_, next_level, _)| next_level <= level)
                .map_or(total_lines, |(_, _, next_line)| *next_line);
            Section {
                title: title.clone(),
                level: *level,
                start_line: *line,
                end_line,
            }
        })
        .collect()
}

/// Decide which hunks a smart merge may take
///
/// With owned sections, hunks that fall entirely inside one of them are
/// accepted. Without any, only pure insertions are accepted so nothing the
/// user wrote is removed.
#[must_use]
pub fn select_owned_hunks(current: &str, hunks: &[Hunk], owned: &[String]) -> Vec<bool> {
    if owned.is_empty() {
        return hunks.iter().map(Hunk::is_insertion).collect();
    }
    let sections: Vec<Section> = markdown_sections(current)
        .into_iter()
        .filter(|s| owned.iter().any(|o| section_key(o) == s.title))
        .collect();
    hunks
        .iter()
        .map(|hunk| sections.iter().any(|s| s.contains_edit(hunk)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{apply_hunks, generate_hunks};
    use pretty_assertions::assert_eq;

    const DOC: &str = "# Title\nintro\n## Rules\nr1\n### Detail\nd1\n## Notes\nn1\n";

    #[test]
    fn sections_nest_until_same_level() {
        let sections = markdown_sections(DOC);
        let titles: Vec<_> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Title", "Rules", "Detail", "Notes"]);

        let rules = &sections[1];
        assert_eq!((rules.start_line, rules.end_line), (2, 6));
        assert_eq!(sections[0].end_line, 8);
    }

    #[test]
    fn only_owned_section_edits_are_taken() {
        let updated = "# Title\nINTRO\n## Rules\nr1\nr2\n### Detail\nd1\n## Notes\nN1\n";
        let diff = generate_hunks(DOC, updated, "doc.md");
        let accepted = select_owned_hunks(DOC, &diff.hunks, &["## Rules".to_string()]);
        let merged = apply_hunks(DOC, &diff.hunks, &accepted).unwrap();
        assert_eq!(merged, "# Title\nintro\n## Rules\nr1\nr2\n### Detail\nd1\n## Notes\nn1\n");
    }

    #[test]
    fn without_owned_sections_only_insertions_pass() {
        let updated = "# Title\nINTRO\nextra\n## Rules\nr1\n### Detail\nd1\n## Notes\nn1\n";
        let diff = generate_hunks(DOC, updated, "doc.md");
        let accepted = select_owned_hunks(DOC, &diff.hunks, &[]);
        assert!(accepted.iter().any(|a| !a));
        for (hunk, take) in diff.hunks.iter().zip(&accepted) {
            assert_eq!(*take, hunk.is_insertion());
        }
    }

    #[test]
    fn section_key_strips_markers() {
        assert_eq!(section_key("  ## Rules "), "Rules");
        assert_eq!(section_key("Rules"), "Rules");
    }
}
