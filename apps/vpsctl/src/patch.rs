//! Idempotent line-oriented edits of existing config files.
//!
//! A [`Patch`] names a marker whose presence means the edit is already in place,
//! lines to strip, the text to insert, and where to insert it. The primary anchor
//! is tried first; the fallback covers files whose layout differs.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch {
    /// `key = value` directive in an INI-style file.
    Directive(&'static str),
    /// `[name]` section header.
    Section(&'static str),
    /// `name {` opening a block at brace depth zero.
    TopLevelBlock(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// After the first matching line, optionally only inside the given INI section.
    After {
        line: LineMatch,
        section: Option<&'static str>,
    },
    /// Before the first matching line.
    Before(LineMatch),
    EndOfFile,
}

#[derive(Debug, Clone)]
pub struct Patch {
    pub name: &'static str,
    pub marker: &'static str,
    pub strip: &'static [LineMatch],
    pub insert: String,
    pub anchor: Anchor,
    pub fallback: Option<Anchor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    AlreadyApplied,
    Inserted { used_fallback: bool },
    AnchorNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub text: String,
    pub outcome: PatchOutcome,
}

impl Patched {
    pub fn changed_from(&self, original: &str) -> bool {
        self.text != original
    }
}

impl Patch {
    pub fn apply(&self, original: &str) -> Patched {
        let trailing_newline = original.ends_with('\n') || original.is_empty();
        let mut lines: Vec<String> = original
            .lines()
            .filter(|line| !self.strip.iter().any(|m| matches_line(line, *m)))
            .map(str::to_string)
            .collect();

        let outcome = if lines.iter().any(|line| line.contains(self.marker)) {
            PatchOutcome::AlreadyApplied
        } else if insert_at(&mut lines, &self.insert, self.anchor) {
            PatchOutcome::Inserted {
                used_fallback: false,
            }
        } else if self
            .fallback
            .is_some_and(|fallback| insert_at(&mut lines, &self.insert, fallback))
        {
            PatchOutcome::Inserted {
                used_fallback: true,
            }
        } else {
            PatchOutcome::AnchorNotFound
        };

        let mut text = lines.join("\n");
        if trailing_newline && !text.is_empty() {
            text.push('\n');
        }
        Patched { text, outcome }
    }

    /// Applies the patch to `path` in place, writing only when the text changed.
    pub fn apply_file(&self, path: &Path) -> Result<PatchOutcome> {
        let original = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let patched = self.apply(&original);
        if patched.changed_from(&original) {
            fs::write(path, &patched.text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(patched.outcome)
    }
}

/// Whether `text` has a line matching `target`, with the same section and
/// brace-depth rules the anchors use.
pub fn contains_line(text: &str, target: LineMatch) -> bool {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    find_line(&lines, target, None).is_some()
}

fn insert_at(lines: &mut Vec<String>, insert: &str, anchor: Anchor) -> bool {
    let block: Vec<String> = insert.lines().map(str::to_string).collect();
    let index = match anchor {
        Anchor::After { line, section } => {
            find_line(lines, line, section).map(|index| index + 1)
        }
        Anchor::Before(line) => find_line(lines, line, None).map(|index| {
            // Keep a blank line between the inserted block and what follows.
            lines.splice(index..index, [String::new()]);
            index
        }),
        Anchor::EndOfFile => {
            if lines.last().is_some_and(|last| !last.trim().is_empty()) {
                lines.push(String::new());
            }
            Some(lines.len())
        }
    };
    match index {
        Some(index) => {
            lines.splice(index..index, block);
            true
        }
        None => false,
    }
}

fn find_line(lines: &[String], target: LineMatch, section: Option<&str>) -> Option<usize> {
    let mut current_section: Option<&str> = None;
    let mut depth: i64 = 0;
    for (index, line) in lines.iter().enumerate() {
        if let Some(name) = section_name(line) {
            current_section = Some(name);
        }
        let in_section = section.map_or(true, |wanted| current_section == Some(wanted));
        let at_top_level = depth == 0;
        depth += brace_delta(line);

        if !in_section {
            continue;
        }
        if let LineMatch::TopLevelBlock(_) = target {
            if !at_top_level {
                continue;
            }
        }
        if matches_line(line, target) {
            return Some(index);
        }
    }
    None
}

fn matches_line(line: &str, target: LineMatch) -> bool {
    let trimmed = line.trim();
    match target {
        LineMatch::Directive(key) => trimmed
            .split_once('=')
            .is_some_and(|(lhs, _)| lhs.trim().eq_ignore_ascii_case(key)),
        LineMatch::Section(name) => section_name(line) == Some(name),
        LineMatch::TopLevelBlock(name) => {
            let code = strip_comment(trimmed);
            code.strip_prefix(name)
                .is_some_and(|rest| rest.trim_start().starts_with('{'))
        }
    }
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn strip_comment(line: &str) -> &str {
    line.split_once('#').map_or(line, |(code, _)| code).trim()
}

fn brace_delta(line: &str) -> i64 {
    strip_comment(line).chars().fold(0, |acc, ch| match ch {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_off() -> Patch {
        Patch {
            name: "test",
            marker: "Table = off",
            strip: &[LineMatch::Directive("DNS")],
            insert: "Table = off".to_string(),
            anchor: Anchor::After {
                line: LineMatch::Directive("MTU"),
                section: Some("Interface"),
            },
            fallback: Some(Anchor::After {
                line: LineMatch::Section("Interface"),
                section: None,
            }),
        }
    }

    fn stream_block() -> Patch {
        Patch {
            name: "stream",
            marker: "# marker",
            strip: &[],
            insert: "# marker\nstream {\n}".to_string(),
            anchor: Anchor::Before(LineMatch::TopLevelBlock("http")),
            fallback: Some(Anchor::EndOfFile),
        }
    }

    #[test]
    fn directive_match_is_key_aware() {
        assert!(matches_line("DNS = 1.1.1.1", LineMatch::Directive("DNS")));
        assert!(matches_line("  dns=1.1.1.1", LineMatch::Directive("DNS")));
        assert!(!matches_line("DNSSEC = yes", LineMatch::Directive("DNS")));
        assert!(!matches_line("# DNS note", LineMatch::Directive("DNS")));
    }

    #[test]
    fn mtu_anchor_is_limited_to_its_section() {
        let text = "[Peer]\nMTU = 1\n[Interface]\nAddress = 10.0.0.2/32\nMTU = 1280\n";
        let patched = table_off().apply(text);
        assert_eq!(
            patched.text,
            "[Peer]\nMTU = 1\n[Interface]\nAddress = 10.0.0.2/32\nMTU = 1280\nTable = off\n"
        );
    }

    #[test]
    fn top_level_block_ignores_nested_and_commented_matches() {
        let text = "events {\n    http {\n}\n}\n# http {\nhttp {\n}\n";
        let patched = stream_block().apply(text);
        assert_eq!(
            patched.text,
            "events {\n    http {\n}\n}\n# http {\n# marker\nstream {\n}\n\nhttp {\n}\n"
        );
        assert_eq!(
            patched.outcome,
            PatchOutcome::Inserted {
                used_fallback: false
            }
        );
    }

    #[test]
    fn end_of_file_fallback_separates_with_blank_line() {
        let patched = stream_block().apply("worker_processes auto;");
        assert_eq!(
            patched.text,
            "worker_processes auto;\n\n# marker\nstream {\n}"
        );
        assert_eq!(
            patched.outcome,
            PatchOutcome::Inserted {
                used_fallback: true
            }
        );
    }

    #[test]
    fn missing_anchors_leave_text_alone() {
        let patch = Patch {
            fallback: None,
            ..table_off()
        };
        let patched = patch.apply("[Peer]\nEndpoint = x\n");
        assert_eq!(patched.outcome, PatchOutcome::AnchorNotFound);
        assert_eq!(patched.text, "[Peer]\nEndpoint = x\n");
    }

    #[test]
    fn contains_line_sees_only_top_level_blocks() {
        let nested = "http {\n    stream {\n    }\n}\n";
        assert!(!contains_line(nested, LineMatch::TopLevelBlock("stream")));
        assert!(contains_line(
            "# note\nstream {\n}\n",
            LineMatch::TopLevelBlock("stream")
        ));
    }

    #[test]
    fn apply_file_only_writes_on_change() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nginx.conf");
        fs::write(&path, "http {\n}\n").unwrap();

        assert_eq!(
            stream_block().apply_file(&path).unwrap(),
            PatchOutcome::Inserted {
                used_fallback: false
            }
        );
        let once = fs::read_to_string(&path).unwrap();
        assert_eq!(
            stream_block().apply_file(&path).unwrap(),
            PatchOutcome::AlreadyApplied
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), once);
        assert_eq!(once.matches("# marker").count(), 1);
    }
}
