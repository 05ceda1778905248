//! Citation linking for generated answers.
//!
//! Answers cite their sources with bare `[n]` markers. These helpers turn
//! the markers into markdown links while leaving code alone: fenced blocks
//! and inline code spans are copied through untouched, as are markers that
//! are already links (`[n](...)`).
//!
//! Code detection is line based. A fence toggles on any line whose trimmed
//! start is three backticks, and inline code is whatever sits between a pair
//! of backticks on one line. Unbalanced backticks are not special-cased.

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

use crate::message::{SourceRef, resolve_ref};

const FENCE: &str = "```";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{1,3})\](\()?").expect("citation marker pattern is valid")
});

/// Rewrite every eligible `[n]` into `[n](target)`, where `link(n)` supplies
/// the target. Markers for which `link` returns `None` stay as they are.
pub fn rewrite_citations<F>(text: &str, link: F) -> String
where
    F: Fn(u64) -> Option<String>,
{
    let mut in_fence = false;
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            if line.trim_start().starts_with(FENCE) {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                return line.to_string();
            }
            rewrite_line(line, &link)
        })
        .collect();
    lines.join("\n")
}

/// Link markers to in-page anchors: `[2]` → `[2](#source-2)`.
pub fn link_citations(text: &str) -> String {
    rewrite_citations(text, |n| Some(format!("#source-{n}")))
}

/// Link markers to the URL of the source they cite. Markers without a
/// matching source (or whose source has no URL) are left bare.
pub fn link_to_sources(text: &str, sources: &[SourceRef]) -> String {
    rewrite_citations(text, |n| {
        resolve_ref(sources, n)
            .map(|s| s.url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    })
}

fn rewrite_line<F>(line: &str, link: &F) -> String
where
    F: Fn(u64) -> Option<String>,
{
    line.split('`')
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 1 {
                segment.to_string()
            } else {
                rewrite_segment(segment, link)
            }
        })
        .collect::<Vec<_>>()
        .join("`")
}

fn rewrite_segment<F>(segment: &str, link: &F) -> String
where
    F: Fn(u64) -> Option<String>,
{
    MARKER
        .replace_all(segment, |caps: &Captures<'_>| {
            let whole = caps[0].to_string();
            if caps.get(2).is_some() {
                return whole;
            }
            let n: u64 = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return whole,
            };
            match link(n) {
                Some(target) => format!("[{n}]({target})"),
                None => whole,
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_markers_become_anchors() {
        assert_eq!(
            link_citations("Use the SDK [1] and the API [12]."),
            "Use the SDK [1](#source-1) and the API [12](#source-12)."
        );
    }

    #[test]
    fn existing_links_are_not_rewritten_twice() {
        let text = "See [1](https://x) and [2].";
        assert_eq!(link_citations(text), "See [1](https://x) and [2](#source-2).");
        assert_eq!(link_citations(&link_citations(text)), link_citations(text));
    }

    #[test]
    fn four_digit_markers_are_ignored() {
        assert_eq!(link_citations("[1234] and [0]"), "[1234] and [0](#source-0)");
    }

    #[test]
    fn fenced_blocks_are_untouched() {
        let text = "Intro [1]\n```rust\nlet a = v[1];\n```\nOutro [2]";
        assert_eq!(
            link_citations(text),
            "Intro [1](#source-1)\n```rust\nlet a = v[1];\n```\nOutro [2](#source-2)"
        );
    }

    #[test]
    fn indented_fence_still_toggles() {
        let text = "  ```\n[1]\n  ```\n[1]";
        assert_eq!(link_citations(text), "  ```\n[1]\n  ```\n[1](#source-1)");
    }

    #[test]
    fn inline_code_is_untouched() {
        assert_eq!(
            link_citations("Call `arr[1]` as shown [1]."),
            "Call `arr[1]` as shown [1](#source-1)."
        );
    }

    #[test]
    fn unbalanced_backtick_hides_rest_of_line() {
        // naive segment model: everything after a lone backtick counts as code
        assert_eq!(link_citations("a [1] ` b [2]"), "a [1](#source-1) ` b [2]");
    }

    #[test]
    fn sources_resolve_by_effective_ref() {
        let sources = vec![
            SourceRef::new("https://docs/one"),
            SourceRef {
                ref_num: Some(3),
                ..SourceRef::new("https://docs/three")
            },
        ];
        assert_eq!(
            link_to_sources("A [1], B [3], C [2].", &sources),
            "A [1](https://docs/one), B [3](https://docs/three), C [2]."
        );
    }

    #[test]
    fn line_endings_are_preserved() {
        let text = "one [1]\r\ntwo\n\nthree";
        assert_eq!(link_citations(text), "one [1](#source-1)\r\ntwo\n\nthree");
    }
}
