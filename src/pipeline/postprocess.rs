//! Deterministic cleanup of assembled Markdown.
//!
//! Adapters extract text from very different sources (PDF text runs, Word
//! runs, spreadsheet cells) and each leaks its own artefacts: CRLF from
//! cell values, ligature glyphs and form feeds from PDF fonts, zero-width
//! joiners, and runs of blank lines where suppressed headers used to sit.
//!
//! Cleanup is two passes: a character pass ([`normalise_chars`]) and a line
//! pass ([`normalise_lines`]). Both are idempotent, so the per-unit output
//! and the joined document can be cleaned independently.

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters dropped outright.
const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];

/// Presentation-form ligatures PDF fonts emit instead of letter pairs.
const LIGATURES: [(char, &str); 7] = [
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} \S").unwrap());

/// Clean assembled Markdown; the result always ends with exactly one
/// newline.
pub fn clean_markdown(input: &str) -> String {
    normalise_lines(&normalise_chars(input))
}

/// Line endings to LF, form feeds to line breaks, no-break spaces to
/// spaces, ligatures expanded, invisible characters removed.
fn normalise_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\u{000C}' => out.push('\n'),
            '\u{00A0}' | '\u{202F}' => out.push(' '),
            c if INVISIBLE.contains(&c) => {}
            c => match LIGATURES.iter().find(|(l, _)| *l == c) {
                Some((_, expanded)) => out.push_str(expanded),
                None => out.push(c),
            },
        }
    }
    out
}

/// Trim line ends, keep at most one blank line in a row, surround headings
/// with blank lines, and drop a page rule that directly repeats the
/// previous one (left behind when a whole page was suppressed).
fn normalise_lines(input: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut pending_gap = false;
    let mut previous_heading = false;

    for line in input.lines().map(str::trim_end) {
        if line.is_empty() {
            pending_gap = !lines.is_empty();
            continue;
        }
        if line == "---" && lines.last() == Some(&"---") {
            continue;
        }
        let heading = RE_HEADING.is_match(line);
        if !lines.is_empty() && (pending_gap || heading || previous_heading) {
            lines.push("");
        }
        lines.push(line);
        pending_gap = false;
        previous_heading = heading;
    }

    if lines.is_empty() {
        return "\n".to_string();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
