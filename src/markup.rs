//! Neutral inline markup shared by the pipeline, the store and the index.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::IndexNumberPair;

pub const BOLD: &str = "ks-fmt-bold";
pub const EMPH: &str = "ks-fmt-emph";
pub const EMPH2: &str = "ks-fmt-emph2";
pub const TRACKED: &str = "ks-fmt-tracked";
pub const FORMULA: &str = "ks-fmt-formula";
pub const LANG: &str = "ks-meta-lang";
pub const NAME: &str = "ks-fmt-name";
pub const PAR_HEADING: &str = "ks-fmt-hpar";

pub const TABLE_PLACEHOLDER: &str = "{table-extract}";

static PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ks-meta-page>(\d+)</ks-meta-page>").unwrap());
static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ks-meta-line>(\d+)</ks-meta-line>").unwrap());
static FNREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ks-meta-fnref>(\d+\.\d+)</ks-meta-fnref>").unwrap());

/// Metadata elements vanish with their content, formatting tags only lose
/// the tag itself.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<ks-meta-(?:page|line|fnref)>[^<]*</ks-meta-(?:page|line|fnref)>|</?ks-(?:fmt|meta)-[a-z0-9]+>|\{table-extract\}",
    )
    .unwrap()
});

static TRAILING_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{P}+$").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,:;?!])").unwrap());

// ── Formatting ──

pub fn wrap(tag: &str, content: &str) -> String {
    format!("<{tag}>{content}</{tag}>")
}

pub fn page(nr: i32) -> String {
    wrap("ks-meta-page", &nr.to_string())
}

pub fn line(nr: i32) -> String {
    wrap("ks-meta-line", &nr.to_string())
}

pub fn fnref(page: i32, nr: i32) -> String {
    wrap("ks-meta-fnref", &format!("{page}.{nr}"))
}

pub fn heading(level: u8, content: &str) -> String {
    wrap(&format!("ks-fmt-h{level}"), content)
}

/// Collapses whitespace runs and removes spaces in front of punctuation.
pub fn contract(text: &str) -> String {
    let collapsed = WS_RE.replace_all(text.trim(), " ");
    SPACE_BEFORE_PUNCT_RE
        .replace_all(&collapsed, "$1")
        .into_owned()
}

// ── Extraction ──

pub fn remove_tags(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, "");
    WS_RE.replace_all(stripped.trim(), " ").into_owned()
}

pub fn pages(text: &str) -> Vec<i32> {
    numbers(&PAGE_RE, text)
}

pub fn fn_refs(text: &str) -> Vec<String> {
    FNREF_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Byte offset of the first page tag, if any.
pub fn first_page_offset(text: &str) -> Option<usize> {
    PAGE_RE.find(text).map(|m| m.start())
}

pub fn page_by_index(text: &str) -> Vec<IndexNumberPair> {
    index_pairs(&PAGE_RE, text)
}

pub fn line_by_index(text: &str) -> Vec<IndexNumberPair> {
    index_pairs(&LINE_RE, text)
}

fn numbers(re: &Regex, text: &str) -> Vec<i32> {
    re.captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

fn index_pairs(re: &Regex, text: &str) -> Vec<IndexNumberPair> {
    re.captures_iter(text)
        .filter_map(|c| {
            let start = c.get(0)?.start();
            let num = c[1].parse().ok()?;
            Some(IndexNumberPair {
                i: char_index(text, start),
                num,
            })
        })
        .collect()
}

fn char_index(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count()
}

// ── Word index ──

/// Start positions (in chars) of every word, skipping over tags so a tag
/// inside a word does not split it.
fn word_starts(text: &str, skip_tags: bool) -> Vec<usize> {
    let tags: Vec<(usize, usize)> = if skip_tags {
        TAG_RE
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect()
    } else {
        Vec::new()
    };

    let mut starts = Vec::new();
    let mut in_word = false;
    let mut tag_iter = tags.iter().peekable();
    let mut skip_until = 0;

    for (ci, (bi, c)) in text.char_indices().enumerate() {
        if bi < skip_until {
            continue;
        }
        if let Some(&&(start, end)) = tag_iter.peek() {
            if bi == start {
                skip_until = end;
                tag_iter.next();
                continue;
            }
        }
        if c.is_alphanumeric() {
            if !in_word {
                starts.push(ci);
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    starts
}

/// Maps each word start in the search text to the same word's start in the
/// formatted text. `None` when the two disagree on the number of words.
pub fn word_index_map(search_text: &str, fmt_text: &str) -> Option<BTreeMap<usize, usize>> {
    let search = word_starts(search_text, false);
    let fmt = word_starts(fmt_text, true);
    if search.len() != fmt.len() {
        return None;
    }
    Some(search.into_iter().zip(fmt).collect())
}

// ── Headings ──

pub fn remove_trailing_punctuation(text: &str) -> &str {
    match TRAILING_PUNCT_RE.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    }
}

/// Upper-cases the first letter; an all-caps title is lower-cased after it.
pub fn fix_capitalization(text: &str) -> String {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let rest: String = chars.collect();
    let all_upper = text
        .chars()
        .filter(|c| c.is_alphabetic())
        .all(char::is_uppercase);
    if all_upper {
        format!("{first}{}", rest.to_lowercase())
    } else {
        format!("{}{rest}", first.to_uppercase())
    }
}

pub fn toc_text(raw: &str) -> String {
    let stripped = remove_tags(raw);
    fix_capitalization(remove_trailing_punctuation(stripped.trim()).trim_end())
}
