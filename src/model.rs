use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Pipeline tree ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HeadingLevel {
    Work,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    H7,
    H8,
}

impl HeadingLevel {
    /// Level of a section nested `depth` sections below its work (1-based).
    pub fn from_depth(depth: usize) -> Option<Self> {
        Some(match depth {
            1 => Self::H1,
            2 => Self::H2,
            3 => Self::H3,
            4 => Self::H4,
            5 => Self::H5,
            6 => Self::H6,
            7 => Self::H7,
            8 => Self::H8,
            _ => return None,
        })
    }

    pub fn depth(self) -> u8 {
        match self {
            Self::Work => 0,
            Self::H1 => 1,
            Self::H2 => 2,
            Self::H3 => 3,
            Self::H4 => 4,
            Self::H5 => 5,
            Self::H6 => 6,
            Self::H7 => 7,
            Self::H8 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    pub level: HeadingLevel,
    pub toc_text: String,
    pub fmt_text: String,
    pub pages: Vec<i32>,
    pub fn_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Paragraph {
    pub fmt_text: String,
    pub pages: Vec<i32>,
    pub fn_refs: Vec<String>,
    pub summary_ref: Option<String>,
}

impl Paragraph {
    pub fn new(fmt_text: String) -> Self {
        Self {
            fmt_text,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: Heading,
    pub paragraphs: Vec<Paragraph>,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Footnote {
    pub reference: String,
    pub fmt_text: String,
    pub pages: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub reference: String,
    pub fmt_text: String,
    pub pages: Vec<i32>,
    pub fn_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Work {
    pub heading: Heading,
    pub year: Option<String>,
    pub paragraphs: Vec<Paragraph>,
    pub sections: Vec<Section>,
    pub footnotes: Vec<Footnote>,
    pub summaries: Vec<Summary>,
}

impl Work {
    /// Every heading and paragraph fmt text in reading order.
    pub fn visit_texts<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        f(&self.heading.fmt_text);
        for p in &self.paragraphs {
            f(&p.fmt_text);
        }
        fn walk<'a>(sections: &'a [Section], f: &mut impl FnMut(&'a str)) {
            for s in sections {
                f(&s.heading.fmt_text);
                for p in &s.paragraphs {
                    f(&p.fmt_text);
                }
                walk(&s.sections, f);
            }
        }
        walk(&self.sections, f);
    }

    /// Smallest and largest page over headings and paragraphs.
    pub fn page_range(&self) -> Option<(i32, i32)> {
        let mut range: Option<(i32, i32)> = None;
        let mut take = |pages: &[i32]| {
            for &p in pages {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(p), hi.max(p)),
                    None => (p, p),
                });
            }
        };
        take(&self.heading.pages);
        for p in &self.paragraphs {
            take(&p.pages);
        }
        fn walk(sections: &[Section], take: &mut impl FnMut(&[i32])) {
            for s in sections {
                take(&s.heading.pages);
                for p in &s.paragraphs {
                    take(&p.pages);
                }
                walk(&s.sections, take);
            }
        }
        walk(&self.sections, &mut take);
        range
    }

    pub fn references_footnote(&self, reference: &str) -> bool {
        let mut found = false;
        self.visit_texts(&mut |text| {
            if !found {
                found = crate::markup::fn_refs(text).iter().any(|r| r == reference);
            }
        });
        found
    }
}

// ── Persisted documents ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Heading,
    Paragraph,
    Footnote,
    Summary,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::Heading,
        ContentKind::Paragraph,
        ContentKind::Footnote,
        ContentKind::Summary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Paragraph => "paragraph",
            Self::Footnote => "footnote",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown content kind '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexNumberPair {
    pub i: usize,
    pub num: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub kind: ContentKind,
    pub ordinal: i32,
    pub work_code: String,
    pub fmt_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toc_text: Option<String>,
    pub search_text: String,
    pub pages: Vec<i32>,
    pub page_by_index: Vec<IndexNumberPair>,
    pub line_by_index: Vec<IndexNumberPair>,
    pub word_index_map: BTreeMap<usize, usize>,
    pub fn_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_ref: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionOutline {
    pub heading: i32,
    pub paragraphs: Vec<i32>,
    pub sections: Vec<SectionOutline>,
}

/// A work as persisted: metadata plus the ordinals of its tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRecord {
    pub code: String,
    pub siglum: Option<String>,
    pub title: String,
    pub year: Option<String>,
    pub ordinal: i32,
    pub volume_number: i32,
    pub paragraphs: Vec<i32>,
    pub sections: Vec<SectionOutline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRef {
    pub code: String,
    pub siglum: Option<String>,
    pub title: String,
    pub year: Option<String>,
    pub ordinal: i32,
}

impl From<&WorkRecord> for WorkRef {
    fn from(w: &WorkRecord) -> Self {
        Self {
            code: w.code.clone(),
            siglum: w.siglum.clone(),
            title: w.title.clone(),
            year: w.year.clone(),
            ordinal: w.ordinal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub volume_number: i32,
    pub title: String,
    pub works: Vec<WorkRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_serializes_camel_case() {
        let c = Content {
            kind: ContentKind::Footnote,
            ordinal: 2,
            work_code: "GMS".into(),
            fmt_text: "x".into(),
            toc_text: None,
            search_text: "x".into(),
            pages: vec![2],
            page_by_index: vec![],
            line_by_index: vec![],
            word_index_map: BTreeMap::from([(0, 0)]),
            fn_refs: vec![],
            summary_ref: None,
            reference: Some("2.5".into()),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["kind"], "footnote");
        assert_eq!(json["workCode"], "GMS");
        assert_eq!(json["ref"], "2.5");
        assert!(json.get("tocText").is_none());
        assert_eq!(json["wordIndexMap"]["0"], 0);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ContentKind::ALL {
            assert_eq!(kind.as_str().parse::<ContentKind>(), Ok(kind));
        }
        assert!("work".parse::<ContentKind>().is_err());
    }

    #[test]
    fn heading_level_depths() {
        assert_eq!(HeadingLevel::from_depth(2), Some(HeadingLevel::H2));
        assert_eq!(HeadingLevel::from_depth(9), None);
        assert_eq!(HeadingLevel::H8.depth(), 8);
    }
}
