//! Flat `hauptteil` children → Work / Section / Paragraph tree.

use tracing::debug;

use super::inline;
use super::xml::{Element, Node};
use crate::error::UploadError;
use crate::markup;
use crate::model::{Footnote, Heading, HeadingLevel, Paragraph, Section, Summary, Work};

/// Works of one volume plus the volume-level footnotes and summaries that
/// still need to be attached to them.
#[derive(Debug, Default)]
pub struct Mapped {
    pub works: Vec<Work>,
    pub footnotes: Vec<Footnote>,
    pub summaries: Vec<Summary>,
}

#[derive(Default)]
struct Mapper {
    works: Vec<Work>,
    /// Child indices from the current work down to the open section.
    path: Vec<usize>,
    /// Declared level of every section on `path`.
    levels: Vec<u8>,
    page_prefix: String,
    year: Option<String>,
}

pub fn map_tree(root: &Element) -> Result<Mapped, UploadError> {
    let hauptteil = root
        .find("hauptteil")
        .ok_or_else(|| UploadError::MissingElement("hauptteil".into()))?;

    let mut mapper = Mapper::default();
    for node in &hauptteil.children {
        match node {
            Node::Element(el) => mapper.element(el)?,
            Node::Text(t) if !t.trim().is_empty() => {
                debug!(text = t.trim(), "ignoring loose text in hauptteil")
            }
            _ => {}
        }
    }

    Ok(Mapped {
        works: mapper.works,
        footnotes: footnotes(root)?,
        summaries: summaries(root)?,
    })
}

impl Mapper {
    fn element(&mut self, el: &Element) -> Result<(), UploadError> {
        match el.name.as_str() {
            "h1" => self.work(el),
            "h2" | "h3" | "h4" | "h5" | "h6" | "h7" | "h8" | "h9" => {
                let declared = el.name[1..].parse::<u8>().unwrap_or(2) - 1;
                self.section(el, declared)
            }
            "hj" => {
                self.year = Some(el.text().trim().to_string());
                Ok(())
            }
            "hu" => {
                let fmt = inline::par_heading(el)?;
                self.paragraph(el, fmt)
            }
            "op" => Ok(()),
            "p" => {
                let fmt = inline::paragraph(el)?;
                self.paragraph(el, fmt)
            }
            "seite" => {
                let nr = inline::numeric_attr(el, "nr")?;
                self.page_prefix.push_str(&markup::page(nr));
                Ok(())
            }
            "table" => self.paragraph(el, markup::TABLE_PLACEHOLDER.to_string()),
            _ => Err(UploadError::UnknownTag {
                parent: "hauptteil".into(),
                tag: el.name.clone(),
            }),
        }
    }

    fn prefixed(&mut self, fmt: String) -> String {
        let mut text = std::mem::take(&mut self.page_prefix);
        text.push_str(&fmt);
        text
    }

    /// The work heading is never a document, so a pending page prefix stays
    /// for the block after it.
    fn work(&mut self, el: &Element) -> Result<(), UploadError> {
        let (fmt_text, toc) = inline::heading(el, None)?;
        self.path.clear();
        self.levels.clear();
        self.works.push(Work {
            heading: Heading {
                level: HeadingLevel::Work,
                toc_text: toc,
                fmt_text,
                pages: Vec::new(),
                fn_refs: Vec::new(),
            },
            year: self.year.clone(),
            paragraphs: Vec::new(),
            sections: Vec::new(),
            footnotes: Vec::new(),
            summaries: Vec::new(),
        });
        Ok(())
    }

    fn section(&mut self, el: &Element, declared: u8) -> Result<(), UploadError> {
        if self.works.is_empty() {
            return Err(UploadError::HeadingBeforeWork(el.name.clone()));
        }
        while self.levels.last().is_some_and(|&l| l >= declared) {
            self.levels.pop();
            self.path.pop();
        }
        let depth = self.path.len() + 1;
        let level = HeadingLevel::from_depth(depth)
            .ok_or_else(|| UploadError::HeadingBeforeWork(el.name.clone()))?;
        let (fmt, toc) = inline::heading(el, Some(level.depth()))?;
        let fmt_text = self.prefixed(fmt);

        let Some(work) = self.works.last_mut() else {
            return Err(UploadError::HeadingBeforeWork(el.name.clone()));
        };
        let siblings = children_at(&mut work.sections, &self.path);
        siblings.push(Section {
            heading: Heading {
                level,
                toc_text: toc,
                fmt_text,
                pages: Vec::new(),
                fn_refs: Vec::new(),
            },
            paragraphs: Vec::new(),
            sections: Vec::new(),
        });
        self.path.push(siblings.len() - 1);
        self.levels.push(declared);
        Ok(())
    }

    fn paragraph(&mut self, el: &Element, fmt: String) -> Result<(), UploadError> {
        if self.works.is_empty() {
            return Err(UploadError::HeadingBeforeWork(el.name.clone()));
        }
        let fmt_text = self.prefixed(fmt);
        let Some(work) = self.works.last_mut() else {
            return Err(UploadError::HeadingBeforeWork(el.name.clone()));
        };
        let paragraphs = match self.path.split_last() {
            None => &mut work.paragraphs,
            Some((&last, parent)) => &mut children_at(&mut work.sections, parent)[last].paragraphs,
        };
        paragraphs.push(Paragraph::new(fmt_text));
        Ok(())
    }
}

fn children_at<'a>(sections: &'a mut Vec<Section>, path: &[usize]) -> &'a mut Vec<Section> {
    match path.split_first() {
        Some((&i, rest)) if i < sections.len() => children_at(&mut sections[i].sections, rest),
        _ => sections,
    }
}

// ── Notes ──

fn note_elements<'a>(
    root: &'a Element,
    container: &'static str,
    item: &'static str,
) -> Result<Vec<&'a Element>, UploadError> {
    let Some(list) = root.find(container) else {
        return Ok(Vec::new());
    };
    list.elements()
        .map(|el| {
            if el.name == item {
                Ok(el)
            } else {
                Err(UploadError::UnknownTag {
                    parent: container.into(),
                    tag: el.name.clone(),
                })
            }
        })
        .collect()
}

fn footnotes(root: &Element) -> Result<Vec<Footnote>, UploadError> {
    note_elements(root, "fussnoten", "fn")?
        .into_iter()
        .map(|el| {
            let page = inline::numeric_attr(el, "seite")?;
            let nr = inline::numeric_attr(el, "nr")?;
            Ok(Footnote {
                reference: format!("{page}.{nr}"),
                fmt_text: inline::note(el)?,
                pages: Vec::new(),
            })
        })
        .collect()
}

fn summaries(root: &Element) -> Result<Vec<Summary>, UploadError> {
    note_elements(root, "randtexte", "randtext")?
        .into_iter()
        .map(|el| {
            let page = inline::numeric_attr(el, "seite")?;
            let line = inline::numeric_attr(el, "anfang")?;
            Ok(Summary {
                reference: format!("{page}.{line}"),
                fmt_text: inline::note(el)?,
                pages: Vec::new(),
                fn_refs: Vec::new(),
            })
        })
        .collect()
}
