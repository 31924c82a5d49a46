//! Stitched works → ordinals, persisted work records and content documents.

use std::collections::HashSet;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::VolumeMetadata;
use crate::error::UploadError;
use crate::markup;
use crate::model::{
    Content, ContentKind, Footnote, Heading, Paragraph, Section, SectionOutline, Summary, Volume,
    Work, WorkRecord, WorkRef,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Flattened {
    pub volume: Volume,
    pub works: Vec<WorkRecord>,
    pub contents: Vec<Content>,
}

pub fn flatten(
    meta: &VolumeMetadata,
    works: Vec<Work>,
    cancel: &CancelToken,
) -> Result<Flattened, UploadError> {
    let mut records = Vec::with_capacity(works.len());
    let mut contents = Vec::new();

    for (i, work) in works.iter().enumerate() {
        cancel.check()?;
        let work_meta = meta
            .works
            .get(i)
            .ok_or(UploadError::MissingWorkMetadata {
                volume: meta.volume_number,
                ordinal: i + 1,
            })?;

        let mut emitter = Emitter::new(&work_meta.code, work);
        emitter.footnotes_of(&work.heading.fn_refs)?;
        let mut paragraphs = emitter.paragraphs(&work.paragraphs)?;
        let mut sections = work
            .sections
            .iter()
            .map(|s| emitter.section(s))
            .collect::<Result<Vec<_>, _>>()?;
        emitter.flush(None)?;

        let ordinals = emitter.renumber();
        renumber_all(&mut paragraphs, &ordinals);
        for section in &mut sections {
            renumber_outline(section, &ordinals);
        }
        debug!(work = %work_meta.code, docs = emitter.contents.len(), "flattened work");
        contents.extend(emitter.contents);

        records.push(WorkRecord {
            code: work_meta.code.clone(),
            siglum: work_meta.siglum.clone(),
            title: work_meta
                .title
                .clone()
                .unwrap_or_else(|| work.heading.toc_text.clone()),
            year: work_meta.year.clone().or_else(|| work.year.clone()),
            ordinal: i as i32 + 1,
            volume_number: meta.volume_number,
            paragraphs,
            sections,
        });
    }

    Ok(Flattened {
        volume: Volume {
            volume_number: meta.volume_number,
            title: meta.title.clone(),
            works: records.iter().map(WorkRef::from).collect(),
        },
        works: records,
        contents,
    })
}

enum Pending<'a> {
    Footnote(&'a Footnote),
    Summary(&'a Summary),
}

impl Pending<'_> {
    fn pages(&self) -> &[i32] {
        match self {
            Pending::Footnote(f) => &f.pages,
            Pending::Summary(s) => &s.pages,
        }
    }
}

struct Emitter<'a> {
    code: &'a str,
    work: &'a Work,
    next_ordinal: i32,
    placed: HashSet<&'a str>,
    /// Notes no text points to, emitted by page position.
    pending: Vec<Pending<'a>>,
    contents: Vec<Content>,
}

impl<'a> Emitter<'a> {
    fn new(code: &'a str, work: &'a Work) -> Self {
        let mut referenced: HashSet<&str> = HashSet::new();
        let mut linked: HashSet<&str> = HashSet::new();
        referenced.extend(work.heading.fn_refs.iter().map(String::as_str));
        visit_paragraphs(&work.paragraphs, &work.sections, &mut |p| {
            referenced.extend(p.fn_refs.iter().map(String::as_str));
            if let Some(r) = &p.summary_ref {
                linked.insert(r.as_str());
            }
        });
        visit_headings(&work.sections, &mut |h| {
            referenced.extend(h.fn_refs.iter().map(String::as_str));
        });
        for s in &work.summaries {
            if linked.contains(s.reference.as_str()) {
                referenced.extend(s.fn_refs.iter().map(String::as_str));
            }
        }

        let mut pending: Vec<Pending> = work
            .footnotes
            .iter()
            .filter(|f| !referenced.contains(f.reference.as_str()))
            .map(Pending::Footnote)
            .chain(
                work.summaries
                    .iter()
                    .filter(|s| !linked.contains(s.reference.as_str()))
                    .map(Pending::Summary),
            )
            .collect();
        pending.sort_by_key(|p| p.pages().first().copied().unwrap_or(0));

        Self {
            code,
            work,
            next_ordinal: 1,
            placed: HashSet::new(),
            pending,
            contents: Vec::new(),
        }
    }

    fn section(&mut self, section: &'a Section) -> Result<SectionOutline, UploadError> {
        let heading = self.heading(&section.heading)?;
        self.footnotes_of(&section.heading.fn_refs)?;
        let paragraphs = self.paragraphs(&section.paragraphs)?;
        let sections = section
            .sections
            .iter()
            .map(|s| self.section(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SectionOutline {
            heading,
            paragraphs,
            sections,
        })
    }

    fn paragraphs(&mut self, paragraphs: &'a [Paragraph]) -> Result<Vec<i32>, UploadError> {
        let work = self.work;
        let mut ordinals = Vec::with_capacity(paragraphs.len());
        for p in paragraphs {
            if let Some(summary) = p
                .summary_ref
                .as_deref()
                .and_then(|r| work.summaries.iter().find(|s| s.reference == r))
            {
                self.summary(summary)?;
                self.footnotes_of(&summary.fn_refs)?;
            }
            self.flush(p.pages.last().copied())?;
            ordinals.push(self.push(Doc {
                kind: ContentKind::Paragraph,
                fmt_text: &p.fmt_text,
                toc_text: None,
                pages: &p.pages,
                fn_refs: &p.fn_refs,
                summary_ref: p.summary_ref.as_deref(),
                reference: None,
            })?);
            self.footnotes_of(&p.fn_refs)?;
        }
        Ok(ordinals)
    }

    fn heading(&mut self, h: &'a Heading) -> Result<i32, UploadError> {
        self.flush(h.pages.last().copied())?;
        self.push(Doc {
            kind: ContentKind::Heading,
            fmt_text: &h.fmt_text,
            toc_text: Some(&h.toc_text),
            pages: &h.pages,
            fn_refs: &h.fn_refs,
            summary_ref: None,
            reference: None,
        })
    }

    fn summary(&mut self, s: &'a Summary) -> Result<i32, UploadError> {
        self.flush(s.pages.last().copied())?;
        self.push(Doc {
            kind: ContentKind::Summary,
            fmt_text: &s.fmt_text,
            toc_text: None,
            pages: &s.pages,
            fn_refs: &s.fn_refs,
            summary_ref: None,
            reference: Some(&s.reference),
        })
    }

    fn footnote(&mut self, f: &'a Footnote) -> Result<i32, UploadError> {
        self.placed.insert(&f.reference);
        self.push(Doc {
            kind: ContentKind::Footnote,
            fmt_text: &f.fmt_text,
            toc_text: None,
            pages: &f.pages,
            fn_refs: &[],
            summary_ref: None,
            reference: Some(&f.reference),
        })
    }

    /// Places every not yet placed footnote named in `refs`.
    fn footnotes_of(&mut self, refs: &'a [String]) -> Result<(), UploadError> {
        let work = self.work;
        for r in refs {
            if self.placed.contains(r.as_str()) {
                continue;
            }
            match work.footnotes.iter().find(|f| &f.reference == r) {
                Some(f) => {
                    self.footnote(f)?;
                }
                None => debug!(work = self.code, reference = %r, "referenced footnote not in work"),
            }
        }
        Ok(())
    }

    /// Emits pending notes that end before `page`; all of them when `None`.
    fn flush(&mut self, page: Option<i32>) -> Result<(), UploadError> {
        while let Some(next) = self.pending.first() {
            let last = next.pages().last().copied().unwrap_or(0);
            if page.is_some_and(|p| last >= p) {
                break;
            }
            match self.pending.remove(0) {
                Pending::Footnote(f) => {
                    if !self.placed.contains(f.reference.as_str()) {
                        self.footnote(f)?;
                    }
                }
                Pending::Summary(s) => {
                    self.summary(s)?;
                    self.footnotes_of(&s.fn_refs)?;
                }
            }
        }
        Ok(())
    }

    /// Moves documents whose last page lies before an earlier document's
    /// last page up front, keeping reading order otherwise, and assigns the
    /// final ordinals. Index `i` of the result holds the final ordinal of
    /// provisional ordinal `i + 1`.
    fn renumber(&mut self) -> Vec<i32> {
        self.contents
            .sort_by_key(|c| c.pages.iter().max().copied().unwrap_or(0));
        let mut ordinals = vec![0; self.contents.len()];
        for (i, c) in self.contents.iter_mut().enumerate() {
            let ordinal = i as i32 + 1;
            ordinals[(c.ordinal - 1) as usize] = ordinal;
            c.ordinal = ordinal;
        }
        ordinals
    }

    fn push(&mut self, doc: Doc<'_>) -> Result<i32, UploadError> {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.contents.push(doc.into_content(self.code, ordinal)?);
        Ok(ordinal)
    }
}

struct Doc<'d> {
    kind: ContentKind,
    fmt_text: &'d str,
    toc_text: Option<&'d str>,
    pages: &'d [i32],
    fn_refs: &'d [String],
    summary_ref: Option<&'d str>,
    reference: Option<&'d str>,
}

impl Doc<'_> {
    fn into_content(self, work_code: &str, ordinal: i32) -> Result<Content, UploadError> {
        let search_text = markup::remove_tags(self.fmt_text);
        let word_index_map = markup::word_index_map(&search_text, self.fmt_text)
            .ok_or_else(|| UploadError::WordIndexMismatch(search_text.clone()))?;
        Ok(Content {
            kind: self.kind,
            ordinal,
            work_code: work_code.to_string(),
            fmt_text: self.fmt_text.to_string(),
            toc_text: self.toc_text.map(str::to_string),
            page_by_index: markup::page_by_index(self.fmt_text),
            line_by_index: markup::line_by_index(self.fmt_text),
            search_text,
            pages: self.pages.to_vec(),
            word_index_map,
            fn_refs: self.fn_refs.to_vec(),
            summary_ref: self.summary_ref.map(str::to_string),
            reference: self.reference.map(str::to_string),
        })
    }
}

fn renumber_all(provisional: &mut [i32], ordinals: &[i32]) {
    for o in provisional {
        *o = ordinals[(*o - 1) as usize];
    }
}

fn renumber_outline(outline: &mut SectionOutline, ordinals: &[i32]) {
    outline.heading = ordinals[(outline.heading - 1) as usize];
    renumber_all(&mut outline.paragraphs, ordinals);
    for s in &mut outline.sections {
        renumber_outline(s, ordinals);
    }
}

fn visit_paragraphs<'a>(
    paragraphs: &'a [Paragraph],
    sections: &'a [Section],
    f: &mut impl FnMut(&'a Paragraph),
) {
    paragraphs.iter().for_each(&mut *f);
    for s in sections {
        visit_paragraphs(&s.paragraphs, &s.sections, f);
    }
}

fn visit_headings<'a>(sections: &'a [Section], f: &mut impl FnMut(&'a Heading)) {
    for s in sections {
        f(&s.heading);
        visit_headings(&s.sections, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkMetadata;
    use crate::model::HeadingLevel;

    fn meta(codes: &[&str]) -> VolumeMetadata {
        VolumeMetadata {
            volume_number: 4,
            title: "Band 4".into(),
            works: codes
                .iter()
                .map(|c| WorkMetadata {
                    code: c.to_string(),
                    siglum: None,
                    year: Some("1785".into()),
                    title: None,
                })
                .collect(),
        }
    }

    fn heading(level: HeadingLevel, text: &str, pages: Vec<i32>) -> Heading {
        Heading {
            level,
            toc_text: text.into(),
            fmt_text: text.into(),
            pages,
            fn_refs: vec![],
        }
    }

    fn para(text: &str, pages: Vec<i32>, fn_refs: &[&str]) -> Paragraph {
        Paragraph {
            fmt_text: text.into(),
            pages,
            fn_refs: fn_refs.iter().map(|s| s.to_string()).collect(),
            summary_ref: None,
        }
    }

    fn work() -> Work {
        Work {
            heading: heading(HeadingLevel::Work, "Werk", vec![1]),
            year: Some("1700".into()),
            paragraphs: vec![para("Einleitung", vec![1], &[])],
            sections: vec![Section {
                heading: heading(HeadingLevel::H1, "Erster Abschnitt", vec![2]),
                paragraphs: vec![
                    para("Text <ks-meta-fnref>2.1</ks-meta-fnref>", vec![2], &["2.1"]),
                    para("Mehr", vec![3], &[]),
                ],
                sections: vec![],
            }],
            footnotes: vec![
                Footnote {
                    reference: "2.1".into(),
                    fmt_text: "Anm.".into(),
                    pages: vec![2],
                },
                Footnote {
                    reference: "2.9".into(),
                    fmt_text: "Lose".into(),
                    pages: vec![2],
                },
            ],
            summaries: vec![],
        }
    }

    #[test]
    fn ordinals_follow_reading_order() {
        let flat = flatten(&meta(&["GMS"]), vec![work()], &CancelToken::new()).unwrap();
        let order: Vec<_> = flat
            .contents
            .iter()
            .map(|c| (c.ordinal, c.kind, c.search_text.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, ContentKind::Paragraph, "Einleitung"),
                (2, ContentKind::Heading, "Erster Abschnitt"),
                (3, ContentKind::Paragraph, "Text"),
                (4, ContentKind::Footnote, "Anm."),
                (5, ContentKind::Footnote, "Lose"),
                (6, ContentKind::Paragraph, "Mehr"),
            ]
        );
        let record = &flat.works[0];
        assert_eq!(record.paragraphs, vec![1]);
        assert_eq!(record.sections[0].heading, 2);
        assert_eq!(record.sections[0].paragraphs, vec![3, 6]);
        assert_eq!(record.title, "Werk");
        assert_eq!(record.year.as_deref(), Some("1785"));
        assert_eq!(flat.volume.works[0].code, "GMS");
    }

    #[test]
    fn linked_summary_precedes_paragraph() {
        let mut w = work();
        w.summaries.push(Summary {
            reference: "3.1".into(),
            fmt_text: "Inhalt".into(),
            pages: vec![3],
            fn_refs: vec![],
        });
        w.sections[0].paragraphs[1].summary_ref = Some("3.1".into());
        let flat = flatten(&meta(&["GMS"]), vec![w], &CancelToken::new()).unwrap();
        let kinds: Vec<_> = flat.contents.iter().map(|c| c.kind).collect();
        assert_eq!(kinds[5], ContentKind::Summary);
        assert_eq!(kinds[6], ContentKind::Paragraph);
        assert_eq!(flat.contents[6].summary_ref.as_deref(), Some("3.1"));
    }

    #[test]
    fn footnote_from_earlier_page_precedes_spanning_paragraph() {
        let mut w = work();
        w.sections[0].paragraphs[0].pages = vec![2, 3];
        let flat = flatten(&meta(&["GMS"]), vec![w], &CancelToken::new()).unwrap();
        let order: Vec<_> = flat
            .contents
            .iter()
            .map(|c| (c.ordinal, c.kind, c.search_text.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, ContentKind::Paragraph, "Einleitung"),
                (2, ContentKind::Heading, "Erster Abschnitt"),
                (3, ContentKind::Footnote, "Lose"),
                (4, ContentKind::Footnote, "Anm."),
                (5, ContentKind::Paragraph, "Text"),
                (6, ContentKind::Paragraph, "Mehr"),
            ]
        );
        let section = &flat.works[0].sections[0];
        assert_eq!(section.heading, 2);
        assert_eq!(section.paragraphs, vec![5, 6]);
        assert_eq!(flat.works[0].paragraphs, vec![1]);
    }

    #[test]
    fn missing_metadata_for_second_work() {
        let err = flatten(&meta(&["GMS"]), vec![work(), work()], &CancelToken::new()).unwrap_err();
        assert_eq!(
            err,
            UploadError::MissingWorkMetadata {
                volume: 4,
                ordinal: 2
            }
        );
    }

    #[test]
    fn cancelled_before_work() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            flatten(&meta(&["GMS"]), vec![work()], &token).unwrap_err(),
            UploadError::Cancelled
        );
    }
}
