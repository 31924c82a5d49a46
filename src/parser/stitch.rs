//! Attaches volume-level footnotes and summaries to their works and links
//! summaries to the paragraph they introduce.

use tracing::debug;

use super::metadata::ref_parts;
use super::tree::Mapped;
use crate::error::UploadError;
use crate::markup;
use crate::model::{Paragraph, Section, Summary, Work};

pub fn stitch(mapped: Mapped) -> Result<Vec<Work>, UploadError> {
    let Mapped {
        mut works,
        footnotes,
        summaries,
    } = mapped;

    let ranges = page_ranges(&works)?;

    let mut unassigned = Vec::new();
    for footnote in footnotes {
        let candidates = candidates(&ranges, &footnote.pages);
        let target = candidates
            .iter()
            .copied()
            .find(|&i| works[i].references_footnote(&footnote.reference))
            .or_else(|| candidates.first().copied())
            .or_else(|| {
                works
                    .iter()
                    .position(|w| w.references_footnote(&footnote.reference))
            });
        match target {
            Some(i) => works[i].footnotes.push(footnote),
            None => unassigned.push(footnote.reference),
        }
    }
    if !unassigned.is_empty() {
        return Err(UploadError::UnassignedFootnotes(unassigned));
    }

    let mut leftover = Vec::new();
    for summary in summaries {
        match candidates(&ranges, &summary.pages).first() {
            Some(&i) => works[i].summaries.push(summary),
            None => leftover.push(summary.reference),
        }
    }
    if !leftover.is_empty() {
        debug!(refs = ?leftover, "summaries outside every work");
    }

    for work in &mut works {
        link_summaries(work);
    }
    Ok(works)
}

fn page_ranges(works: &[Work]) -> Result<Vec<(i32, i32)>, UploadError> {
    let mut ranges = Vec::with_capacity(works.len());
    let mut prev_max: Option<i32> = None;
    for (i, work) in works.iter().enumerate() {
        let (min, max) = work.page_range().unwrap_or((1, 1));
        if let Some(prev_max) = prev_max {
            if min < prev_max {
                return Err(UploadError::OverlappingWorks {
                    work: i + 1,
                    prev_max_page: prev_max,
                    min_page: min,
                });
            }
        }
        prev_max = Some(max);
        ranges.push((min, max));
    }
    Ok(ranges)
}

/// Works whose page range contains all of `pages`.
fn candidates(ranges: &[(i32, i32)], pages: &[i32]) -> Vec<usize> {
    let (Some(&first), Some(&last)) = (pages.first(), pages.last()) else {
        return Vec::new();
    };
    ranges
        .iter()
        .enumerate()
        .filter(|(_, &(min, max))| first >= min && last <= max)
        .map(|(i, _)| i)
        .collect()
}

// ── Summary → paragraph ──

enum Start {
    Found(usize),
    MidParagraph,
    Missing,
}

fn link_summaries(work: &mut Work) {
    let Work {
        paragraphs,
        sections,
        summaries,
        ..
    } = work;
    let mut all: Vec<&mut Paragraph> = paragraphs.iter_mut().collect();
    collect_paragraphs(sections, &mut all);

    for summary in summaries.iter_mut() {
        let (page, line) = ref_parts(&summary.reference);
        match find_start(&all, page, line) {
            Start::Found(i) => {
                all[i].summary_ref = Some(summary.reference.clone());
                prepend_page(summary, page, line);
            }
            Start::MidParagraph => {
                debug!(summary = %summary.reference, "summary starts mid-paragraph, not linked")
            }
            Start::Missing => {
                debug!(summary = %summary.reference, "no paragraph for summary, not linked")
            }
        }
    }
}

fn collect_paragraphs<'a>(sections: &'a mut [Section], out: &mut Vec<&'a mut Paragraph>) {
    for s in sections {
        out.extend(s.paragraphs.iter_mut());
        collect_paragraphs(&mut s.sections, out);
    }
}

fn find_start(paragraphs: &[&mut Paragraph], page: i32, line: i32) -> Start {
    let page_tag = markup::page(page);
    let line_tag = markup::line(line);
    for (i, p) in paragraphs.iter().enumerate() {
        if !p.pages.contains(&page) {
            continue;
        }
        let text = &p.fmt_text;
        let page_at = text.find(&page_tag).unwrap_or(0);
        let Some(rel) = text[page_at..].find(&line_tag) else {
            continue;
        };
        let end = page_at + rel + line_tag.len();
        return if markup::remove_tags(&text[..end]).is_empty() {
            Start::Found(i)
        } else {
            Start::MidParagraph
        };
    }
    Start::Missing
}

/// A summary starting on line 1 carries its own page tag so it can be shown
/// without the paragraph.
fn prepend_page(summary: &mut Summary, page: i32, line: i32) {
    let tag = markup::page(page);
    if line == 1 && !summary.fmt_text.contains(&tag) {
        summary.fmt_text.insert_str(0, &tag);
    }
}
