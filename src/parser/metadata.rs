//! Page lists and footnote references for every text of the mapped tree.

use super::tree::Mapped;
use crate::error::UploadError;
use crate::markup;
use crate::model::{Heading, Paragraph, Section};

pub fn extract(mapped: &mut Mapped) -> Result<(), UploadError> {
    let mut latest_page = 1;
    for work in &mut mapped.works {
        heading(&mut work.heading, &mut latest_page);
        paragraphs(&mut work.paragraphs, &mut latest_page);
        sections(&mut work.sections, &mut latest_page);
    }
    for footnote in &mut mapped.footnotes {
        footnote.pages = note_pages("footnote", &footnote.reference, &footnote.fmt_text)?;
    }
    for summary in &mut mapped.summaries {
        summary.pages = note_pages("summary", &summary.reference, &summary.fmt_text)?;
        summary.fn_refs = markup::fn_refs(&summary.fmt_text);
    }
    Ok(())
}

fn heading(h: &mut Heading, latest_page: &mut i32) {
    h.pages = text_pages(&h.fmt_text, latest_page);
    h.fn_refs = markup::fn_refs(&h.fmt_text);
}

fn paragraphs(list: &mut [Paragraph], latest_page: &mut i32) {
    for p in list {
        p.pages = text_pages(&p.fmt_text, latest_page);
        p.fn_refs = markup::fn_refs(&p.fmt_text);
    }
}

fn sections(list: &mut [Section], latest_page: &mut i32) {
    for s in list {
        heading(&mut s.heading, latest_page);
        paragraphs(&mut s.paragraphs, latest_page);
        sections(&mut s.sections, latest_page);
    }
}

/// True when real text precedes the first page tag, i.e. the text starts on
/// the page before it.
fn starts_before_first_page(fmt: &str) -> bool {
    markup::first_page_offset(fmt)
        .is_some_and(|offset| !markup::remove_tags(&fmt[..offset]).is_empty())
}

fn text_pages(fmt: &str, latest_page: &mut i32) -> Vec<i32> {
    let mut pages = markup::pages(fmt);
    match pages.first() {
        Some(&first) if starts_before_first_page(fmt) => pages.insert(0, first - 1),
        Some(_) => {}
        None => pages.push(*latest_page),
    }
    if let Some(&last) = pages.last() {
        *latest_page = (*latest_page).max(last);
    }
    pages
}

fn note_pages(kind: &str, reference: &str, fmt: &str) -> Result<Vec<i32>, UploadError> {
    let ref_page = ref_page(reference);
    let mut pages = markup::pages(fmt);
    let Some(&first) = pages.first() else {
        return Ok(vec![ref_page]);
    };
    if starts_before_first_page(fmt) {
        pages.insert(0, first - 1);
    }
    if pages[0] != ref_page {
        return Err(UploadError::PageMismatch {
            kind: kind.to_string(),
            reference: reference.to_string(),
            ref_page,
            text_page: pages[0],
        });
    }
    Ok(pages)
}

/// Page part of a `page.nr` / `page.line` reference.
pub fn ref_page(reference: &str) -> i32 {
    ref_parts(reference).0
}

pub fn ref_parts(reference: &str) -> (i32, i32) {
    let mut parts = reference.split('.').map(|p| p.parse().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
