pub mod flatten;
pub mod inline;
pub mod metadata;
pub mod prepare;
pub mod simplify;
pub mod stitch;
pub mod tree;
pub mod xml;

use std::time::Instant;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::Corpus;
use crate::error::UploadError;
pub use flatten::Flattened;

/// Pipeline: bytes → simplified XML → tree → metadata → stitched works →
/// content documents. `volume` is the number the caller expects; without it
/// the document's `<band nr>` decides.
pub fn process_volume(
    bytes: &[u8],
    volume: Option<i32>,
    corpus: &Corpus,
    cancel: &CancelToken,
) -> Result<Flattened, UploadError> {
    let t0 = Instant::now();
    let text = prepare::replace_entities(&prepare::decode(bytes)?);
    let simplified = simplify::simplify(&text);
    cancel.check()?;

    let root = xml::parse(&simplified)?;
    let number = volume_number(&root, volume)?;
    let meta = corpus
        .volume(number)
        .ok_or(UploadError::UnknownVolume(number))?;
    cancel.check()?;

    let mut mapped = tree::map_tree(&root)?;
    debug!(volume = number, works = mapped.works.len(), "mapped tree");
    cancel.check()?;

    metadata::extract(&mut mapped)?;
    cancel.check()?;

    let works = stitch::stitch(mapped)?;
    cancel.check()?;

    let flat = flatten::flatten(meta, works, cancel)?;
    info!(
        volume = number,
        works = flat.works.len(),
        contents = flat.contents.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "processed volume"
    );
    Ok(flat)
}

fn volume_number(root: &xml::Element, expected: Option<i32>) -> Result<i32, UploadError> {
    let found = match root.find("band") {
        Some(band) if band.attr("nr").is_some() => Some(inline::numeric_attr(band, "nr")?),
        _ => None,
    };
    match (expected, found) {
        (Some(expected), Some(found)) if expected != found => {
            Err(UploadError::VolumeMismatch { expected, found })
        }
        (Some(nr), _) | (None, Some(nr)) => Ok(nr),
        (None, None) => Err(UploadError::MissingElement("band".into())),
    }
}

impl Flattened {
    /// Keeps only the records and documents of one work; the volume record
    /// still lists every work of the volume.
    pub fn only_work(mut self, code: &str) -> Option<Self> {
        self.works.retain(|w| w.code == code);
        if self.works.is_empty() {
            return None;
        }
        self.contents.retain(|c| c.work_code == code);
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentKind, HeadingLevel};

    fn corpus() -> Corpus {
        Corpus::from_json(
            r#"[{"volumeNumber": 1, "title": "Band 1",
                 "works": [{"code": "W1", "year": "1747"}, {"code": "W2", "siglum": "W 2"}]}]"#,
        )
        .unwrap()
    }

    fn run(xml: &str) -> Result<Flattened, UploadError> {
        process_volume(xml.as_bytes(), Some(1), &corpus(), &CancelToken::new())
    }

    #[test]
    fn minimal_document() {
        let flat = run(
            r#"<band nr="1"><hauptteil><seite nr="1"/><h1>Werk</h1><p>Die <fett>Vernunft</fett> ist.</p></hauptteil></band>"#,
        )
        .unwrap();
        assert_eq!(flat.works.len(), 1);
        let work = &flat.works[0];
        assert_eq!(work.code, "W1");
        assert_eq!(work.paragraphs, vec![1]);
        let p = &flat.contents[0];
        assert_eq!(p.kind, ContentKind::Paragraph);
        assert_eq!(p.ordinal, 1);
        assert_eq!(
            p.fmt_text,
            "<ks-meta-page>1</ks-meta-page>Die <ks-fmt-bold>Vernunft</ks-fmt-bold> ist."
        );
        assert_eq!(p.search_text, "Die Vernunft ist.");
        assert_eq!(p.pages, vec![1]);
        assert_eq!(p.page_by_index.len(), 1);
    }

    #[test]
    fn page_marker_before_work_heading_survives() {
        let flat = run(
            r#"<band nr="1"><hauptteil><seite nr="1"/><h1>A</h1><p>a</p><seite nr="2"/><h1>B</h1><p>b</p></hauptteil></band>"#,
        )
        .unwrap();
        let first_of = |code: &str| {
            flat.contents
                .iter()
                .find(|c| c.work_code == code && c.ordinal == 1)
                .unwrap()
        };
        let a = first_of("W1");
        assert!(a.fmt_text.starts_with("<ks-meta-page>1</ks-meta-page>"));
        assert_eq!(a.page_by_index.iter().map(|p| p.num).collect::<Vec<_>>(), vec![1]);
        let b = first_of("W2");
        assert_eq!(b.fmt_text, "<ks-meta-page>2</ks-meta-page>b");
        assert_eq!(b.page_by_index.iter().map(|p| p.num).collect::<Vec<_>>(), vec![2]);
        assert_eq!(b.pages, vec![2]);
    }

    #[test]
    fn page_prefix_lands_on_paragraph() {
        let flat = run(
            r#"<band nr="1"><hauptteil><h1>Werk</h1><seite nr="1"/><p>Die <fett>Vernunft</fett> ist.</p></hauptteil></band>"#,
        )
        .unwrap();
        let p = &flat.contents[0];
        assert_eq!(
            p.fmt_text,
            "<ks-meta-page>1</ks-meta-page>Die <ks-fmt-bold>Vernunft</ks-fmt-bold> ist."
        );
        assert_eq!(p.search_text, "Die Vernunft ist.");
        assert_eq!(p.pages, vec![1]);
    }

    #[test]
    fn footnote_placed_after_referencing_paragraph() {
        let flat = run(
            r#"<band nr="1"><hauptteil><seite nr="2"/><h1>W</h1><p>Text<fr seite="2" nr="5"/></p></hauptteil>
               <fussnoten><fn seite="2" nr="5">Anm.</fn></fussnoten></band>"#,
        )
        .unwrap();
        let kinds: Vec<_> = flat.contents.iter().map(|c| (c.ordinal, c.kind)).collect();
        assert_eq!(
            kinds,
            vec![(1, ContentKind::Paragraph), (2, ContentKind::Footnote)]
        );
        let footnote = &flat.contents[1];
        assert_eq!(footnote.reference.as_deref(), Some("2.5"));
        assert_eq!(footnote.pages, vec![2]);
        assert_eq!(flat.contents[0].fn_refs, vec!["2.5"]);
    }

    #[test]
    fn page_tag_inside_paragraph() {
        let flat = run(
            r#"<band nr="1"><hauptteil><h1>W</h1><p>text <seite nr="5"/> more</p></hauptteil></band>"#,
        )
        .unwrap();
        assert_eq!(flat.works.len(), 1);
        assert_eq!(flat.contents.len(), 1);
        let p = &flat.contents[0];
        assert_eq!(p.kind, ContentKind::Paragraph);
        assert_eq!(p.fmt_text, "text <ks-meta-page>5</ks-meta-page> more");
        assert_eq!(p.pages, vec![4, 5]);
        assert!(p.fn_refs.is_empty());
    }

    #[test]
    fn unreferenced_footnote_joins_enclosing_work() {
        let flat = run(
            r#"<band nr="1"><hauptteil><seite nr="1"/><h1>W</h1><p>a <seite nr="10"/> b</p></hauptteil>
               <fussnoten><fn seite="2" nr="5">Anm.</fn></fussnoten></band>"#,
        )
        .unwrap();
        let footnote = flat
            .contents
            .iter()
            .find(|c| c.kind == ContentKind::Footnote)
            .unwrap();
        assert_eq!(footnote.work_code, "W1");
        assert_eq!(footnote.reference.as_deref(), Some("2.5"));
        assert_eq!(footnote.pages, vec![2]);
    }

    #[test]
    fn footnote_of_middle_page_precedes_paragraph_spanning_past_it() {
        let flat = run(
            r#"<band nr="1"><hauptteil><seite nr="1"/><h1>W</h1>
               <p>a <seite nr="2"/> b<fr seite="2" nr="1"/> <seite nr="3"/> c</p></hauptteil>
               <fussnoten><fn seite="2" nr="1">Anm.</fn></fussnoten></band>"#,
        )
        .unwrap();
        let order: Vec<_> = flat
            .contents
            .iter()
            .map(|c| (c.ordinal, c.kind, c.pages.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, ContentKind::Footnote, vec![2]),
                (2, ContentKind::Paragraph, vec![1, 2, 3]),
            ]
        );
        assert_eq!(flat.works[0].paragraphs, vec![2]);
    }

    #[test]
    fn heading_gap_yields_nested_sections() {
        let flat = run(
            "<band nr=\"1\"><hauptteil><h1>W</h1><h2>A</h2><h4>B</h4><p>x</p></hauptteil></band>",
        )
        .unwrap();
        let work = &flat.works[0];
        let a = &work.sections[0];
        let b = &a.sections[0];
        assert_eq!(b.paragraphs.len(), 1);
        let b_heading = flat.contents.iter().find(|c| c.ordinal == b.heading).unwrap();
        assert!(b_heading.fmt_text.starts_with(&format!(
            "<ks-fmt-h{}>",
            HeadingLevel::H2.depth()
        )));
    }

    #[test]
    fn unknown_inline_tag_fails_upload() {
        assert_eq!(
            run("<band nr=\"1\"><hauptteil><h1>W</h1><p><xyz/></p></hauptteil></band>").unwrap_err(),
            UploadError::UnknownTag {
                parent: "p".into(),
                tag: "xyz".into()
            }
        );
    }

    #[test]
    fn two_works_get_metadata_by_position() {
        let flat = run(
            r#"<band nr="1"><hauptteil><seite nr="1"/><h1>A</h1><p>a</p><seite nr="2"/><h1>B</h1><p>b</p></hauptteil></band>"#,
        )
        .unwrap();
        assert_eq!(flat.volume.works.len(), 2);
        assert_eq!(flat.works[1].siglum.as_deref(), Some("W 2"));
        let only = flat.only_work("W2").unwrap();
        assert_eq!(only.works.len(), 1);
        assert!(only.contents.iter().all(|c| c.work_code == "W2"));
        assert_eq!(only.contents[0].ordinal, 1);
    }

    #[test]
    fn volume_mismatch() {
        let err = process_volume(
            b"<band nr=\"2\"><hauptteil/></band>",
            Some(1),
            &corpus(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err, UploadError::VolumeMismatch { expected: 1, found: 2 });
    }

    #[test]
    fn unconfigured_volume() {
        let err = process_volume(
            b"<band nr=\"7\"><hauptteil/></band>",
            None,
            &corpus(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err, UploadError::UnknownVolume(7));
    }

    #[test]
    fn fixture_volume() {
        let xml = std::fs::read("tests/fixtures/band04-excerpt.xml").unwrap();
        let corpus = Corpus::load(std::path::Path::new("config/volume-metadata.json")).unwrap();
        let flat = process_volume(&xml, None, &corpus, &CancelToken::new()).unwrap();
        assert_eq!(flat.volume.volume_number, 4);
        assert_eq!(flat.works[0].code, "KrV-A");
        for work in &flat.works {
            let ordinals: Vec<_> = flat
                .contents
                .iter()
                .filter(|c| c.work_code == work.code)
                .map(|c| c.ordinal)
                .collect();
            let expected: Vec<_> = (1..=ordinals.len() as i32).collect();
            assert_eq!(ordinals, expected, "dense ordinals for {}", work.code);
        }
        for c in &flat.contents {
            assert_eq!(crate::markup::remove_tags(&c.fmt_text), c.search_text);
            assert!(!c.pages.is_empty());
        }
        for work in &flat.works {
            let maxes: Vec<_> = flat
                .contents
                .iter()
                .filter(|c| c.work_code == work.code)
                .map(|c| c.pages.iter().max().copied().unwrap_or(0))
                .collect();
            assert!(
                maxes.windows(2).all(|w| w[0] <= w[1]),
                "last pages go back in {}: {maxes:?}",
                work.code
            );
        }
        let linked = flat.contents.iter().filter(|c| c.summary_ref.is_some()).count();
        assert_eq!(linked, 1);
    }
}
