//! Inline XML elements → neutral markup strings.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::simplify::LINE_TOKEN_RE;
use super::xml::{Element, Node};
use crate::error::UploadError;
use crate::markup;

static ROMZAHL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)(\.)?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Antiqua,
    Bild,
    Bildverweis,
    Em1,
    Em2,
    Fett,
    Formel,
    Fr,
    Fremdsprache,
    Gesperrt,
    Hi,
    Hu,
    Name,
    Op,
    P,
    Romzahl,
    Seite,
    Table,
    Trenn,
    Zeile,
}

impl Tag {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "antiqua" => Self::Antiqua,
            "bild" => Self::Bild,
            "bildverweis" => Self::Bildverweis,
            "em1" => Self::Em1,
            "em2" => Self::Em2,
            "fett" => Self::Fett,
            "formel" => Self::Formel,
            "fr" => Self::Fr,
            "fremdsprache" => Self::Fremdsprache,
            "gesperrt" => Self::Gesperrt,
            "hi" => Self::Hi,
            "hu" => Self::Hu,
            "name" => Self::Name,
            "op" => Self::Op,
            "p" => Self::P,
            "romzahl" => Self::Romzahl,
            "seite" => Self::Seite,
            "table" => Self::Table,
            "trenn" => Self::Trenn,
            "zeile" => Self::Zeile,
            _ => return None,
        })
    }
}

// ── Dispatch tables ──

use Tag::*;

const HEADING: &[Tag] = &[
    Fett, Fr, Fremdsprache, Gesperrt, Hi, Hu, Name, Op, Romzahl, Seite, Trenn, Zeile,
];
const PAR_HEADING: &[Tag] = &[
    Em1, Fett, Fr, Fremdsprache, Gesperrt, Name, Op, Romzahl, Seite, Trenn, Zeile,
];
const PARAGRAPH: &[Tag] = &[
    Antiqua, Bild, Bildverweis, Em1, Em2, Fett, Formel, Fr, Fremdsprache, Gesperrt, Hu, Name,
    Op, Romzahl, Seite, Table, Trenn, Zeile,
];
const EMPHASIS: &[Tag] = &[
    Bild, Bildverweis, Em1, Em2, Fett, Formel, Fr, Fremdsprache, Gesperrt, Name, Romzahl, Seite,
    Trenn, Zeile,
];
const ANTIQUA: &[Tag] = &[Fett, Gesperrt, Name, Seite, Trenn, Zeile];
const GESPERRT: &[Tag] = &[Fett, Name, Seite, Trenn, Zeile];
const PAGE_LINE: &[Tag] = &[Seite, Trenn, Zeile];
const FORMEL: &[Tag] = &[Em1];
const NOTE: &[Tag] = &[P];

// ── Entry points ──

pub fn paragraph(el: &Element) -> Result<String, UploadError> {
    transform(el, PARAGRAPH)
}

pub fn par_heading(el: &Element) -> Result<String, UploadError> {
    Ok(wrap(markup::PAR_HEADING, &transform(el, PAR_HEADING)?))
}

/// Footnote or summary body.
pub fn note(el: &Element) -> Result<String, UploadError> {
    transform(el, NOTE)
}

/// Returns `(fmt_text, raw toc text)`. `level` is `None` for a work heading,
/// which is not wrapped in a heading tag.
pub fn heading(el: &Element, level: Option<u8>) -> Result<(String, String), UploadError> {
    let mut fmt = Vec::new();
    let mut toc = Vec::new();
    for node in &el.children {
        match node {
            Node::Text(t) => {
                let trimmed = t.trim();
                if !trimmed.is_empty() {
                    fmt.push(text_run(trimmed));
                    toc.push(LINE_TOKEN_RE.replace_all(trimmed, "").into_owned());
                }
            }
            Node::Element(child) => {
                let tag = admissible(el, child, HEADING)?;
                match tag {
                    Hi => toc.push(child.text().trim().to_string()),
                    Fr | Hu | Seite | Zeile => fmt.push(render(tag, child)?),
                    _ => {
                        let rendered = render(tag, child)?;
                        toc.push(rendered.clone());
                        fmt.push(rendered);
                    }
                }
            }
            Node::Comment(_) => {}
        }
    }
    let fmt = markup::contract(&join(fmt));
    let fmt = match level {
        Some(level) => markup::heading(level, &fmt),
        None => fmt,
    };
    Ok((fmt, markup::toc_text(&markup::contract(&join(toc)))))
}

/// Trimmed numeric attribute. The aliases `272a`, `272c` and `272d` read as 272.
pub fn numeric_attr(el: &Element, name: &str) -> Result<i32, UploadError> {
    let raw = el.attr(name).ok_or_else(|| UploadError::MissingAttr {
        elem: el.name.clone(),
        attr: name.to_string(),
    })?;
    let value = raw.trim();
    let value = match value {
        "272a" | "272c" | "272d" => "272",
        v => v,
    };
    value.parse().map_err(|_| UploadError::BadAttr {
        elem: el.name.clone(),
        attr: name.to_string(),
        value: raw.to_string(),
    })
}

// ── Recursion ──

fn admissible(parent: &Element, child: &Element, allowed: &[Tag]) -> Result<Tag, UploadError> {
    Tag::parse(&child.name)
        .filter(|t| allowed.contains(t))
        .ok_or_else(|| UploadError::UnknownTag {
            parent: parent.name.clone(),
            tag: child.name.clone(),
        })
}

fn transform(el: &Element, allowed: &[Tag]) -> Result<String, UploadError> {
    let mut parts = Vec::new();
    for node in &el.children {
        match node {
            Node::Text(t) => {
                let trimmed = t.trim();
                if !trimmed.is_empty() {
                    parts.push(text_run(trimmed));
                }
            }
            Node::Element(child) => {
                let tag = admissible(el, child, allowed)?;
                parts.push(render(tag, child)?);
            }
            Node::Comment(c) => debug!(comment = c.trim(), "skipping comment"),
        }
    }
    Ok(markup::contract(&join(parts)))
}

fn render(tag: Tag, el: &Element) -> Result<String, UploadError> {
    Ok(match tag {
        Antiqua => transform(el, ANTIQUA)?,
        Bild | Bildverweis | Op | Trenn => String::new(),
        Em1 => wrap(markup::EMPH, &transform(el, PAGE_LINE)?),
        Em2 => wrap(markup::EMPH2, &transform(el, EMPHASIS)?),
        Fett => wrap(markup::BOLD, &transform(el, PAGE_LINE)?),
        Formel => wrap(markup::FORMULA, &transform(el, FORMEL)?),
        Fr => markup::fnref(numeric_attr(el, "seite")?, numeric_attr(el, "nr")?),
        Fremdsprache => wrap(markup::LANG, &transform(el, EMPHASIS)?),
        Gesperrt => wrap(markup::TRACKED, &transform(el, GESPERRT)?),
        Hi => el.text().trim().to_string(),
        Hu => par_heading(el)?,
        Name => wrap(markup::NAME, &transform(el, PAGE_LINE)?),
        P => transform(el, PARAGRAPH)?,
        Romzahl => romzahl(&el.text()),
        Seite => markup::page(numeric_attr(el, "nr")?),
        Table => markup::TABLE_PLACEHOLDER.to_string(),
        Zeile => markup::line(numeric_attr(el, "nr")?),
    })
}

fn wrap(tag: &str, content: &str) -> String {
    if content.is_empty() {
        String::new()
    } else {
        markup::wrap(tag, content)
    }
}

fn join(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn text_run(text: &str) -> String {
    LINE_TOKEN_RE
        .replace_all(text, "<ks-meta-line>${1}</ks-meta-line>")
        .into_owned()
}

// ── Roman numerals ──

const ROMAN: &[(i64, &str)] = &[
    (1000, "M"),
    (900, "CM"),
    (500, "D"),
    (400, "CD"),
    (100, "C"),
    (90, "XC"),
    (50, "L"),
    (40, "XL"),
    (10, "X"),
    (9, "IX"),
    (5, "V"),
    (4, "IV"),
    (1, "I"),
];

pub fn to_roman(mut n: i64) -> String {
    let mut out = String::new();
    for &(value, numeral) in ROMAN {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

/// `"N"` or `"N."` → Roman numeral; anything else is kept as written.
fn romzahl(text: &str) -> String {
    let text = text.trim();
    match ROMZAHL_RE.captures(text) {
        Some(c) => match c[1].parse::<i64>() {
            Ok(n) => format!("{}{}", to_roman(n), c.get(2).map_or("", |m| m.as_str())),
            Err(_) => text.to_string(),
        },
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::xml::parse;

    fn el(xml: &str) -> Element {
        parse(&crate::parser::simplify::simplify(xml)).unwrap()
    }

    #[test]
    fn bold_in_paragraph() {
        let p = el("<p>Die <fett>Vernunft</fett> ist.</p>");
        assert_eq!(
            paragraph(&p).unwrap(),
            "Die <ks-fmt-bold>Vernunft</ks-fmt-bold> ist."
        );
    }

    #[test]
    fn footnote_reference_and_page() {
        let p = el(r#"<p>Text<fr seite="2" nr="5"/> weiter <seite nr="3"/>hier.</p>"#);
        assert_eq!(
            paragraph(&p).unwrap(),
            "Text <ks-meta-fnref>2.5</ks-meta-fnref> weiter <ks-meta-page>3</ks-meta-page> hier."
        );
    }

    #[test]
    fn line_tokens_inside_text() {
        let p = el(r#"<p>a <zeile nr="7"/>b</p>"#);
        assert_eq!(paragraph(&p).unwrap(), "a <ks-meta-line>7</ks-meta-line>b");
    }

    #[test]
    fn nested_emphasis() {
        let p = el("<p><em2>x <gesperrt>y</gesperrt></em2></p>");
        assert_eq!(
            paragraph(&p).unwrap(),
            "<ks-fmt-emph2>x <ks-fmt-tracked>y</ks-fmt-tracked></ks-fmt-emph2>"
        );
    }

    #[test]
    fn unknown_tag_in_paragraph() {
        let p = el("<p><xyz/></p>");
        assert_eq!(
            paragraph(&p),
            Err(UploadError::UnknownTag {
                parent: "p".into(),
                tag: "xyz".into()
            })
        );
    }

    #[test]
    fn tag_not_admissible_in_context() {
        let p = el("<p><fett><em2>x</em2></fett></p>");
        assert!(matches!(
            paragraph(&p),
            Err(UploadError::UnknownTag { parent, tag }) if parent == "fett" && tag == "em2"
        ));
    }

    #[test]
    fn romzahl_variants() {
        assert_eq!(romzahl("4."), "IV.");
        assert_eq!(romzahl(" 1999 "), "MCMXCIX");
        assert_eq!(romzahl("1"), "I");
        assert_eq!(romzahl("x"), "x");
    }

    #[test]
    fn numeric_attr_aliases_and_errors() {
        let e = el(r#"<seite nr=" 272c "/>"#);
        assert_eq!(numeric_attr(&e, "nr"), Ok(272));
        let e = el(r#"<seite nr="abc"/>"#);
        assert!(matches!(numeric_attr(&e, "nr"), Err(UploadError::BadAttr { .. })));
        let e = el("<seite/>");
        assert!(matches!(numeric_attr(&e, "nr"), Err(UploadError::MissingAttr { .. })));
    }

    #[test]
    fn heading_fmt_and_toc() {
        let h = el(r#"<h2><seite nr="4"/>Erster <fett>Abschnitt</fett>.<hi>Inhalt</hi></h2>"#);
        let (fmt, toc) = heading(&h, Some(1)).unwrap();
        assert_eq!(
            fmt,
            "<ks-fmt-h1><ks-meta-page>4</ks-meta-page> Erster <ks-fmt-bold>Abschnitt</ks-fmt-bold>.</ks-fmt-h1>"
        );
        assert_eq!(toc, "Erster Abschnitt. Inhalt");
    }

    #[test]
    fn work_heading_is_unwrapped() {
        let h = el("<h1>GRUNDLEGUNG</h1>");
        assert_eq!(
            heading(&h, None).unwrap(),
            ("GRUNDLEGUNG".to_string(), "Grundlegung".to_string())
        );
    }

    #[test]
    fn images_render_empty() {
        let p = el(r#"<p>a<bild src="x"/>b</p>"#);
        assert_eq!(paragraph(&p).unwrap(), "a b");
    }
}
