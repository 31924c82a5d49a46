use std::sync::LazyLock;

use regex::Regex;

static ZEILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<zeile\s+nr="\s*(\d+)\s*"\s*/>"#).unwrap());
static TRENN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<trenn\s*/>\s*").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

/// Line token left in text runs; the inline transformer turns it into a
/// line tag.
pub static LINE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{l(\d+)\}").unwrap());

/// Rewrites line breaks to `{lN}` tokens and removes hyphenation markers so
/// the word halves join up.
pub fn simplify(xml: &str) -> String {
    let xml = ZEILE_RE.replace_all(xml, "{l$1}");
    let xml = TRENN_RE.replace_all(&xml, "");
    SPACES_RE.replace_all(&xml, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeile_becomes_token() {
        assert_eq!(simplify(r#"<p>a <zeile nr="12"/>b</p>"#), "<p>a {l12}b</p>");
    }

    #[test]
    fn trenn_joins_word_halves() {
        assert_eq!(
            simplify("Verstan<trenn/>\n<zeile nr=\"5\"/>des"),
            "Verstan{l5}des"
        );
    }

    #[test]
    fn seite_is_kept() {
        let xml = r#"<p><seite nr="3"/>x</p>"#;
        assert_eq!(simplify(xml), xml);
    }

    #[test]
    fn collapses_spaces() {
        assert_eq!(simplify("a    b"), "a b");
    }
}
