//! Raw upload bytes → UTF-8 XML string the element parser accepts.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::UploadError;

static ENCODING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*<\?xml[^>]*encoding="([^"]*)""#).unwrap());

/// Named entities used by the corpus that XML does not predefine.
const ENTITIES: &[(&str, &str)] = &[
    ("&kreis;", "○"),
    ("&quadrat;", "■"),
    ("&nbsp;", "\u{a0}"),
    ("&alpha;", "α"),
    ("&Alpha;", "Α"),
    ("&beta;", "β"),
    ("&Beta;", "Β"),
    ("&gamma;", "γ"),
    ("&Gamma;", "Γ"),
    ("&delta;", "δ"),
    ("&Delta;", "Δ"),
    ("&epsilon;", "ε"),
    ("&Epsilon;", "Ε"),
    ("&zeta;", "ζ"),
    ("&Zeta;", "Ζ"),
    ("&eta;", "η"),
    ("&Eta;", "Η"),
    ("&theta;", "θ"),
    ("&theata;", "θ"),
    ("&Theta;", "Θ"),
    ("&iota;", "ι"),
    ("&Iota;", "Ι"),
    ("&kappa;", "κ"),
    ("&Kappa;", "Κ"),
    ("&lambda;", "λ"),
    ("&Lambda;", "Λ"),
    ("&my;", "μ"),
    ("&My;", "Μ"),
    ("&ny;", "ν"),
    ("&Ny;", "Ν"),
    ("&xi;", "ξ"),
    ("&Xi;", "Ξ"),
    ("&omikron;", "ο"),
    ("&Omikron;", "Ο"),
    ("&pi;", "π"),
    ("&Pi;", "Π"),
    ("&rho;", "ρ"),
    ("&Rho;", "Ρ"),
    ("&sigma;", "σ"),
    ("&sigma2;", "ς"),
    ("&Sigma;", "Σ"),
    ("&tau;", "τ"),
    ("&Tau;", "Τ"),
    ("&ypsilon;", "υ"),
    ("&Ypsilon;", "Υ"),
    ("&phi;", "φ"),
    ("&Phi;", "Φ"),
    ("&chi;", "χ"),
    ("&Chi;", "Χ"),
    ("&psi;", "ψ"),
    ("&Psi;", "Ψ"),
    ("&omega;", "ω"),
    ("&Omega;", "Ω"),
];

/// Decodes according to the XML declaration (UTF-8 or ISO-8859-1).
pub fn decode(input: &[u8]) -> Result<String, UploadError> {
    let head = String::from_utf8_lossy(&input[..input.len().min(200)]);
    let encoding = ENCODING_RE
        .captures(&head)
        .map(|c| c[1].to_ascii_uppercase())
        .unwrap_or_default();

    match encoding.as_str() {
        "" | "UTF-8" => String::from_utf8(input.to_vec())
            .map_err(|e| UploadError::MalformedXml(format!("invalid UTF-8: {e}"))),
        "ISO-8859-1" | "LATIN1" => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(input);
            Ok(text.into_owned())
        }
        other => Err(UploadError::UnsupportedEncoding(other.to_string())),
    }
}

pub fn replace_entities(xml: &str) -> String {
    if !xml.contains('&') {
        return xml.to_string();
    }
    let mut out = xml.to_string();
    for (entity, replacement) in ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}
