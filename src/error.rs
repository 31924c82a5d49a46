use thiserror::Error;

/// Failures of the ingestion pipeline. Each variant carries the offending
/// values so the API can return them as structured parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("unknown tag <{tag}> inside <{parent}>")]
    UnknownTag { parent: String, tag: String },

    #[error("element <{elem}> is missing attribute '{attr}'")]
    MissingAttr { elem: String, attr: String },

    #[error("element <{elem}> has non-numeric attribute {attr}=\"{value}\"")]
    BadAttr { elem: String, attr: String, value: String },

    #[error("{kind} {reference} starts on page {text_page}, expected page {ref_page}")]
    PageMismatch {
        kind: String,
        reference: String,
        ref_page: i32,
        text_page: i32,
    },

    #[error("work {work} starts on page {min_page} before the previous work ends on page {prev_max_page}")]
    OverlappingWorks {
        work: usize,
        prev_max_page: i32,
        min_page: i32,
    },

    #[error("malformed xml: {0}")]
    MalformedXml(String),

    #[error("missing element <{0}>")]
    MissingElement(String),

    #[error("<{0}> appears before the first work heading")]
    HeadingBeforeWork(String),

    #[error("footnotes outside every work: {}", .0.join(", "))]
    UnassignedFootnotes(Vec<String>),

    #[error("volume {0} is not configured")]
    UnknownVolume(i32),

    #[error("volume {volume} has no metadata for work #{ordinal}")]
    MissingWorkMetadata { volume: i32, ordinal: usize },

    #[error("document is volume {found}, expected volume {expected}")]
    VolumeMismatch { expected: i32, found: i32 },

    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("search text and formatted text disagree on word count in \"{0}\"")]
    WordIndexMismatch(String),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTag { .. } => "UPLOAD_UNKNOWN_TAG",
            Self::MissingAttr { .. } => "UPLOAD_MISSING_ATTRIBUTE",
            Self::BadAttr { .. } => "UPLOAD_WRONG_ATTRIBUTE",
            Self::PageMismatch { .. } => "UPLOAD_PAGE_MISMATCH",
            Self::OverlappingWorks { .. } => "UPLOAD_OVERLAPPING_WORKS",
            Self::MalformedXml(_) => "UPLOAD_MALFORMED_XML",
            Self::MissingElement(_) => "UPLOAD_MISSING_ELEMENT",
            Self::HeadingBeforeWork(_) => "UPLOAD_HEADING_BEFORE_WORK",
            Self::UnassignedFootnotes(_) => "UPLOAD_UNASSIGNED_FOOTNOTES",
            Self::UnknownVolume(_) => "UPLOAD_UNKNOWN_VOLUME",
            Self::MissingWorkMetadata { .. } => "UPLOAD_MISSING_WORK_METADATA",
            Self::VolumeMismatch { .. } => "UPLOAD_VOLUME_MISMATCH",
            Self::UnsupportedEncoding(_) => "UPLOAD_UNSUPPORTED_ENCODING",
            Self::WordIndexMismatch(_) => "UPLOAD_WORD_INDEX_MISMATCH",
            Self::Cancelled => "UPLOAD_CANCELLED",
        }
    }

    pub fn params(&self) -> Vec<String> {
        match self {
            Self::UnknownTag { parent, tag } => vec![parent.clone(), tag.clone()],
            Self::MissingAttr { elem, attr } => vec![elem.clone(), attr.clone()],
            Self::BadAttr { elem, attr, value } => vec![elem.clone(), attr.clone(), value.clone()],
            Self::PageMismatch {
                kind,
                reference,
                ref_page,
                text_page,
            } => vec![
                kind.clone(),
                reference.clone(),
                ref_page.to_string(),
                text_page.to_string(),
            ],
            Self::OverlappingWorks {
                work,
                prev_max_page,
                min_page,
            } => vec![
                work.to_string(),
                prev_max_page.to_string(),
                min_page.to_string(),
            ],
            Self::MalformedXml(msg) => vec![msg.clone()],
            Self::MissingElement(name) | Self::HeadingBeforeWork(name) => vec![name.clone()],
            Self::UnassignedFootnotes(refs) => refs.clone(),
            Self::UnknownVolume(nr) => vec![nr.to_string()],
            Self::MissingWorkMetadata { volume, ordinal } => {
                vec![volume.to_string(), ordinal.to_string()]
            }
            Self::VolumeMismatch { expected, found } => {
                vec![expected.to_string(), found.to_string()]
            }
            Self::UnsupportedEncoding(enc) => vec![enc.clone()],
            Self::WordIndexMismatch(text) => vec![text.clone()],
            Self::Cancelled => Vec::new(),
        }
    }
}

/// Query-language errors raised by the tokenizer and the parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,
    #[error("missing closing parenthesis")]
    MissingCloseParenthesis,
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("query must not start with '{0}'")]
    WrongStartingChar(char),
    #[error("query must not end with '{0}'")]
    WrongEndingChar(char),
}

impl SyntaxError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedToken(_) => "SEARCH_UNEXPECTED_TOKEN",
            Self::UnexpectedEndOfInput => "SEARCH_UNEXPECTED_END_OF_INPUT",
            Self::MissingCloseParenthesis => "SEARCH_NO_CLOSING_PARENTHESIS",
            Self::UnterminatedQuote => "SEARCH_UNTERMINATED_DOUBLE_QUOTE",
            Self::WrongStartingChar(_) => "SEARCH_WRONG_STARTING_CHAR",
            Self::WrongEndingChar(_) => "SEARCH_WRONG_END_CHAR",
        }
    }

    pub fn params(&self) -> Vec<String> {
        match self {
            Self::UnexpectedToken(text) => vec![text.clone()],
            Self::WrongStartingChar(c) | Self::WrongEndingChar(c) => vec![c.to_string()],
            _ => Vec::new(),
        }
    }
}

/// Validation failures of incoming requests, before any pipeline runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("request body is empty")]
    EmptyWorkText,
    #[error("work selection is empty")]
    EmptyWorkSelection,
    #[error("invalid work code '{0}'")]
    InvalidWorkId(String),
    #[error("search terms are empty")]
    EmptyQuery,
    #[error("invalid volume number '{0}'")]
    InvalidVolume(String),
    #[error("invalid ordinals '{0}'")]
    InvalidOrdinals(String),
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyWorkText => "BAD_REQUEST_EMPTY_WORK_TEXT",
            Self::EmptyWorkSelection => "BAD_REQUEST_EMPTY_WORKS_SELECTION",
            Self::InvalidWorkId(_) => "BAD_REQUEST_INVALID_WORK_CODE",
            Self::EmptyQuery => "BAD_REQUEST_EMPTY_SEARCH_TERMS",
            Self::InvalidVolume(_) => "BAD_REQUEST_INVALID_VOLUME",
            Self::InvalidOrdinals(_) => "BAD_REQUEST_INVALID_ORDINALS",
        }
    }

    pub fn params(&self) -> Vec<String> {
        match self {
            Self::InvalidWorkId(v) | Self::InvalidVolume(v) | Self::InvalidOrdinals(v) => {
                vec![v.clone()]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_params_follow_variant_fields() {
        let err = UploadError::UnknownTag {
            parent: "p".into(),
            tag: "xyz".into(),
        };
        assert_eq!(err.code(), "UPLOAD_UNKNOWN_TAG");
        assert_eq!(err.params(), vec!["p", "xyz"]);
        assert_eq!(err.to_string(), "unknown tag <xyz> inside <p>");
    }

    #[test]
    fn syntax_params() {
        assert_eq!(SyntaxError::WrongStartingChar('&').params(), vec!["&"]);
        assert!(SyntaxError::UnexpectedEndOfInput.params().is_empty());
    }
}
