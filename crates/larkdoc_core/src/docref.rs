use anyhow::{Result, bail};
use reqwest::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    Document(String),
    WikiNode(String),
}

impl DocumentRef {
    pub fn token(&self) -> &str {
        match self {
            Self::Document(token) | Self::WikiNode(token) => token,
        }
    }
}

/// Accepts a bare document id, `wiki:<token>`, or a document / wiki URL.
pub fn parse_document_ref(input: &str) -> Result<DocumentRef> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("document reference is empty");
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return parse_document_url(trimmed);
    }
    if let Some(token) = trimmed.strip_prefix("wiki:") {
        return Ok(DocumentRef::WikiNode(validate_token(token)?));
    }
    Ok(DocumentRef::Document(validate_token(trimmed)?))
}

fn parse_document_url(url: &str) -> Result<DocumentRef> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(error) => bail!("invalid document URL {url}: {error}"),
    };
    let segments = parsed
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for pair in segments.windows(2) {
        match pair[0] {
            "docx" => return Ok(DocumentRef::Document(validate_token(pair[1])?)),
            "wiki" => return Ok(DocumentRef::WikiNode(validate_token(pair[1])?)),
            "docs" => bail!("legacy doc URLs are not supported: {url}"),
            _ => {}
        }
    }
    bail!("URL does not point at a docx document or wiki node: {url}")
}

fn validate_token(token: &str) -> Result<String> {
    let token = token.trim();
    if token.is_empty() {
        bail!("document token is empty");
    }
    if !token
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        bail!("document token contains unexpected characters: {token}");
    }
    Ok(token.to_string())
}
