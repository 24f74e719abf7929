use thiserror::Error;

/// Failures callers need to tell apart. Raised through `anyhow::Error` and
/// recovered with `downcast_ref::<DocsError>()`.
#[derive(Debug, Error)]
pub enum DocsError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("document {0} has no root page block")]
    RootBlockMissing(String),

    #[error("document {document_id} has {count} root page blocks")]
    AmbiguousRootBlock { document_id: String, count: usize },

    #[error("API error [{code}]: {msg}")]
    Api { code: i64, msg: String },

    #[error("document API request to {path} failed with HTTP {status}")]
    Http { status: u16, path: String },

    #[error("append aborted after inserting {inserted} of {requested} blocks: {source}")]
    BatchAborted {
        inserted: usize,
        requested: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl DocsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound(_) | Self::Http { status: 404, .. }
        )
    }
}

/// True when the error chain carries a `DocumentNotFound`.
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<DocsError>())
        .any(DocsError::is_not_found)
}
