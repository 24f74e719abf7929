use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::blocks::{Block, BlockKind, ContentLimits, text_to_blocks};
use crate::client::{Document, DocsReadApi, DocsWriteApi, WikiTarget};
use crate::config::Collaborator;
use crate::dispatch::{DispatchReport, insert_in_batches};
use crate::docref::DocumentRef;
use crate::error::DocsError;
use crate::reshape::RawBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    PlainText,
    Markdown,
    MarkdownFallback,
}

impl ContentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::Markdown => "markdown",
            Self::MarkdownFallback => "markdown_fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentBlocks {
    pub blocks: Vec<Block>,
    pub source: ContentSource,
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub title: String,
    pub folder_token: Option<String>,
    pub content: Option<String>,
    pub markdown: bool,
    pub wiki_target: Option<WikiTarget>,
    pub collaborators: Vec<Collaborator>,
    pub limits: ContentLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppendReport {
    pub document_id: String,
    pub root_block_id: String,
    pub source: ContentSource,
    pub start_index: usize,
    pub removed_blocks: usize,
    pub dispatch: DispatchReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WikiMoveStatus {
    Moved,
    Failed,
}

impl WikiMoveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Moved => "moved",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WikiMoveReport {
    pub space_id: String,
    pub status: WikiMoveStatus,
    pub node_token: Option<String>,
    pub original_deleted: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorStatus {
    Added,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollaboratorOutcome {
    pub collaborator: Collaborator,
    pub status: CollaboratorStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    pub document: Document,
    pub content: Option<AppendReport>,
    pub wiki: Option<WikiMoveReport>,
    pub collaborators: Vec<CollaboratorOutcome>,
    pub request_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub document_id: String,
    pub content: Option<AppendReport>,
    pub collaborators: Vec<CollaboratorOutcome>,
    pub request_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub document_id: String,
    pub request_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document: Document,
    pub root_block_id: String,
    pub total_blocks: usize,
    pub top_level_blocks: usize,
    pub by_kind: BTreeMap<String, usize>,
}

/// Turn user content into insertable blocks.
///
/// Markdown goes through the remote converter; any failure or an empty
/// conversion falls back to plain paragraphs.
pub fn blocks_from_content<A: DocsWriteApi>(
    api: &mut A,
    text: &str,
    markdown: bool,
    limits: &ContentLimits,
) -> ContentBlocks {
    if !markdown {
        return ContentBlocks {
            blocks: text_to_blocks(text, limits.max_block_chars),
            source: ContentSource::PlainText,
        };
    }

    match api.convert_markdown(text) {
        Ok(converted) => {
            let blocks = converted.nest();
            if !blocks.is_empty() {
                return ContentBlocks {
                    blocks,
                    source: ContentSource::Markdown,
                };
            }
            log::debug!("markdown conversion returned no blocks; using plain text");
        }
        Err(error) => {
            log::debug!("markdown conversion failed; using plain text: {error:#}");
        }
    }

    ContentBlocks {
        blocks: text_to_blocks(text, limits.max_block_chars),
        source: ContentSource::MarkdownFallback,
    }
}

/// The document's single page block.
pub fn resolve_root_block<A: DocsReadApi>(api: &mut A, document_id: &str) -> Result<RawBlock> {
    let mut pages = api
        .list_blocks(document_id)
        .with_context(|| format!("failed to list blocks of {document_id}"))?
        .into_iter()
        .filter(|block| block.kind() == BlockKind::Page)
        .collect::<Vec<_>>();

    match pages.len() {
        0 => Err(DocsError::RootBlockMissing(document_id.to_string()).into()),
        1 => Ok(pages.remove(0)),
        count => Err(DocsError::AmbiguousRootBlock {
            document_id: document_id.to_string(),
            count,
        }
        .into()),
    }
}

pub fn create_document<A: DocsWriteApi>(
    api: &mut A,
    options: &CreateOptions,
) -> Result<CreateReport> {
    let title = options.title.trim();
    if title.is_empty() {
        bail!("create requires a non-empty title");
    }

    let mut document = api
        .create_document(title, options.folder_token.as_deref())
        .context("failed to create document")?;
    log::info!("created document {}", document.document_id);

    let content = match &options.content {
        Some(text) => Some(write_content(
            api,
            &document.document_id,
            text,
            options.markdown,
            &options.limits,
            WriteMode::InsertAtStart,
        )?),
        None => None,
    };

    let wiki = match &options.wiki_target {
        Some(target) => {
            let (moved, report) = move_document_to_wiki(api, &document, target);
            document = moved;
            Some(report)
        }
        None => None,
    };

    let collaborators = add_collaborators(api, &document.document_id, &options.collaborators);

    Ok(CreateReport {
        document,
        content,
        wiki,
        collaborators,
        request_count: api.request_count(),
    })
}

/// Best-effort wiki move. On failure the document comes back unchanged; on
/// success the original is deleted when the wiki node points at a new object.
/// When the node keeps the document's own token the original is the moved
/// content, so it is left in place.
pub fn move_document_to_wiki<A: DocsWriteApi>(
    api: &mut A,
    document: &Document,
    target: &WikiTarget,
) -> (Document, WikiMoveReport) {
    let node = match api.move_to_wiki(&document.document_id, target) {
        Ok(node) => node,
        Err(error) => {
            log::warn!(
                "moving {} into wiki space {} failed: {error:#}",
                document.document_id,
                target.space_id
            );
            return (
                document.clone(),
                WikiMoveReport {
                    space_id: target.space_id.clone(),
                    status: WikiMoveStatus::Failed,
                    node_token: None,
                    original_deleted: false,
                    detail: Some(format!("{error:#}")),
                },
            );
        }
    };
    log::info!(
        "moved {} into wiki node {}",
        document.document_id,
        node.node_token
    );

    let mut moved = document.clone();
    moved.wiki_node_token = Some(node.node_token.clone());
    let mut report = WikiMoveReport {
        space_id: target.space_id.clone(),
        status: WikiMoveStatus::Moved,
        node_token: Some(node.node_token.clone()),
        original_deleted: false,
        detail: None,
    };

    if !node.obj_token.is_empty() && node.obj_token != document.document_id {
        match api.delete_file(&document.document_id) {
            Ok(()) => {
                report.original_deleted = true;
                moved.document_id = node.obj_token;
            }
            Err(error) => {
                log::warn!(
                    "wiki node {} created but deleting original {} failed: {error:#}",
                    node.node_token,
                    document.document_id
                );
                report.detail = Some(format!("original not deleted: {error:#}"));
            }
        }
    }

    (moved, report)
}

pub fn get_document<A: DocsReadApi>(api: &mut A, document_id: &str) -> Result<Document> {
    api.get_document(document_id)
        .with_context(|| format!("failed to fetch document {document_id}"))
}

pub fn get_raw_content<A: DocsReadApi>(api: &mut A, document_id: &str) -> Result<String> {
    api.get_raw_content(document_id)
        .with_context(|| format!("failed to fetch raw content of {document_id}"))
}

pub fn read_document<A: DocsReadApi>(api: &mut A, document_id: &str) -> Result<DocumentSummary> {
    let document = get_document(api, document_id)?;
    let blocks = api
        .list_blocks(document_id)
        .with_context(|| format!("failed to list blocks of {document_id}"))?;

    let mut root_block_id = None;
    let mut top_level_blocks = 0;
    let mut by_kind = BTreeMap::new();
    for block in &blocks {
        if block.kind() == BlockKind::Page {
            if root_block_id.is_some() {
                return Err(DocsError::AmbiguousRootBlock {
                    document_id: document_id.to_string(),
                    count: blocks
                        .iter()
                        .filter(|block| block.kind() == BlockKind::Page)
                        .count(),
                }
                .into());
            }
            root_block_id = Some(block.block_id.clone());
            top_level_blocks = block.children.len();
            continue;
        }
        *by_kind.entry(block.kind().label()).or_insert(0) += 1;
    }
    let root_block_id =
        root_block_id.ok_or_else(|| DocsError::RootBlockMissing(document_id.to_string()))?;

    Ok(DocumentSummary {
        document,
        root_block_id,
        total_blocks: blocks.len(),
        top_level_blocks,
        by_kind,
    })
}

/// Move the document to the recycle bin through the storage API.
pub fn delete_document<A: DocsWriteApi>(api: &mut A, document_id: &str) -> Result<DeleteReport> {
    api.delete_file(document_id)
        .with_context(|| format!("failed to delete document {document_id}"))?;
    log::info!("deleted document {document_id}");
    Ok(DeleteReport {
        document_id: document_id.to_string(),
        request_count: api.request_count(),
    })
}

pub fn append_document_content<A: DocsWriteApi>(
    api: &mut A,
    document_id: &str,
    text: &str,
    markdown: bool,
    limits: &ContentLimits,
) -> Result<AppendReport> {
    write_content(api, document_id, text, markdown, limits, WriteMode::Append)
}

/// Remove every top-level block under the root, then insert the new content.
pub fn replace_document_content<A: DocsWriteApi>(
    api: &mut A,
    document_id: &str,
    text: &str,
    markdown: bool,
    limits: &ContentLimits,
) -> Result<AppendReport> {
    write_content(api, document_id, text, markdown, limits, WriteMode::Replace)
}

/// Grant each collaborator independently; one failure never stops the rest.
pub fn add_collaborators<A: DocsWriteApi>(
    api: &mut A,
    document_id: &str,
    collaborators: &[Collaborator],
) -> Vec<CollaboratorOutcome> {
    collaborators
        .iter()
        .map(|collaborator| match api.add_member(document_id, collaborator) {
            Ok(()) => {
                log::info!("granted {} on {document_id}", collaborator.label());
                CollaboratorOutcome {
                    collaborator: collaborator.clone(),
                    status: CollaboratorStatus::Added,
                    detail: None,
                }
            }
            Err(error) => {
                log::warn!(
                    "granting {} on {document_id} failed: {error:#}",
                    collaborator.label()
                );
                CollaboratorOutcome {
                    collaborator: collaborator.clone(),
                    status: CollaboratorStatus::Failed,
                    detail: Some(format!("{error:#}")),
                }
            }
        })
        .collect()
}

pub fn resolve_document_id<A: DocsReadApi>(api: &mut A, reference: &DocumentRef) -> Result<String> {
    match reference {
        DocumentRef::Document(id) => Ok(id.clone()),
        DocumentRef::WikiNode(token) => {
            let node = api
                .get_wiki_node(token)
                .with_context(|| format!("failed to resolve wiki node {token}"))?;
            if node.obj_type != "docx" {
                bail!(
                    "wiki node {token} holds a {} object, not a docx document",
                    node.obj_type
                );
            }
            Ok(node.obj_token)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    InsertAtStart,
    Append,
    Replace,
}

fn write_content<A: DocsWriteApi>(
    api: &mut A,
    document_id: &str,
    text: &str,
    markdown: bool,
    limits: &ContentLimits,
    mode: WriteMode,
) -> Result<AppendReport> {
    let root = resolve_root_block(api, document_id)?;
    let existing = root.children.len();

    let removed_blocks = if mode == WriteMode::Replace && existing > 0 {
        api.delete_children(document_id, &root.block_id, 0, existing)
            .with_context(|| format!("failed to clear existing content of {document_id}"))?;
        log::info!("removed {existing} top-level blocks from {document_id}");
        existing
    } else {
        0
    };
    let start_index = match mode {
        WriteMode::Append => existing,
        WriteMode::InsertAtStart | WriteMode::Replace => 0,
    };

    let content = blocks_from_content(api, text, markdown, limits);
    let dispatch = insert_in_batches(
        api,
        document_id,
        &root.block_id,
        &content.blocks,
        start_index,
        limits.max_batch_blocks,
    )
    .with_context(|| format!("failed to write content to {document_id}"))?;

    Ok(AppendReport {
        document_id: document_id.to_string(),
        root_block_id: root.block_id,
        source: content.source,
        start_index,
        removed_blocks,
        dispatch,
    })
}
