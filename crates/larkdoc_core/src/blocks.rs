use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::DocsError;

/// Per-block character cap enforced by the document service.
pub const DEFAULT_MAX_BLOCK_CHARS: usize = 10_000;
/// Per-request cap on inserted children.
pub const DEFAULT_MAX_BATCH_BLOCKS: usize = 50;

pub const BLOCK_TYPE_PAGE: u32 = 1;
pub const BLOCK_TYPE_TEXT: u32 = 2;

/// The two independent service limits content has to respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLimits {
    pub max_block_chars: usize,
    pub max_batch_blocks: usize,
}

impl Default for ContentLimits {
    fn default() -> Self {
        Self {
            max_block_chars: DEFAULT_MAX_BLOCK_CHARS,
            max_batch_blocks: DEFAULT_MAX_BATCH_BLOCKS,
        }
    }
}

impl ContentLimits {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_block_chars == 0 {
            return Err(DocsError::InvalidConfig(
                "max_block_chars must be positive".to_string(),
            )
            .into());
        }
        if self.max_batch_blocks == 0 {
            return Err(DocsError::InvalidConfig(
                "max_batch_blocks must be positive".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockKind {
    Page,
    Text,
    Heading(u8),
    Bullet,
    Ordered,
    Code,
    Quote,
    Todo,
    Divider,
    Other(u32),
}

impl BlockKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            BLOCK_TYPE_PAGE => Self::Page,
            BLOCK_TYPE_TEXT => Self::Text,
            3..=11 => Self::Heading((code - 2) as u8),
            12 => Self::Bullet,
            13 => Self::Ordered,
            14 => Self::Code,
            15 => Self::Quote,
            17 => Self::Todo,
            22 => Self::Divider,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Page => BLOCK_TYPE_PAGE,
            Self::Text => BLOCK_TYPE_TEXT,
            Self::Heading(level) => u32::from(level) + 2,
            Self::Bullet => 12,
            Self::Ordered => 13,
            Self::Code => 14,
            Self::Quote => 15,
            Self::Todo => 17,
            Self::Divider => 22,
            Self::Other(code) => code,
        }
    }

    pub fn label(self) -> String {
        match self {
            Self::Page => "page".to_string(),
            Self::Text => "text".to_string(),
            Self::Heading(level) => format!("heading{level}"),
            Self::Bullet => "bullet".to_string(),
            Self::Ordered => "ordered".to_string(),
            Self::Code => "code".to_string(),
            Self::Quote => "quote".to_string(),
            Self::Todo => "todo".to_string(),
            Self::Divider => "divider".to_string(),
            Self::Other(code) => format!("type{code}"),
        }
    }
}

/// A block in the nested shape accepted by the children-insert call.
///
/// The type-specific payload (`text`, `heading1`, `code`, ...) is kept as
/// raw JSON and flattened next to `block_type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_type: u32,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

impl Block {
    pub fn text(content: &str) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "text".to_string(),
            json!({
                "elements": [{ "text_run": { "content": content } }],
                "style": {}
            }),
        );
        Self {
            block_type: BLOCK_TYPE_TEXT,
            payload,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> BlockKind {
        BlockKind::from_code(self.block_type)
    }

    /// Concatenated `text_run` content of the block's own payload.
    pub fn plain_text(&self) -> String {
        payload_plain_text(&self.payload)
    }

    /// Number of blocks in this subtree, the block itself included.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Block::subtree_len).sum::<usize>()
    }
}

pub(crate) fn payload_plain_text(payload: &Map<String, Value>) -> String {
    let mut out = String::new();
    for value in payload.values() {
        let Some(elements) = value.get("elements").and_then(Value::as_array) else {
            continue;
        };
        for element in elements {
            if let Some(content) = element
                .get("text_run")
                .and_then(|run| run.get("content"))
                .and_then(Value::as_str)
            {
                out.push_str(content);
            }
        }
    }
    out
}

/// Split plain text into paragraph blocks of at most `max_chars` characters.
///
/// Every line (split on `\n`, with a trailing `\r` dropped) produces at least
/// one block, so empty input still yields a single empty paragraph.
pub fn text_to_blocks(text: &str, max_chars: usize) -> Vec<Block> {
    let limit = max_chars.max(1);
    let mut blocks = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        for chunk in split_by_chars(line, limit) {
            blocks.push(Block::text(chunk));
        }
    }
    blocks
}

/// Contiguous slices of `line`, each at most `limit` characters long.
pub fn split_by_chars(line: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    if line.is_empty() {
        return vec![line];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in line.char_indices() {
        if count == limit {
            chunks.push(&line[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&line[start..]);
    chunks
}
