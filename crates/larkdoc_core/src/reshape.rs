use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blocks::{Block, BlockKind};

/// A block as the service reports it in flat form: identified, with parent
/// and child references instead of embedded children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub block_id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub children: Vec<String>,
    pub block_type: u32,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawBlock {
    pub fn kind(&self) -> BlockKind {
        BlockKind::from_code(self.block_type)
    }

    pub fn plain_text(&self) -> String {
        crate::blocks::payload_plain_text(&self.payload)
    }
}

/// Output of a markdown conversion: the arena of converted blocks plus the
/// order of the top-level ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedBlocks {
    pub root_ids: Vec<String>,
    pub arena: BTreeMap<String, RawBlock>,
}

impl ConvertedBlocks {
    pub fn from_blocks(root_ids: Vec<String>, blocks: Vec<RawBlock>) -> Self {
        let arena = blocks
            .into_iter()
            .map(|block| (block.block_id.clone(), block))
            .collect();
        Self { root_ids, arena }
    }

    pub fn is_empty(&self) -> bool {
        self.root_ids.is_empty() || self.arena.is_empty()
    }

    pub fn nest(&self) -> Vec<Block> {
        nest_blocks(&self.arena, &self.root_ids)
    }
}

/// Rebuild nested insert-shaped blocks from a flat arena.
///
/// Ids missing from the arena are dropped wherever they are referenced. Each
/// id is emitted at most once, which also stops cyclic child lists.
pub fn nest_blocks(arena: &BTreeMap<String, RawBlock>, root_ids: &[String]) -> Vec<Block> {
    if arena.is_empty() || root_ids.is_empty() {
        return Vec::new();
    }
    let mut visited = BTreeSet::new();
    resolve_all(arena, root_ids, &mut visited)
}

fn resolve_all<'a>(
    arena: &'a BTreeMap<String, RawBlock>,
    ids: &'a [String],
    visited: &mut BTreeSet<&'a str>,
) -> Vec<Block> {
    ids.iter()
        .filter_map(|id| resolve(arena, id, visited))
        .collect()
}

fn resolve<'a>(
    arena: &'a BTreeMap<String, RawBlock>,
    id: &'a str,
    visited: &mut BTreeSet<&'a str>,
) -> Option<Block> {
    let Some(raw) = arena.get(id) else {
        log::debug!("skipping unresolved block id {id}");
        return None;
    };
    if !visited.insert(id) {
        log::debug!("skipping repeated block id {id}");
        return None;
    }

    let children = resolve_all(arena, &raw.children, visited);
    Some(Block {
        block_type: raw.block_type,
        payload: raw.payload.clone(),
        children,
    })
}
