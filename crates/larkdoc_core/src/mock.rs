use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use serde_json::{Map, json};

use crate::blocks::{BLOCK_TYPE_PAGE, Block};
use crate::client::{Document, DocsReadApi, DocsWriteApi, WikiNode, WikiTarget};
use crate::config::Collaborator;
use crate::error::DocsError;
use crate::reshape::{ConvertedBlocks, RawBlock};

#[derive(Debug, Clone)]
pub struct MockDocument {
    pub document: Document,
    pub children: Vec<Block>,
}

#[derive(Debug, Clone)]
pub struct InsertCall {
    pub document_id: String,
    pub parent_block_id: String,
    pub index: usize,
    pub blocks: Vec<Block>,
}

#[derive(Default)]
pub struct MockApi {
    pub documents: BTreeMap<String, MockDocument>,
    pub wiki_nodes: BTreeMap<String, WikiNode>,
    pub inserts: Vec<InsertCall>,
    pub insert_attempts: usize,
    pub fail_insert_on_call: Option<usize>,
    pub deleted_ranges: Vec<(String, usize, usize)>,
    pub converted: Option<ConvertedBlocks>,
    pub convert_calls: usize,
    pub fail_convert: bool,
    pub fail_wiki_move: bool,
    pub wiki_obj_token: Option<String>,
    pub moves: Vec<(String, WikiTarget)>,
    pub failing_members: BTreeSet<String>,
    pub member_attempts: Vec<String>,
    pub added_members: Vec<(String, Collaborator)>,
    pub deleted_files: Vec<String>,
    pub omit_root: bool,
    pub duplicate_root: bool,
    pub request_count: usize,
    created: usize,
}

impl MockApi {
    pub fn with_document(document_id: &str, existing_children: usize) -> Self {
        let mut api = Self::default();
        api.documents.insert(
            document_id.to_string(),
            MockDocument {
                document: Document {
                    document_id: document_id.to_string(),
                    title: format!("Doc {document_id}"),
                    revision_id: 1,
                    wiki_node_token: None,
                },
                children: (0..existing_children)
                    .map(|n| Block::text(&format!("existing {n}")))
                    .collect(),
            },
        );
        api
    }

    pub fn children(&self, document_id: &str) -> Vec<String> {
        self.documents
            .get(document_id)
            .map(|doc| doc.children.iter().map(Block::plain_text).collect())
            .unwrap_or_default()
    }

    fn document_mut(&mut self, document_id: &str) -> Result<&mut MockDocument> {
        self.documents
            .get_mut(document_id)
            .ok_or_else(|| DocsError::DocumentNotFound(document_id.to_string()).into())
    }
}

impl DocsReadApi for MockApi {
    fn get_document(&mut self, document_id: &str) -> Result<Document> {
        self.request_count += 1;
        Ok(self.document_mut(document_id)?.document.clone())
    }

    fn get_raw_content(&mut self, document_id: &str) -> Result<String> {
        self.request_count += 1;
        self.document_mut(document_id)?;
        Ok(self.children(document_id).join("\n"))
    }

    fn list_blocks(&mut self, document_id: &str) -> Result<Vec<RawBlock>> {
        self.request_count += 1;
        let omit_root = self.omit_root;
        let duplicate_root = self.duplicate_root;
        let doc = self.document_mut(document_id)?;

        let child_ids = (0..doc.children.len())
            .map(|n| format!("{document_id}_c{n}"))
            .collect::<Vec<_>>();
        let mut blocks = Vec::new();
        if !omit_root {
            let mut payload = Map::new();
            payload.insert("page".to_string(), json!({ "elements": [] }));
            blocks.push(RawBlock {
                block_id: document_id.to_string(),
                parent_id: String::new(),
                children: child_ids.clone(),
                block_type: BLOCK_TYPE_PAGE,
                payload,
            });
        }
        if duplicate_root {
            blocks.push(RawBlock {
                block_id: format!("{document_id}_page2"),
                parent_id: String::new(),
                children: Vec::new(),
                block_type: BLOCK_TYPE_PAGE,
                payload: Map::new(),
            });
        }
        for (id, child) in child_ids.into_iter().zip(&doc.children) {
            blocks.push(RawBlock {
                block_id: id,
                parent_id: document_id.to_string(),
                children: Vec::new(),
                block_type: child.block_type,
                payload: child.payload.clone(),
            });
        }
        Ok(blocks)
    }

    fn get_wiki_node(&mut self, node_token: &str) -> Result<WikiNode> {
        self.request_count += 1;
        self.wiki_nodes
            .get(node_token)
            .cloned()
            .ok_or_else(|| DocsError::DocumentNotFound(node_token.to_string()).into())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl DocsWriteApi for MockApi {
    fn create_document(&mut self, title: &str, _folder_token: Option<&str>) -> Result<Document> {
        self.request_count += 1;
        self.created += 1;
        let document = Document {
            document_id: format!("doxNew{}", self.created),
            title: title.to_string(),
            revision_id: 1,
            wiki_node_token: None,
        };
        self.documents.insert(
            document.document_id.clone(),
            MockDocument {
                document: document.clone(),
                children: Vec::new(),
            },
        );
        Ok(document)
    }

    fn insert_children(
        &mut self,
        document_id: &str,
        parent_block_id: &str,
        children: &[Block],
        index: usize,
    ) -> Result<()> {
        self.request_count += 1;
        self.insert_attempts += 1;
        if self.fail_insert_on_call == Some(self.insert_attempts) {
            bail!("document API request failed with HTTP 500");
        }
        let doc = self.document_mut(document_id)?;
        let at = index.min(doc.children.len());
        doc.children.splice(at..at, children.iter().cloned());
        self.inserts.push(InsertCall {
            document_id: document_id.to_string(),
            parent_block_id: parent_block_id.to_string(),
            index,
            blocks: children.to_vec(),
        });
        Ok(())
    }

    fn delete_children(
        &mut self,
        document_id: &str,
        _parent_block_id: &str,
        start_index: usize,
        end_index: usize,
    ) -> Result<()> {
        self.request_count += 1;
        let doc = self.document_mut(document_id)?;
        let end = end_index.min(doc.children.len());
        doc.children.drain(start_index.min(end)..end);
        self.deleted_ranges
            .push((document_id.to_string(), start_index, end_index));
        Ok(())
    }

    fn convert_markdown(&mut self, _markdown: &str) -> Result<ConvertedBlocks> {
        self.request_count += 1;
        self.convert_calls += 1;
        if self.fail_convert {
            bail!("failed to call document API: connection refused");
        }
        Ok(self.converted.clone().unwrap_or_default())
    }

    fn move_to_wiki(&mut self, document_id: &str, target: &WikiTarget) -> Result<WikiNode> {
        self.request_count += 1;
        if self.fail_wiki_move {
            bail!("API error [131006]: permission denied");
        }
        self.moves.push((document_id.to_string(), target.clone()));
        let node = WikiNode {
            node_token: format!("wikcn_{document_id}"),
            obj_token: self
                .wiki_obj_token
                .clone()
                .unwrap_or_else(|| document_id.to_string()),
            obj_type: "docx".to_string(),
            title: String::new(),
        };
        self.wiki_nodes.insert(node.node_token.clone(), node.clone());
        Ok(node)
    }

    fn add_member(&mut self, document_id: &str, collaborator: &Collaborator) -> Result<()> {
        self.request_count += 1;
        self.member_attempts.push(collaborator.member_id.clone());
        if self.failing_members.contains(&collaborator.member_id) {
            bail!("API error [1063001]: invalid member id");
        }
        self.added_members
            .push((document_id.to_string(), collaborator.clone()));
        Ok(())
    }

    fn delete_file(&mut self, document_id: &str) -> Result<()> {
        self.request_count += 1;
        if self.documents.remove(document_id).is_none() {
            return Err(DocsError::DocumentNotFound(document_id.to_string()).into());
        }
        self.deleted_files.push(document_id.to_string());
        Ok(())
    }
}
