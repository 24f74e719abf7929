use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DocsError;

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";
pub const DEFAULT_USER_AGENT: &str = "larkdoc/0.1";
pub const DEFAULT_PERM: &str = "edit";

/// On-disk settings. The app secret is deliberately absent: it only comes
/// from flags or the environment.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LarkConfig {
    #[serde(default)]
    pub lark: LarkSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub content: ContentSection,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LarkSection {
    pub base_url: Option<String>,
    pub app_id: Option<String>,
    pub tenant_key: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ContentSection {
    pub max_block_chars: Option<usize>,
    pub max_batch_blocks: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub auto_move: Option<bool>,
    pub space_id: Option<String>,
    pub parent_node_token: Option<String>,
}

/// A permission grant to apply to a document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Collaborator {
    pub member_type: String,
    pub member_id: String,
    #[serde(default = "default_perm")]
    pub perm: String,
    #[serde(default)]
    pub notify: bool,
}

fn default_perm() -> String {
    DEFAULT_PERM.to_string()
}

impl Collaborator {
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.member_type, self.member_id, self.perm)
    }
}

/// Load and parse a LarkConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<LarkConfig> {
    if !config_path.exists() {
        return Ok(LarkConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: LarkConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Parse `type:id[:perm]`.
pub fn parse_collaborator(value: &str) -> Result<Collaborator> {
    let parts = value.trim().split(':').map(str::trim).collect::<Vec<_>>();
    let (member_type, member_id, perm) = match parts.as_slice() {
        [member_type, member_id] => (*member_type, *member_id, DEFAULT_PERM),
        [member_type, member_id, perm] => (*member_type, *member_id, *perm),
        _ => {
            return Err(DocsError::InvalidConfig(format!(
                "collaborator must look like type:id[:perm], got `{value}`"
            ))
            .into());
        }
    };
    if member_type.is_empty() || member_id.is_empty() || perm.is_empty() {
        return Err(DocsError::InvalidConfig(format!(
            "collaborator has an empty field: `{value}`"
        ))
        .into());
    }
    Ok(Collaborator {
        member_type: member_type.to_string(),
        member_id: member_id.to_string(),
        perm: perm.to_string(),
        notify: false,
    })
}

/// Parse a comma-separated collaborator list; blank entries are ignored.
pub fn parse_collaborator_list(value: &str) -> Result<Vec<Collaborator>> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(parse_collaborator)
        .collect()
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
