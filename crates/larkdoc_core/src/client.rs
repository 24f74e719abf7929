use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::blocks::Block;
use crate::config::Collaborator;
use crate::error::DocsError;
use crate::reshape::{ConvertedBlocks, RawBlock};
use crate::runtime::{Credentials, ResolvedSettings};

const BLOCK_PAGE_SIZE: &str = "500";
const LATEST_REVISION: &str = "-1";
const WIKI_TASK_POLL_ATTEMPTS: usize = 10;
const WIKI_TASK_POLL_DELAY_MS: u64 = 1_000;

/// API codes the service uses for documents, files and wiki nodes that do
/// not exist (or were already deleted).
const NOT_FOUND_CODES: &[i64] = &[1_770_002, 1_770_003, 1_061_003, 1_061_007, 131_005];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub revision_id: i64,
    pub wiki_node_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiTarget {
    pub space_id: String,
    pub parent_node_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiNode {
    pub node_token: String,
    pub obj_token: String,
    pub obj_type: String,
    pub title: String,
}

pub trait DocsReadApi {
    fn get_document(&mut self, document_id: &str) -> Result<Document>;
    fn get_raw_content(&mut self, document_id: &str) -> Result<String>;
    fn list_blocks(&mut self, document_id: &str) -> Result<Vec<RawBlock>>;
    fn get_wiki_node(&mut self, node_token: &str) -> Result<WikiNode>;
    fn request_count(&self) -> usize;
}

pub trait DocsWriteApi: DocsReadApi {
    fn create_document(&mut self, title: &str, folder_token: Option<&str>) -> Result<Document>;
    fn insert_children(
        &mut self,
        document_id: &str,
        parent_block_id: &str,
        children: &[Block],
        index: usize,
    ) -> Result<()>;
    fn delete_children(
        &mut self,
        document_id: &str,
        parent_block_id: &str,
        start_index: usize,
        end_index: usize,
    ) -> Result<()>;
    fn convert_markdown(&mut self, markdown: &str) -> Result<ConvertedBlocks>;
    fn move_to_wiki(&mut self, document_id: &str, target: &WikiTarget) -> Result<WikiNode>;
    fn add_member(&mut self, document_id: &str, collaborator: &Collaborator) -> Result<()>;
    fn delete_file(&mut self, document_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LarkClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub credentials: Credentials,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl LarkClientConfig {
    pub fn from_settings(settings: &ResolvedSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            user_agent: settings.http.user_agent.clone(),
            credentials: settings.credentials.clone(),
            timeout_ms: settings.http.timeout_ms,
            rate_limit_ms: settings.http.rate_limit_ms,
            max_retries: settings.http.max_retries,
            max_write_retries: settings.http.max_write_retries,
            retry_delay_ms: settings.http.retry_delay_ms,
        }
    }
}

pub struct LarkClient {
    client: Client,
    config: LarkClientConfig,
    access_token: Option<String>,
    last_request_at: Option<Instant>,
    request_count: usize,
    wiki_poll_delay: Duration,
}

impl LarkClient {
    pub fn from_settings(settings: &ResolvedSettings) -> Result<Self> {
        settings.require_credentials()?;
        Self::new(LarkClientConfig::from_settings(settings))
    }

    pub fn new(config: LarkClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build document API HTTP client")?;

        Ok(Self {
            client,
            access_token: config.credentials.user_access_token.clone(),
            config,
            last_request_at: None,
            request_count: 0,
            wiki_poll_delay: Duration::from_millis(WIKI_TASK_POLL_DELAY_MS),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let raw = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url =
            Url::parse(&raw).with_context(|| format!("invalid API URL: {raw}"))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                if !value.is_empty() {
                    pairs.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }

    /// Send one request with rate limiting and retry on transient failures.
    /// Returns the final status and raw body for the caller to decode.
    ///
    /// Writes are resent only when the connection was never established; a
    /// timeout or gateway error may follow a committed write.
    fn send(
        &mut self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        bearer: Option<&str>,
        is_write: bool,
    ) -> Result<(StatusCode, String)> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header("User-Agent", self.config.user_agent.clone());
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !is_write && attempt < max_retries && is_retryable_status(status) {
                        log::debug!("{method} {} returned {status}; retrying", url.path());
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    let text = response
                        .text()
                        .context("failed to read document API response body")?;
                    return Ok((status, text));
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error, is_write) {
                        log::debug!("{method} {} failed: {error}; retrying", url.path());
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call document API");
                }
            }
        }

        bail!("document API request exhausted retry budget")
    }

    fn call<T: DeserializeOwned>(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        is_write: bool,
    ) -> Result<T> {
        let token = self.ensure_access_token()?;
        let url = self.endpoint(path, query)?;
        let (status, text) = self.send(method, url, body.as_ref(), Some(&token), is_write)?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(error) => {
                if !status.is_success() {
                    return Err(DocsError::Http {
                        status: status.as_u16(),
                        path: path.to_string(),
                    }
                    .into());
                }
                return Err(error)
                    .with_context(|| format!("failed to decode document API response for {path}"));
            }
        };
        if envelope.code != 0 {
            return Err(DocsError::Api {
                code: envelope.code,
                msg: envelope.msg,
            }
            .into());
        }
        match envelope.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(Value::Null)
                .with_context(|| format!("missing data in document API response for {path}")),
        }
    }

    fn ensure_access_token(&mut self) -> Result<String> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }

        let credentials = &self.config.credentials;
        let (Some(app_id), Some(app_secret)) = (&credentials.app_id, &credentials.app_secret)
        else {
            return Err(DocsError::MissingCredential(
                "app id and app secret, or a user access token".to_string(),
            )
            .into());
        };
        let mut body = json!({ "app_id": app_id, "app_secret": app_secret });
        if let Some(tenant_key) = &credentials.tenant_key {
            body["tenant_key"] = Value::String(tenant_key.clone());
        }

        let url = self.endpoint("auth/v3/tenant_access_token/internal", &[])?;
        let (status, text) = self.send(Method::POST, url, Some(&body), None, false)?;
        let parsed: TenantTokenResponse = serde_json::from_str(&text).with_context(|| {
            format!("failed to decode tenant access token response (HTTP {status})")
        })?;
        if parsed.code != 0 {
            return Err(DocsError::Api {
                code: parsed.code,
                msg: parsed.msg,
            })
            .context("tenant access token exchange failed");
        }
        let token = parsed
            .tenant_access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow::anyhow!("tenant access token missing from response"))?;
        log::debug!("obtained tenant access token");
        self.access_token = Some(token.clone());
        Ok(token)
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn poll_wiki_move(&mut self, task_id: &str) -> Result<WikiNode> {
        for attempt in 0..WIKI_TASK_POLL_ATTEMPTS {
            if attempt > 0 {
                sleep(self.wiki_poll_delay);
            }
            let data: TaskData = self.call(
                Method::GET,
                &format!("wiki/v2/tasks/{task_id}"),
                &[("task_type", "move".to_string())],
                None,
                false,
            )?;
            let Some(result) = data.task.move_result.into_iter().next() else {
                continue;
            };
            match result.status {
                0 => return Ok(result.node.into_wiki_node()),
                1 => continue,
                _ => bail!(
                    "wiki move task {task_id} failed: {}",
                    result
                        .status_msg
                        .unwrap_or_else(|| "unknown error".to_string())
                ),
            }
        }
        bail!("wiki move task {task_id} did not finish after {WIKI_TASK_POLL_ATTEMPTS} polls")
    }
}

impl DocsReadApi for LarkClient {
    fn get_document(&mut self, document_id: &str) -> Result<Document> {
        let data: DocumentData = self
            .call(
                Method::GET,
                &format!("docx/v1/documents/{document_id}"),
                &[],
                None,
                false,
            )
            .map_err(|error| not_found_as(error, document_id))?;
        Ok(data.document.into_document())
    }

    fn get_raw_content(&mut self, document_id: &str) -> Result<String> {
        let data: RawContentData = self
            .call(
                Method::GET,
                &format!("docx/v1/documents/{document_id}/raw_content"),
                &[],
                None,
                false,
            )
            .map_err(|error| not_found_as(error, document_id))?;
        Ok(data.content)
    }

    fn list_blocks(&mut self, document_id: &str) -> Result<Vec<RawBlock>> {
        let mut blocks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("page_size", BLOCK_PAGE_SIZE.to_string()),
                ("document_revision_id", LATEST_REVISION.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }
            let data: BlockListData = self
                .call(
                    Method::GET,
                    &format!("docx/v1/documents/{document_id}/blocks"),
                    &query,
                    None,
                    false,
                )
                .map_err(|error| not_found_as(error, document_id))?;
            blocks.extend(data.items);

            page_token = data.page_token.filter(|token| !token.is_empty());
            if !data.has_more || page_token.is_none() {
                break;
            }
        }

        Ok(blocks)
    }

    fn get_wiki_node(&mut self, node_token: &str) -> Result<WikiNode> {
        let data: NodeData = self
            .call(
                Method::GET,
                "wiki/v2/spaces/get_node",
                &[("token", node_token.to_string())],
                None,
                false,
            )
            .map_err(|error| not_found_as(error, node_token))?;
        Ok(data.node.into_wiki_node())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl DocsWriteApi for LarkClient {
    fn create_document(&mut self, title: &str, folder_token: Option<&str>) -> Result<Document> {
        let mut body = json!({ "title": title });
        if let Some(folder) = folder_token.filter(|folder| !folder.is_empty()) {
            body["folder_token"] = Value::String(folder.to_string());
        }
        let data: DocumentData =
            self.call(Method::POST, "docx/v1/documents", &[], Some(body), true)?;
        Ok(data.document.into_document())
    }

    fn insert_children(
        &mut self,
        document_id: &str,
        parent_block_id: &str,
        children: &[Block],
        index: usize,
    ) -> Result<()> {
        let body = json!({ "children": children, "index": index });
        let _: Value = self.call(
            Method::POST,
            &format!("docx/v1/documents/{document_id}/blocks/{parent_block_id}/children"),
            &[("document_revision_id", LATEST_REVISION.to_string())],
            Some(body),
            true,
        )?;
        Ok(())
    }

    fn delete_children(
        &mut self,
        document_id: &str,
        parent_block_id: &str,
        start_index: usize,
        end_index: usize,
    ) -> Result<()> {
        let body = json!({ "start_index": start_index, "end_index": end_index });
        let _: Value = self.call(
            Method::DELETE,
            &format!(
                "docx/v1/documents/{document_id}/blocks/{parent_block_id}/children/batch_delete"
            ),
            &[("document_revision_id", LATEST_REVISION.to_string())],
            Some(body),
            true,
        )?;
        Ok(())
    }

    fn convert_markdown(&mut self, markdown: &str) -> Result<ConvertedBlocks> {
        let body = json!({ "content_type": "markdown", "content": markdown });
        let data: ConvertData = self.call(
            Method::POST,
            "docx/v1/documents/blocks/convert",
            &[],
            Some(body),
            false,
        )?;
        Ok(ConvertedBlocks::from_blocks(
            data.first_level_block_ids,
            data.blocks,
        ))
    }

    fn move_to_wiki(&mut self, document_id: &str, target: &WikiTarget) -> Result<WikiNode> {
        let mut body = json!({ "obj_type": "docx", "obj_token": document_id });
        if let Some(parent) = &target.parent_node_token {
            body["parent_wiki_token"] = Value::String(parent.clone());
        }
        let data: MoveData = self.call(
            Method::POST,
            &format!("wiki/v2/spaces/{}/nodes/move_docs_to_wiki", target.space_id),
            &[],
            Some(body),
            true,
        )?;

        if let Some(wiki_token) = data.wiki_token.filter(|token| !token.is_empty()) {
            return self.get_wiki_node(&wiki_token);
        }
        if let Some(task_id) = data.task_id.filter(|task| !task.is_empty()) {
            return self.poll_wiki_move(&task_id);
        }
        bail!("wiki move response carried neither a wiki token nor a task id")
    }

    fn add_member(&mut self, document_id: &str, collaborator: &Collaborator) -> Result<()> {
        let body = json!({
            "member_type": collaborator.member_type,
            "member_id": collaborator.member_id,
            "perm": collaborator.perm,
        });
        let _: Value = self.call(
            Method::POST,
            &format!("drive/v1/permissions/{document_id}/members"),
            &[
                ("type", "docx".to_string()),
                ("need_notification", collaborator.notify.to_string()),
            ],
            Some(body),
            true,
        )?;
        Ok(())
    }

    fn delete_file(&mut self, document_id: &str) -> Result<()> {
        let _: Value = self
            .call(
                Method::DELETE,
                &format!("drive/v1/files/{document_id}"),
                &[("type", "docx".to_string())],
                None,
                true,
            )
            .map_err(|error| not_found_as(error, document_id))?;
        Ok(())
    }
}

fn not_found_as(error: anyhow::Error, id: &str) -> anyhow::Error {
    match error.downcast_ref::<DocsError>() {
        Some(DocsError::Api { code, .. }) if NOT_FOUND_CODES.contains(code) => {
            DocsError::DocumentNotFound(id.to_string()).into()
        }
        Some(DocsError::Http { status: 404, .. }) => {
            DocsError::DocumentNotFound(id.to_string()).into()
        }
        _ => error,
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error, is_write: bool) -> bool {
    if is_write {
        return error.is_connect();
    }
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentData {
    document: DocumentPayload,
}

#[derive(Debug, Deserialize)]
struct DocumentPayload {
    document_id: String,
    #[serde(default)]
    revision_id: i64,
    #[serde(default)]
    title: String,
}

impl DocumentPayload {
    fn into_document(self) -> Document {
        Document {
            document_id: self.document_id,
            title: self.title,
            revision_id: self.revision_id,
            wiki_node_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawContentData {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct BlockListData {
    #[serde(default)]
    items: Vec<RawBlock>,
    #[serde(default)]
    has_more: bool,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConvertData {
    #[serde(default)]
    first_level_block_ids: Vec<String>,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct MoveData {
    wiki_token: Option<String>,
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodeData {
    node: NodePayload,
}

#[derive(Debug, Deserialize)]
struct NodePayload {
    node_token: String,
    #[serde(default)]
    obj_token: String,
    #[serde(default)]
    obj_type: String,
    #[serde(default)]
    title: String,
}

impl NodePayload {
    fn into_wiki_node(self) -> WikiNode {
        WikiNode {
            node_token: self.node_token,
            obj_token: self.obj_token,
            obj_type: self.obj_type,
            title: self.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task: TaskPayload,
}

#[derive(Debug, Deserialize)]
struct TaskPayload {
    #[serde(default)]
    move_result: Vec<MoveResult>,
}

#[derive(Debug, Deserialize)]
struct MoveResult {
    node: NodePayload,
    status: i64,
    status_msg: Option<String>,
}
