use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::blocks::{ContentLimits, DEFAULT_MAX_BATCH_BLOCKS, DEFAULT_MAX_BLOCK_CHARS};
use crate::client::WikiTarget;
use crate::config::{
    Collaborator, DEFAULT_BASE_URL, DEFAULT_USER_AGENT, LarkConfig, load_config,
    parse_collaborator_list, parse_flag,
};
use crate::error::DocsError;

pub const CONFIG_ENV: &str = "LARKDOC_CONFIG";
pub const DEFAULT_CONFIG_RELATIVE: &str = ".larkdoc/config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub config: Option<PathBuf>,
    pub base_url: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub tenant_key: Option<String>,
    pub user_access_token: Option<String>,
}

/// Process state the resolver reads: working directory and a snapshot of
/// the environment.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let env = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Ok(Self { cwd, env })
    }

    /// Trimmed, non-empty environment value.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub tenant_key: Option<String>,
    pub user_access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
    pub rate_limit_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
            rate_limit_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WikiDefaults {
    pub auto_move: bool,
    pub target: Option<WikiTarget>,
}

#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub config_path: PathBuf,
    pub config_source: ValueSource,
    pub base_url: String,
    pub base_url_source: ValueSource,
    pub credentials: Credentials,
    pub credential_sources: BTreeMap<&'static str, ValueSource>,
    pub http: HttpSettings,
    pub limits: ContentLimits,
    pub wiki: WikiDefaults,
    pub default_collaborators: Vec<Collaborator>,
}

impl ResolvedSettings {
    /// Fails before any network activity when no usable credential resolved.
    pub fn require_credentials(&self) -> Result<()> {
        let credentials = &self.credentials;
        if credentials.user_access_token.is_some() {
            return Ok(());
        }
        match (&credentials.app_id, &credentials.app_secret) {
            (Some(_), Some(_)) => Ok(()),
            (None, _) => Err(DocsError::MissingCredential(
                "app id (--app-id or LARK_APP_ID)".to_string(),
            )
            .into()),
            (_, None) => Err(DocsError::MissingCredential(
                "app secret (--app-secret or LARK_APP_SECRET)".to_string(),
            )
            .into()),
        }
    }

    pub fn diagnostics(&self) -> String {
        let mut lines = vec![
            format!(
                "config_path={} ({})",
                normalize_for_display(&self.config_path),
                self.config_source.as_str()
            ),
            format!(
                "base_url={} ({})",
                self.base_url,
                self.base_url_source.as_str()
            ),
        ];
        for (name, source) in &self.credential_sources {
            lines.push(format!("{name}=<set> ({})", source.as_str()));
        }
        lines.push(format!(
            "http.timeout_ms={} http.retries={} http.write_retries={}",
            self.http.timeout_ms, self.http.max_retries, self.http.max_write_retries
        ));
        lines.push(format!(
            "limits.max_block_chars={} limits.max_batch_blocks={}",
            self.limits.max_block_chars, self.limits.max_batch_blocks
        ));
        lines.push(format!(
            "wiki.auto_move={} wiki.space_id={}",
            self.wiki.auto_move,
            self.wiki
                .target
                .as_ref()
                .map(|target| target.space_id.as_str())
                .unwrap_or("<none>")
        ));
        lines.push(format!(
            "default_collaborators={}",
            self.default_collaborators.len()
        ));
        lines.join("\n")
    }
}

pub fn resolve_settings(
    context: &ResolutionContext,
    overrides: &RuntimeOverrides,
) -> Result<ResolvedSettings> {
    let (config_path, config_source) = resolve_config_path(context, overrides);
    let config = load_config(&config_path)?;
    resolve_with_config(context, overrides, config_path, config_source, &config)
}

fn resolve_config_path(
    context: &ResolutionContext,
    overrides: &RuntimeOverrides,
) -> (PathBuf, ValueSource) {
    if let Some(path) = &overrides.config {
        return (absolutize(&context.cwd, path), ValueSource::Flag);
    }
    if let Some(path) = context.var(CONFIG_ENV) {
        return (absolutize(&context.cwd, Path::new(path)), ValueSource::Env);
    }
    (context.cwd.join(DEFAULT_CONFIG_RELATIVE), ValueSource::Default)
}

fn resolve_with_config(
    context: &ResolutionContext,
    overrides: &RuntimeOverrides,
    config_path: PathBuf,
    config_source: ValueSource,
    config: &LarkConfig,
) -> Result<ResolvedSettings> {
    let (base_url, base_url_source) = layered(
        overrides.base_url.as_deref(),
        context.var("LARK_BASE_URL"),
        config.lark.base_url.as_deref(),
    )
    .unwrap_or_else(|| (DEFAULT_BASE_URL.to_string(), ValueSource::Default));

    let mut credential_sources = BTreeMap::new();
    let mut credential = |name: &'static str, value: Option<(String, ValueSource)>| {
        value.map(|(value, source)| {
            credential_sources.insert(name, source);
            value
        })
    };
    let credentials = Credentials {
        app_id: credential(
            "app_id",
            layered(
                overrides.app_id.as_deref(),
                context.var("LARK_APP_ID"),
                config.lark.app_id.as_deref(),
            ),
        ),
        app_secret: credential(
            "app_secret",
            layered(
                overrides.app_secret.as_deref(),
                context.var("LARK_APP_SECRET"),
                None,
            ),
        ),
        tenant_key: credential(
            "tenant_key",
            layered(
                overrides.tenant_key.as_deref(),
                context.var("LARK_TENANT_KEY"),
                config.lark.tenant_key.as_deref(),
            ),
        ),
        user_access_token: credential(
            "user_access_token",
            layered(
                overrides.user_access_token.as_deref(),
                context.var("LARK_USER_ACCESS_TOKEN"),
                None,
            ),
        ),
    };

    let defaults = HttpSettings::default();
    let http = HttpSettings {
        user_agent: context
            .var("LARK_USER_AGENT")
            .map(ToString::to_string)
            .or_else(|| config.lark.user_agent.clone())
            .unwrap_or(defaults.user_agent),
        timeout_ms: number(context, "LARK_HTTP_TIMEOUT_MS", config.http.timeout_ms)?
            .unwrap_or(defaults.timeout_ms),
        max_retries: number(context, "LARK_HTTP_RETRIES", config.http.retries)?
            .unwrap_or(defaults.max_retries),
        max_write_retries: number(context, "LARK_HTTP_WRITE_RETRIES", config.http.write_retries)?
            .unwrap_or(defaults.max_write_retries),
        retry_delay_ms: number(context, "LARK_HTTP_RETRY_DELAY_MS", config.http.retry_delay_ms)?
            .unwrap_or(defaults.retry_delay_ms),
        rate_limit_ms: number(context, "LARK_RATE_LIMIT_MS", config.http.rate_limit_ms)?
            .unwrap_or(defaults.rate_limit_ms),
    };

    let limits = ContentLimits {
        max_block_chars: number(
            context,
            "LARK_MAX_BLOCK_CHARS",
            config.content.max_block_chars,
        )?
        .unwrap_or(DEFAULT_MAX_BLOCK_CHARS),
        max_batch_blocks: number(
            context,
            "LARK_MAX_BATCH_BLOCKS",
            config.content.max_batch_blocks,
        )?
        .unwrap_or(DEFAULT_MAX_BATCH_BLOCKS),
    };
    limits.validate()?;

    let auto_move = match context.var("LARK_WIKI_AUTO_MOVE") {
        Some(value) => parse_flag(value).ok_or_else(|| {
            DocsError::InvalidConfig(format!("LARK_WIKI_AUTO_MOVE is not a boolean: {value}"))
        })?,
        None => config.wiki.auto_move.unwrap_or(false),
    };
    let space_id = context
        .var("LARK_WIKI_SPACE_ID")
        .map(ToString::to_string)
        .or_else(|| config.wiki.space_id.clone());
    let parent_node_token = context
        .var("LARK_WIKI_PARENT_NODE")
        .map(ToString::to_string)
        .or_else(|| config.wiki.parent_node_token.clone());
    let wiki = WikiDefaults {
        auto_move,
        target: space_id.map(|space_id| WikiTarget {
            space_id,
            parent_node_token,
        }),
    };

    let default_collaborators = match context.var("LARK_DEFAULT_COLLABORATORS") {
        Some(value) => parse_collaborator_list(value)
            .context("failed to parse LARK_DEFAULT_COLLABORATORS")?,
        None => config.collaborators.clone(),
    };

    Ok(ResolvedSettings {
        config_path,
        config_source,
        base_url,
        base_url_source,
        credentials,
        credential_sources,
        http,
        limits,
        wiki,
        default_collaborators,
    })
}

fn layered(
    flag: Option<&str>,
    env: Option<&str>,
    config: Option<&str>,
) -> Option<(String, ValueSource)> {
    let candidates = [
        (flag, ValueSource::Flag),
        (env, ValueSource::Env),
        (config, ValueSource::Config),
    ];
    candidates.into_iter().find_map(|(value, source)| {
        let value = value?.trim();
        (!value.is_empty()).then(|| (value.to_string(), source))
    })
}

fn number<T: FromStr + Copy>(
    context: &ResolutionContext,
    key: &str,
    config_value: Option<T>,
) -> Result<Option<T>> {
    match context.var(key) {
        Some(value) => value.parse::<T>().map(Some).map_err(|_| {
            DocsError::InvalidConfig(format!("{key} is not a valid number: {value}")).into()
        }),
        None => Ok(config_value),
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
