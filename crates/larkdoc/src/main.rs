use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use larkdoc_core::client::{DocsReadApi, LarkClient, WikiTarget};
use larkdoc_core::config::{Collaborator, parse_collaborator};
use larkdoc_core::docref::parse_document_ref;
use larkdoc_core::error::DocsError;
use larkdoc_core::runtime::{
    ResolutionContext, ResolvedSettings, RuntimeOverrides, WikiDefaults, resolve_settings,
};
use larkdoc_core::service::{
    AppendReport, CollaboratorOutcome, CollaboratorStatus, CreateOptions, UpdateReport,
    add_collaborators, append_document_content, create_document, delete_document,
    get_raw_content, read_document, replace_document_content, resolve_document_id,
};

#[derive(Debug, Parser)]
#[command(
    name = "larkdoc",
    version,
    about = "Create, read, update and delete cloud documents from the command line"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL", help = "Open API base URL")]
    base_url: Option<String>,
    #[arg(long, global = true, value_name = "ID")]
    app_id: Option<String>,
    #[arg(long, global = true, value_name = "SECRET")]
    app_secret: Option<String>,
    #[arg(long, global = true, value_name = "KEY")]
    tenant_key: Option<String>,
    #[arg(long, global = true, value_name = "TOKEN")]
    user_access_token: Option<String>,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Raise log verbosity")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    overrides: RuntimeOverrides,
    json: bool,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            overrides: RuntimeOverrides {
                config: cli.config.clone(),
                base_url: cli.base_url.clone(),
                app_id: cli.app_id.clone(),
                app_secret: cli.app_secret.clone(),
                tenant_key: cli.tenant_key.clone(),
                user_access_token: cli.user_access_token.clone(),
            },
            json: cli.json,
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create a document, optionally with content")]
    Create(CreateArgs),
    #[command(about = "Show a document's metadata or raw text")]
    Read(ReadArgs),
    #[command(about = "Append or replace content, or add collaborators")]
    Update(UpdateArgs),
    #[command(about = "Move a document to the recycle bin")]
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
struct ContentArgs {
    #[arg(long, value_name = "TEXT", conflicts_with = "content_file")]
    content: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read content from a file (`-` for stdin)")]
    content_file: Option<PathBuf>,
    #[arg(long, help = "Convert content from markdown")]
    markdown: bool,
}

impl ContentArgs {
    fn load(&self) -> Result<Option<String>> {
        if let Some(text) = &self.content {
            return Ok(Some(text.clone()));
        }
        let Some(path) = &self.content_file else {
            return Ok(None);
        };
        if path.as_os_str() == "-" {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read content from stdin")?;
            return Ok(Some(text));
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(text))
    }
}

#[derive(Debug, Args)]
struct CollaboratorArgs {
    #[arg(
        long = "collaborator",
        value_name = "TYPE:ID[:PERM]",
        help = "Grant access to a member (repeatable)"
    )]
    collaborators: Vec<String>,
    #[arg(long, help = "Notify collaborators granted by --collaborator")]
    notify: bool,
}

impl CollaboratorArgs {
    fn parse(&self) -> Result<Vec<Collaborator>> {
        self.collaborators
            .iter()
            .map(|value| {
                let mut collaborator = parse_collaborator(value)?;
                collaborator.notify = self.notify;
                Ok(collaborator)
            })
            .collect()
    }
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long, value_name = "TOKEN", help = "Folder to create the document in")]
    folder: Option<String>,
    #[command(flatten)]
    content: ContentArgs,
    #[arg(long, value_name = "ID", help = "Wiki space to move the document into")]
    wiki_space: Option<String>,
    #[arg(long, value_name = "TOKEN", help = "Parent wiki node for the move")]
    wiki_parent: Option<String>,
    #[arg(long, help = "Move into the configured wiki space")]
    move_to_wiki: bool,
    #[arg(long, conflicts_with_all = ["move_to_wiki", "wiki_space"], help = "Skip any wiki move")]
    no_wiki: bool,
    #[command(flatten)]
    collaborators: CollaboratorArgs,
    #[arg(long, help = "Skip LARK_DEFAULT_COLLABORATORS / configured collaborators")]
    no_default_collaborators: bool,
}

#[derive(Debug, Args)]
struct ReadArgs {
    target: String,
    #[arg(long, help = "Print the document's raw text content")]
    raw: bool,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    target: String,
    #[command(flatten)]
    content: ContentArgs,
    #[arg(long, help = "Replace existing content instead of appending")]
    replace: bool,
    #[command(flatten)]
    collaborators: CollaboratorArgs,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    target: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Create(args)) => run_create(&runtime, args),
        Some(Commands::Read(args)) => run_read(&runtime, args),
        Some(Commands::Update(args)) => run_update(&runtime, args),
        Some(Commands::Delete(args)) => run_delete(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run_create(runtime: &RuntimeOptions, args: CreateArgs) -> Result<()> {
    let settings = resolve_runtime_settings(runtime)?;
    let content = args.content.load()?;
    let wiki_target = wiki_target_for(&args, &settings.wiki)?;
    let mut collaborators = if args.no_default_collaborators {
        Vec::new()
    } else {
        settings.default_collaborators.clone()
    };
    collaborators.extend(args.collaborators.parse()?);

    let mut client = LarkClient::from_settings(&settings)?;
    let report = create_document(
        &mut client,
        &CreateOptions {
            title: args.title,
            folder_token: args.folder,
            content,
            markdown: args.content.markdown,
            wiki_target,
            collaborators,
            limits: settings.limits,
        },
    )?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("document create");
    println!("document_id: {}", report.document.document_id);
    println!("title: {}", report.document.title);
    println!("revision_id: {}", report.document.revision_id);
    if let Some(content) = &report.content {
        print_append_report("content", content);
    }
    if let Some(wiki) = &report.wiki {
        println!("wiki.space_id: {}", wiki.space_id);
        println!("wiki.status: {}", wiki.status.as_str());
        println!(
            "wiki.node_token: {}",
            wiki.node_token.as_deref().unwrap_or("<none>")
        );
        println!("wiki.original_deleted: {}", format_flag(wiki.original_deleted));
        if let Some(detail) = &wiki.detail {
            println!("wiki.detail: {detail}");
        }
    }
    print_collaborators(&report.collaborators);
    println!("request_count: {}", report.request_count);
    Ok(())
}

fn run_read(runtime: &RuntimeOptions, args: ReadArgs) -> Result<()> {
    let settings = resolve_runtime_settings(runtime)?;
    let reference = parse_document_ref(&args.target)?;
    let mut client = LarkClient::from_settings(&settings)?;
    let document_id = resolve_document_id(&mut client, &reference)?;

    if args.raw {
        let content = get_raw_content(&mut client, &document_id)?;
        if runtime.json {
            let payload = serde_json::json!({ "document_id": document_id, "content": content });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            print!("{content}");
            if !content.ends_with('\n') {
                println!();
            }
        }
        return Ok(());
    }

    let summary = read_document(&mut client, &document_id)?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("document read");
    println!("document_id: {}", summary.document.document_id);
    println!("title: {}", summary.document.title);
    println!("revision_id: {}", summary.document.revision_id);
    println!("root_block_id: {}", summary.root_block_id);
    println!("blocks.total: {}", summary.total_blocks);
    println!("blocks.top_level: {}", summary.top_level_blocks);
    for (kind, count) in &summary.by_kind {
        println!("blocks.kind.{kind}: {count}");
    }
    Ok(())
}

fn run_update(runtime: &RuntimeOptions, args: UpdateArgs) -> Result<()> {
    let settings = resolve_runtime_settings(runtime)?;
    let reference = parse_document_ref(&args.target)?;
    let content = args.content.load()?;
    let collaborators = args.collaborators.parse()?;
    if content.is_none() && collaborators.is_empty() {
        bail!("update requires --content, --content-file or --collaborator");
    }
    if args.replace && content.is_none() {
        bail!("--replace requires --content or --content-file");
    }

    let mut client = LarkClient::from_settings(&settings)?;
    let document_id = resolve_document_id(&mut client, &reference)?;
    let content = match content {
        Some(text) if args.replace => Some(replace_document_content(
            &mut client,
            &document_id,
            &text,
            args.content.markdown,
            &settings.limits,
        )?),
        Some(text) => Some(append_document_content(
            &mut client,
            &document_id,
            &text,
            args.content.markdown,
            &settings.limits,
        )?),
        None => None,
    };
    let collaborators = add_collaborators(&mut client, &document_id, &collaborators);
    let report = UpdateReport {
        document_id,
        content,
        collaborators,
        request_count: client.request_count(),
    };

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("document update");
    println!("document_id: {}", report.document_id);
    if let Some(content) = &report.content {
        print_append_report("content", content);
    }
    print_collaborators(&report.collaborators);
    println!("request_count: {}", report.request_count);
    Ok(())
}

fn run_delete(runtime: &RuntimeOptions, args: DeleteArgs) -> Result<()> {
    let settings = resolve_runtime_settings(runtime)?;
    let reference = parse_document_ref(&args.target)?;
    let mut client = LarkClient::from_settings(&settings)?;
    let document_id = resolve_document_id(&mut client, &reference)?;
    let report = delete_document(&mut client, &document_id)?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("document delete");
    println!("document_id: {}", report.document_id);
    println!("status: moved to recycle bin");
    println!("request_count: {}", report.request_count);
    Ok(())
}

fn wiki_target_for(args: &CreateArgs, defaults: &WikiDefaults) -> Result<Option<WikiTarget>> {
    if args.no_wiki {
        return Ok(None);
    }
    let requested = args.wiki_space.is_some() || args.move_to_wiki || defaults.auto_move;
    if !requested {
        return Ok(None);
    }

    let configured = defaults.target.as_ref();
    let Some(space_id) = args
        .wiki_space
        .clone()
        .or_else(|| configured.map(|target| target.space_id.clone()))
    else {
        return Err(DocsError::InvalidConfig(
            "wiki move requested but no space id (--wiki-space or LARK_WIKI_SPACE_ID)"
                .to_string(),
        )
        .into());
    };
    let parent_node_token = args
        .wiki_parent
        .clone()
        .or_else(|| configured.and_then(|target| target.parent_node_token.clone()));

    Ok(Some(WikiTarget {
        space_id,
        parent_node_token,
    }))
}

fn print_append_report(prefix: &str, report: &AppendReport) {
    println!("{prefix}.source: {}", report.source.as_str());
    println!("{prefix}.root_block_id: {}", report.root_block_id);
    println!("{prefix}.start_index: {}", report.start_index);
    if report.removed_blocks > 0 {
        println!("{prefix}.removed_blocks: {}", report.removed_blocks);
    }
    println!("{prefix}.blocks: {}", report.dispatch.inserted);
    println!("{prefix}.batches: {}", report.dispatch.batches.len());
}

fn print_collaborators(outcomes: &[CollaboratorOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    for outcome in outcomes {
        match outcome.status {
            CollaboratorStatus::Added => {
                println!("collaborator.added: {}", outcome.collaborator.label())
            }
            CollaboratorStatus::Failed => println!(
                "collaborator.failed: {} ({})",
                outcome.collaborator.label(),
                outcome.detail.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

fn resolve_runtime_settings(runtime: &RuntimeOptions) -> Result<ResolvedSettings> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let settings = resolve_settings(&context, &runtime.overrides)?;
    if runtime.diagnostics {
        eprintln!("[diagnostics]\n{}", settings.diagnostics());
    }
    Ok(settings)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use larkdoc_core::client::WikiTarget;
    use larkdoc_core::runtime::WikiDefaults;

    use super::{Cli, Commands, CreateArgs, wiki_target_for};

    fn create_args(extra: &[&str]) -> CreateArgs {
        let mut argv = vec!["larkdoc", "create", "--title", "Notes"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse").command {
            Some(Commands::Create(args)) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn configured(auto_move: bool) -> WikiDefaults {
        WikiDefaults {
            auto_move,
            target: Some(WikiTarget {
                space_id: "7001".to_string(),
                parent_node_token: Some("wikcnParent".to_string()),
            }),
        }
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "larkdoc",
            "read",
            "doxA",
            "--raw",
            "--app-id",
            "cli_1",
            "--json",
            "-vv",
        ])
        .expect("parse");
        assert_eq!(cli.app_id.as_deref(), Some("cli_1"));
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::Read(args)) => {
                assert_eq!(args.target, "doxA");
                assert!(args.raw);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn content_and_content_file_conflict() {
        let result = Cli::try_parse_from([
            "larkdoc",
            "update",
            "doxA",
            "--content",
            "x",
            "--content-file",
            "notes.md",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn collaborators_are_repeatable_and_pick_up_notify() {
        let args = create_args(&[
            "--collaborator",
            "openid:ou_1",
            "--collaborator",
            "email:a@example.com:view",
            "--notify",
        ]);
        let parsed = args.collaborators.parse().expect("collaborators");
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().all(|collaborator| collaborator.notify));
        assert_eq!(parsed[1].perm, "view");
    }

    #[test]
    fn wiki_move_follows_flags_then_auto_move() {
        let args = create_args(&[]);
        assert!(wiki_target_for(&args, &configured(false)).expect("target").is_none());
        let target = wiki_target_for(&args, &configured(true))
            .expect("target")
            .expect("auto move");
        assert_eq!(target.space_id, "7001");

        let args = create_args(&["--wiki-space", "8000"]);
        let target = wiki_target_for(&args, &configured(false))
            .expect("target")
            .expect("explicit");
        assert_eq!(target.space_id, "8000");
        assert_eq!(target.parent_node_token.as_deref(), Some("wikcnParent"));

        let args = create_args(&["--no-wiki"]);
        assert!(wiki_target_for(&args, &configured(true)).expect("target").is_none());
    }

    #[test]
    fn move_without_space_is_a_configuration_error() {
        let args = create_args(&["--move-to-wiki"]);
        assert!(wiki_target_for(&args, &WikiDefaults::default()).is_err());
    }
}
