use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

use palaver::client::AssistantClient;
use palaver::config::{self, ApiConfig};
use palaver::protocol::{ChatRole, TaskSpec};
use palaver::reasoning_parser::split_reasoning;
use palaver::session::{ChatSession, SessionUpdate, TaskSession, TaskUpdate};
use palaver::{providers, TaskStatus};

#[derive(Parser)]
#[command(name = "palaver", version, about = "Streaming chat client for LLM assistant backends")]
struct Cli {
    /// Server base URL (overrides the configured one)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message and stream the reply
    Chat {
        message: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Agent to route the turn through
        #[arg(long)]
        agent: Option<String>,
        /// Continue an existing chat
        #[arg(long)]
        chat_id: Option<String>,
        /// Attach an image file (repeatable)
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Print the reasoning trace while it streams
        #[arg(long)]
        show_thinking: bool,
    },
    /// Sub-task batches under a parent chat
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
    /// Server-side chat history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Model-provider catalog
    Providers {
        #[command(subcommand)]
        command: ProvidersCommand,
    },
    /// Agents configured on the server
    Agents,
    /// MCP tools exposed by the server
    Mcp {
        #[command(subcommand)]
        command: McpCommand,
    },
    /// Local client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum TasksCommand {
    /// Run a batch of tasks from a JSON file and stream their progress
    Run {
        file: PathBuf,
        #[arg(long)]
        chat_id: String,
    },
    /// Ask the server to cancel one task
    Cancel {
        #[arg(long)]
        chat_id: String,
        #[arg(long)]
        task_id: String,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    List,
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Drop every message after the first `keep`
    Truncate {
        id: String,
        #[arg(long, default_value_t = 0)]
        keep: usize,
    },
}

#[derive(Subcommand)]
enum ProvidersCommand {
    List,
    Test { name: String },
    /// Remember a provider/model pair as the default selection
    Use { provider: String, model: String },
}

#[derive(Subcommand)]
enum McpCommand {
    List,
    Enable { name: String },
    Disable { name: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Set {
        #[arg(long)]
        server_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = config::default_config_path();
    let mut cfg = config::load_config(&config_path);
    if let Some(server) = cli.server.clone() {
        cfg.server_url = server;
    }
    let client = AssistantClient::new(cfg.server_url.clone(), reqwest::Client::new(), cfg.api_key.clone());

    let result = match cli.command {
        Command::Chat {
            message,
            provider,
            model,
            agent,
            chat_id,
            images,
            show_thinking,
        } => {
            run_chat(
                &client,
                &config_path,
                &mut cfg,
                message,
                provider,
                model,
                agent,
                chat_id,
                images,
                show_thinking,
            )
            .await
        }
        Command::Tasks { command } => match command {
            TasksCommand::Run { file, chat_id } => run_tasks(&client, file, chat_id).await,
            TasksCommand::Cancel { chat_id, task_id } => {
                client.cancel_task(&chat_id, &task_id).await.map(|()| {
                    println!("Cancellation requested for task {}", task_id);
                })
            }
        },
        Command::History { command } => run_history(&client, command).await,
        Command::Providers { command } => run_providers(&cfg, &config_path, command).await,
        Command::Agents => run_agents(&client).await,
        Command::Mcp { command } => run_mcp(&client, command).await,
        Command::Config { command } => run_config(&config_path, &mut cfg, command),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_chat(
    client: &AssistantClient,
    config_path: &std::path::Path,
    cfg: &mut ApiConfig,
    message: String,
    provider: Option<String>,
    model: Option<String>,
    agent: Option<String>,
    chat_id: Option<String>,
    images: Vec<PathBuf>,
    show_thinking: bool,
) -> Result<(), String> {
    let provider = provider
        .or_else(|| cfg.selected_provider.clone())
        .ok_or("No provider selected; pass --provider or `palaver providers use`")?;
    let model = model
        .or_else(|| cfg.selected_model.clone())
        .ok_or("No model selected; pass --model or `palaver providers use`")?;
    config::remember_selection(config_path, cfg, &provider, &model)?;

    let images = encode_images(&images)?;

    let mut session = ChatSession::new();
    if let Some(id) = chat_id {
        session.transcript.adopt_chat_id(&id);
    }
    session
        .start_turn(client, message, images, agent, &provider, &model)
        .await?;

    // Elapsed ticker on stderr; goes quiet once the stream produces output.
    let started = std::time::Instant::now();
    let output_started = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ticker_flag = output_started.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await;
        loop {
            interval.tick().await;
            if !ticker_flag.load(std::sync::atomic::Ordering::Relaxed) {
                eprint!("\r[{}s] ", started.elapsed().as_secs());
            }
        }
    });
    session.set_ticker(ticker.abort_handle());

    let mut printed_content = String::new();
    let mut printed_thought = String::new();

    while session.streaming {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                eprintln!("\n[SESSION] Cancelled");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(16)) => {}
        }

        for update in session.drain_updates() {
            match update {
                SessionUpdate::HistoryRefresh => {
                    if let Some(id) = session.transcript.chat_id() {
                        eprintln!("[SESSION] chat id {}", id);
                    }
                }
                SessionUpdate::Delta(msg) => {
                    output_started.store(true, std::sync::atomic::Ordering::Relaxed);
                    let split = split_reasoning(&msg.content);
                    if show_thinking {
                        if let Some(thought) = &split.thought {
                            print_growing(&mut printed_thought, thought, true);
                        }
                    }
                    print_growing(&mut printed_content, &split.content, false);
                }
                SessionUpdate::Error(e) => {
                    eprintln!("\n[SESSION] Turn failed: {}", e);
                }
                SessionUpdate::Done(msg) => {
                    println!();
                    if let Some(ttft) = msg.time_to_first_token_ms {
                        eprint!("[STATS] first token {}ms", ttft);
                        if let Some(total) = msg.total_duration_ms {
                            eprint!(", total {}ms", total);
                        }
                        if let Some(tokens) = msg.total_tokens {
                            eprint!(", {} tokens", tokens);
                        }
                        if let Some(tps) = msg.tps {
                            eprint!(", {:.1} tok/s", tps);
                        }
                        eprintln!();
                    }
                    if let Some(citations) = &msg.citations {
                        for citation in citations {
                            match (citation.start_line, citation.end_line) {
                                (Some(start), Some(end)) => {
                                    eprintln!("[CITE] {}:{}-{}", citation.path, start, end)
                                }
                                _ => eprintln!("[CITE] {}", citation.path),
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Print only what grew since the last call; falls back to a full reprint if
/// the text was rewritten (e.g. an inline error line).
fn print_growing(printed: &mut String, current: &str, to_stderr: bool) {
    if current == printed {
        return;
    }
    let mut out: Box<dyn std::io::Write> = if to_stderr {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    };
    match current.strip_prefix(printed.as_str()) {
        Some(suffix) => {
            let _ = write!(out, "{}", suffix);
        }
        None => {
            let _ = write!(out, "\n{}", current);
        }
    }
    let _ = out.flush();
    *printed = current.to_string();
}

async fn run_tasks(client: &AssistantClient, file: PathBuf, chat_id: String) -> Result<(), String> {
    let raw = std::fs::read_to_string(&file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let specs: Vec<TaskSpec> =
        serde_json::from_str(&raw).map_err(|e| format!("Invalid task file: {}", e))?;

    let mut session = TaskSession::start(client, chat_id, specs).await?;
    eprintln!(
        "[TASKS] Streaming {} task(s), trace {}",
        session.lifecycle().len(),
        session.lifecycle().trace_id()
    );

    while session.streaming {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.cancel_stream();
                eprintln!("[TASKS] Stopped watching (tasks keep running server-side)");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        for update in session.drain_updates() {
            print_task_update(&update);
        }
        for update in session.enforce_deadlines(chrono::Utc::now().timestamp()) {
            print_task_update(&update);
        }
    }

    println!("---");
    for task in session.lifecycle().snapshot() {
        let marker = match task.status {
            TaskStatus::Completed => "ok",
            TaskStatus::Failed | TaskStatus::Cancelled => "failed",
            _ => "pending",
        };
        match &task.error {
            Some(err) => println!("{:7} {}  {} ({})", marker, task.id, task.status.as_str(), err),
            None => println!("{:7} {}  {}", marker, task.id, task.status.as_str()),
        }
        if let Some(output) = &task.output {
            println!("        {}", output);
        }
    }
    Ok(())
}

fn print_task_update(update: &TaskUpdate) {
    match update {
        TaskUpdate::Status(task) => match &task.error {
            Some(err) => println!("task {} -> {} ({})", task.id, task.status.as_str(), err),
            None => println!("task {} -> {}", task.id, task.status.as_str()),
        },
        TaskUpdate::BatchDone(tasks) => {
            let done = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
            println!("batch summary: {}/{} completed", done, tasks.len());
        }
        TaskUpdate::Error(e) => eprintln!("[TASKS] Stream error: {}", e),
    }
}

async fn run_history(client: &AssistantClient, command: HistoryCommand) -> Result<(), String> {
    match command {
        HistoryCommand::List => {
            for chat in client.list_chats().await? {
                let count = chat
                    .message_count
                    .map(|n| format!("{} msgs", n))
                    .unwrap_or_default();
                println!("{}  {}  {}", chat.id, chat.title, count);
            }
        }
        HistoryCommand::Show { id } => {
            let chat = client.get_chat(&id).await?;
            for msg in &chat.messages {
                match msg.role {
                    ChatRole::User => println!("> {}", msg.content),
                    ChatRole::Assistant => {
                        let split = split_reasoning(&msg.content);
                        if let Some(thought) = &split.thought {
                            if !thought.is_empty() {
                                println!("  [reasoning] {}", thought);
                            }
                        }
                        println!("{}", split.content);
                    }
                }
                println!();
            }
        }
        HistoryCommand::Delete { id } => {
            client.delete_chat(&id).await?;
            println!("Deleted {}", id);
        }
        HistoryCommand::Truncate { id, keep } => {
            client.truncate_chat(&id, keep).await?;
            println!("Truncated {} to {} message(s)", id, keep);
        }
    }
    Ok(())
}

async fn run_agents(client: &AssistantClient) -> Result<(), String> {
    for agent in client.list_agents().await? {
        println!("{}  {}", agent.id, agent.name);
        if let Some(desc) = agent.description {
            println!("    {}", desc);
        }
    }
    Ok(())
}

async fn run_providers(
    cfg: &ApiConfig,
    config_path: &std::path::Path,
    command: ProvidersCommand,
) -> Result<(), String> {
    match command {
        ProvidersCommand::List => {
            let catalog = providers::get_catalog(&cfg.server_url, &cfg.api_key).await;
            if catalog.is_empty() {
                println!("No providers available");
            }
            for provider in catalog {
                println!("{}", provider.name);
                for model in &provider.models {
                    let marker = if provider.default_model.as_deref() == Some(&model.id) {
                        "*"
                    } else {
                        " "
                    };
                    println!("  {} {}  {}", marker, model.id, model.name);
                }
            }
        }
        ProvidersCommand::Test { name } => {
            providers::test_connection(&cfg.server_url, &cfg.api_key, &name).await?;
            println!("Provider {} is reachable", name);
        }
        ProvidersCommand::Use { provider, model } => {
            let mut cfg = config::load_config(config_path);
            config::remember_selection(config_path, &mut cfg, &provider, &model)?;
            println!("Default selection: {} / {}", provider, model);
        }
    }
    Ok(())
}

async fn run_mcp(client: &AssistantClient, command: McpCommand) -> Result<(), String> {
    match command {
        McpCommand::List => {
            for tool in client.list_mcp_tools().await? {
                let state = if tool.enabled { "enabled" } else { "disabled" };
                match &tool.server {
                    Some(server) => println!("{}  ({})  {}", tool.name, server, state),
                    None => println!("{}  {}", tool.name, state),
                }
            }
        }
        McpCommand::Enable { name } => {
            client.toggle_mcp_tool(&name, true).await?;
            println!("Enabled {}", name);
        }
        McpCommand::Disable { name } => {
            client.toggle_mcp_tool(&name, false).await?;
            println!("Disabled {}", name);
        }
    }
    Ok(())
}

fn run_config(
    config_path: &std::path::Path,
    cfg: &mut ApiConfig,
    command: ConfigCommand,
) -> Result<(), String> {
    match command {
        ConfigCommand::Show => {
            println!("server_url: {}", cfg.server_url);
            println!(
                "api_key: {}",
                if cfg.api_key.is_empty() { "(unset)" } else { "(set)" }
            );
            println!(
                "selection: {} / {}",
                cfg.selected_provider.as_deref().unwrap_or("(none)"),
                cfg.selected_model.as_deref().unwrap_or("(none)")
            );
            Ok(())
        }
        ConfigCommand::Set { server_url, api_key } => {
            if let Some(url) = server_url {
                cfg.server_url = url;
            }
            if let Some(key) = api_key {
                cfg.api_key = key;
            }
            config::save_config(config_path, cfg)?;
            println!("Saved {}", config_path.display());
            Ok(())
        }
    }
}

fn encode_images(paths: &[PathBuf]) -> Result<Option<Vec<String>>, String> {
    if paths.is_empty() {
        return Ok(None);
    }
    let mut encoded = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes =
            std::fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        encoded.push(BASE64.encode(bytes));
    }
    Ok(Some(encoded))
}
