use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;

use codexai_core::{
    ChatMessage, ChatRole, Config, GitHubClient, LanguageModel, MemoryRepository, Provider,
    RepoInfo, RepositoryClient, Session, SessionOptions, SimulatedRunner,
};

mod repl;

#[derive(Parser)]
#[command(name = "codexai")]
#[command(about = "Chat with an AI assistant that edits and runs your GitHub repository")]
struct Cli {
    /// AI provider to use (gemini, claude, openai, ollama)
    #[arg(long, global = true)]
    provider: Option<String>,
    /// Model name, overriding the configured default
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RepoArgs {
    /// Repository as OWNER/NAME
    #[arg(long)]
    repo: String,
    /// Branch to work on (defaults to the repository's default branch)
    #[arg(long)]
    branch: Option<String>,
    /// Use an in-memory repository instead of GitHub
    #[arg(long)]
    sandbox: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session
    Chat {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Run a single prompt and print the result
    Ask {
        #[command(flatten)]
        repo: RepoArgs,
        /// Your prompt
        prompt: String,
    },
    /// List models for the selected provider
    Models,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Set the default provider
    SetProvider { provider: String },
    /// Set the default model
    SetModel { model: String },
    /// Store an API key for a provider
    SetKey { provider: String, key: String },
    /// Store a GitHub personal access token
    SetToken { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "codexai starting");

    let config = Config::load().unwrap_or_else(|error| {
        eprintln!("{} {}", "Could not read config, using defaults:".yellow(), error);
        Config::new()
    });

    match cli.command {
        Commands::Chat { repo } => {
            let session = open_session(&config, cli.provider.as_deref(), cli.model.as_deref(), &repo).await?;
            repl::run(&session).await?
        }
        Commands::Ask { repo, prompt } => {
            let session = open_session(&config, cli.provider.as_deref(), cli.model.as_deref(), &repo).await?;
            ask_once(&session, &prompt).await
        }
        Commands::Models => list_models(&config, cli.provider.as_deref()).await?,
        Commands::Config { action } => configure(config, action)?,
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| anyhow!("failed to open log file '{}': {}", log_path.display(), error))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

fn log_file_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codexai")
        .join("codexai.log")
}

fn parse_provider(name: Option<&str>) -> Result<Option<Provider>> {
    name.map(|name| {
        Provider::from_str(name).ok_or_else(|| {
            let known: Vec<&str> = Provider::all().iter().map(|p| p.as_str()).collect();
            anyhow!("Unknown provider '{}'. Choose one of: {}", name, known.join(", "))
        })
    })
    .transpose()
}

async fn open_session(
    config: &Config,
    provider: Option<&str>,
    model: Option<&str>,
    args: &RepoArgs,
) -> Result<Session> {
    let mut info = RepoInfo::parse(&args.repo)
        .ok_or_else(|| anyhow!("Expected --repo OWNER/NAME, got '{}'", args.repo))?;
    if let Some(branch) = &args.branch {
        info = info.with_branch(branch);
    }

    let model = LanguageModel::from_config(config, parse_provider(provider)?, model)?;
    println!(
        "{} {} ({})",
        "Using".dimmed(),
        model.provider().display_name().bold(),
        model.model().cyan()
    );

    let (repository, token) = if args.sandbox {
        let repository: Arc<dyn RepositoryClient> = Arc::new(sandbox_repository());
        (repository, "sandbox".to_string())
    } else {
        let token = config.resolve_github_token().ok_or_else(|| {
            anyhow!("No GitHub token. Set GITHUB_TOKEN or run: codexai config set-token <TOKEN>")
        })?;
        let repository: Arc<dyn RepositoryClient> = Arc::new(GitHubClient::new());
        (repository, token)
    };

    let session = Session::new(
        Arc::new(model),
        repository,
        Arc::new(SimulatedRunner::new(Duration::from_millis(config.run_stage_delay_ms))),
        SessionOptions::from_config(config),
    );

    if let Err(error) = session.connect(&token, info).await {
        print_messages(&session.messages());
        return Err(error);
    }
    Ok(session)
}

fn sandbox_repository() -> MemoryRepository {
    MemoryRepository::with_files([
        (
            "package.json",
            "{\n  \"name\": \"sandbox\",\n  \"private\": true,\n  \"scripts\": {\n    \"dev\": \"vite\",\n    \"build\": \"vite build\"\n  }\n}\n",
        ),
        ("index.html", "<!doctype html>\n<html>\n  <body>\n    <div id=\"root\"></div>\n    <script type=\"module\" src=\"/src/main.js\"></script>\n  </body>\n</html>\n"),
        ("src/main.js", "document.getElementById('root').textContent = 'Hello from the sandbox';\n"),
        ("README.md", "# Sandbox\n\nAn in-memory repository for trying out codexai.\n"),
    ])
}

async fn ask_once(session: &Session, prompt: &str) {
    let seen = session.message_count();
    session.submit_prompt(prompt).await;
    print_messages(&session.messages_since(seen));

    if session.run_state().is_active() {
        let seen = session.message_count();
        session.wait_for_run().await;
        for line in session.run_log() {
            println!("{}", line.dimmed());
        }
        print_messages(&session.messages_since(seen));
    }
}

async fn list_models(config: &Config, provider: Option<&str>) -> Result<()> {
    let model = LanguageModel::from_config(config, parse_provider(provider)?, None)?;
    println!("🤖 Models for {}:", model.provider().display_name().bold());

    let models = model.available_models().await?;
    if models.is_empty() {
        println!("{}", "No models found".red());
        return Ok(());
    }
    for name in models {
        let marker = if name == model.model() { "*".green().bold() } else { " ".normal() };
        println!("{} {}", marker, name);
    }
    Ok(())
}

fn configure(mut config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{} {}", "Config file:".dimmed(), Config::get_config_path()?.display());
            println!("provider:      {}", config.provider().as_str().bold());
            println!(
                "model:         {}",
                config
                    .default_model
                    .clone()
                    .unwrap_or_else(|| config.provider().default_model().to_string())
            );
            for provider in Provider::all() {
                if provider == Provider::Ollama {
                    continue;
                }
                let status = if config.resolve_api_key(provider).is_some() {
                    "set".green()
                } else {
                    "missing".red()
                };
                println!("{:<14} {}", format!("{} key:", provider.as_str()), status);
            }
            let token = if config.resolve_github_token().is_some() { "set".green() } else { "missing".red() };
            println!("github token:  {}", token);
            println!("ollama url:    {}", config.ollama_url());
            println!("temperature:   {}", config.temperature);
            return Ok(());
        }
        ConfigAction::SetProvider { provider } => {
            let provider = parse_provider(Some(provider.as_str()))?.ok_or_else(|| anyhow!("Provider is required"))?;
            config.provider = Some(provider.as_str().to_string());
            config.default_model = None;
            println!("Provider set to {}", provider.display_name().bold());
        }
        ConfigAction::SetModel { model } => {
            println!("Default model set to {}", model.cyan());
            config.default_model = Some(model);
        }
        ConfigAction::SetKey { provider, key } => {
            let provider = parse_provider(Some(provider.as_str()))?.ok_or_else(|| anyhow!("Provider is required"))?;
            config.set_api_key(provider, &key)?;
            println!("API key stored for {}", provider.display_name().bold());
        }
        ConfigAction::SetToken { token } => {
            config.github_token = Some(token);
            println!("GitHub token stored");
        }
    }
    config.save()
}

pub(crate) fn print_messages(messages: &[ChatMessage]) {
    for message in messages {
        print_message(message);
    }
}

pub(crate) fn print_message(message: &ChatMessage) {
    match message.role {
        ChatRole::User => println!("{} {}", "you:".bold().blue(), message.content),
        ChatRole::Assistant => println!("{}\n{}\n", "codexai:".bold().green(), message.content),
        ChatRole::System => println!("{}", message.content.yellow().dimmed()),
    }
}
