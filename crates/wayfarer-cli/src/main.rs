mod render;
mod transcript;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use serde_json::json;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wayfarer::agent::Agent;
use wayfarer::code_executor::{CodeBlock, LocalCommandExecutor};
use wayfarer::config::Settings;
use wayfarer::conversation::{Conversation, ConversationConfig};
use wayfarer::prompt_template::load_prompt_file;
use wayfarer::providers::base::Provider;
use wayfarer::providers::cache::CachedProvider;
use wayfarer::providers::factory::{get_provider, get_ranking};
use wayfarer::tools::{Toolbox, PLANNER, USER_PROXY};

const DEFAULT_QUESTION: &str =
    "Plan a trip to Goa next month on 16 Nov 2024, I will stay for 5 nights";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The trip request to plan
    #[arg(default_value = DEFAULT_QUESTION)]
    question: String,

    /// Maximum number of planner turns (defaults to conversation.max_turns)
    #[arg(long)]
    max_turns: Option<usize>,

    /// Seed of the response cache (defaults to conversation.cache_seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Always call the model, bypassing the response cache
    #[arg(long)]
    no_cache: bool,

    /// Scrape file to reuse instead of a new temporary one
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Also write the conversation as JSON lines to this file
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Settings file (defaults to ./wayfarer.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a transcript written by --transcript instead of planning a trip
    #[arg(long, conflicts_with_all = ["transcript", "corpus"])]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wayfarer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.replay {
        return replay(path);
    }

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    let corpus = match cli.corpus.clone().or_else(|| settings.tools.corpus_path.clone()) {
        Some(path) => path,
        None => create_corpus_file()?,
    };
    println!(
        "{} {}",
        style("Scraped content will be stored in").dim(),
        corpus.display()
    );

    let provider_config = settings.provider.into_config();
    let ranking = get_ranking(provider_config.clone())?;
    let mut provider = get_provider(provider_config)?;
    if !cli.no_cache {
        if let Some(seed) = cli.seed.or(settings.conversation.cache_seed) {
            provider = Arc::new(CachedProvider::new(
                provider,
                &settings.conversation.cache_dir,
                seed,
            )) as Arc<dyn Provider>;
        }
    }

    let toolbox = Toolbox {
        provider: provider.clone(),
        ranking,
        settings: settings.tools.clone(),
        corpus,
    };
    let registry = Arc::new(toolbox.planner_registry()?);

    let system_prompt = load_prompt_file(
        "planner.md",
        &json!({ "tools": registry.tools_for(PLANNER) }),
    )?;
    let planner = Agent::new(PLANNER, system_prompt, provider);

    let mut conversation = Conversation::new(
        planner,
        USER_PROXY,
        registry,
        ConversationConfig {
            max_turns: cli.max_turns.unwrap_or(settings.conversation.max_turns),
            summary_method: settings.conversation.summary_method,
            default_auto_reply: settings.conversation.default_auto_reply.clone(),
        },
    );

    if settings.executor.enabled {
        let executor = Arc::new(LocalCommandExecutor::new(
            &settings.executor.work_dir,
            Duration::from_secs(settings.executor.timeout_secs),
        ));
        smoke_test(&executor).await;
        conversation = conversation.with_code_executor(executor);
    }

    let prompt = load_prompt_file("react.md", &json!({ "question": cli.question }))?;
    let result = conversation.run(&prompt).await?;

    println!();
    for message in &result.messages {
        render::render_message(message, PLANNER, USER_PROXY);
    }
    render::render_outcome(&result);

    println!("{}", style("Summary").bold());
    render::print_markdown(&result.summary)?;

    if let Some(path) = &cli.transcript {
        transcript::persist_messages(path, &result.messages)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        println!("{} {}", style("Transcript written to").dim(), path.display());
    }

    Ok(())
}

fn replay(path: &Path) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open transcript {}", path.display()))?;
    let messages = transcript::deserialize_messages(file)
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    for message in &messages {
        render::render_message(message, PLANNER, USER_PROXY);
    }
    Ok(())
}

/// A scrape file in the working directory that outlives the process
fn create_corpus_file() -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("wayfarer-")
        .suffix(".txt")
        .tempfile_in(".")
        .context("Failed to create the scrape file")?;
    let (_, path) = file.keep()?;
    Ok(path)
}

async fn smoke_test(executor: &LocalCommandExecutor) {
    let hello = [CodeBlock::new("python", "print('Hello, World!');")];
    match executor.execute(&hello).await {
        Ok(result) => println!("{}", result.reply()),
        Err(e) => warn!(error = %e, "code executor smoke test failed"),
    }
}
