use std::path::PathBuf;

use anyhow::{Context, Result};
use chat_store::{Dataset, DatasetStore, JsonFileStore};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "chat-store-ops")]
#[command(about = "Operator commands for chat persistence datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a JSON summary of a dataset file.
    Inspect(InspectArgs),
}

#[derive(Args)]
struct InspectArgs {
    #[arg(long)]
    path: PathBuf,
    /// Only summarize this tenant.
    #[arg(long)]
    tenant: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => run_inspect(args).await,
    }
}

async fn run_inspect(args: InspectArgs) -> Result<()> {
    let store = JsonFileStore::new(args.path.clone());
    let dataset = store.load().await;
    let summary = summarize(&dataset, args.tenant.as_deref());

    let rendered = serde_json::to_string_pretty(&json!({
        "path": args.path.display().to_string(),
        "summary": summary,
    }))
    .context("render summary")?;
    println!("{rendered}");
    Ok(())
}

fn summarize(dataset: &Dataset, only_tenant: Option<&str>) -> Value {
    let mut keys: Vec<&String> = dataset
        .tenants
        .keys()
        .filter(|key| only_tenant.is_none_or(|wanted| key.as_str() == wanted))
        .collect();
    keys.sort();

    let tenants: Vec<Value> = keys
        .into_iter()
        .filter_map(|key| dataset.tenants.get(key).map(|state| (key, state)))
        .map(|(key, state)| {
            let messages: usize = state.messages.values().map(Vec::len).sum();
            let latest = state.threads.values().map(|thread| thread.updated_at).max();
            json!({
                "tenant": key,
                "threads": state.threads.len(),
                "messages": messages,
                "latestUpdatedAt": latest,
            })
        })
        .collect();

    json!({
        "tenants": dataset.tenants.len(),
        "threads": dataset.thread_count(),
        "messages": dataset.message_count(),
        "perTenant": tenants,
    })
}
