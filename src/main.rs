use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use rustyline::error::ReadlineError;
use tracing::{error, info};

use bravebird::{handoff, DownloadAgent, QueryAgent, Sandbox};

#[derive(Parser)]
#[command(name = "bravebird", version, about = "Download a shared PDF through a browser flow, then answer questions about it")]
struct Cli {
    /// Publicly shared PDF link (browser download flow, no hosting API).
    url: String,

    /// Wall-clock budget for the acquisition phase, in seconds.
    #[arg(long, default_value_t = 600)]
    max_seconds: u64,

    /// Sandbox root for downloads, logs, screenshots, and the handoff record.
    #[arg(long, default_value = "sandbox")]
    sandbox: PathBuf,
}

#[tokio::main]
async fn main() {
    let _ = dotenv();
    let cli = Cli::parse();

    let sandbox = match Sandbox::bootstrap(cli.sandbox.clone()) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            eprintln!("sandbox bootstrap failed: {e:#}");
            process::exit(1);
        }
    };
    let _log_guard = match sandbox.init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("logging init failed: {e:#}");
            process::exit(1);
        }
    };

    // The one credential this process needs, read exactly once.
    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            error!("OPENAI_API_KEY not set in environment");
            process::exit(1);
        }
    };

    info!("bravebird system initialized");

    // Phase 1: acquisition, under a hard whole-phase ceiling.
    let budget = Duration::from_secs(cli.max_seconds);
    let agent = DownloadAgent::new(api_key.clone(), sandbox.clone());
    let record = match tokio::time::timeout(budget, agent.run(&cli.url, budget)).await {
        Err(_) => {
            error!("acquisition timed out after {}s", cli.max_seconds);
            process::exit(1);
        }
        Ok(Err(e)) => {
            error!("acquisition failed: {e:#}");
            process::exit(1);
        }
        Ok(Ok(record)) => record,
    };

    info!(
        file = %record.file_name,
        sha256 = %record.sha256,
        bytes = record.bytes,
        "handover successful"
    );

    // Phase 2: the downstream consumer re-reads and validates the record
    // from disk; it never trusts the in-memory copy.
    let validated = match handoff::load_validated(&sandbox.handoff_path) {
        Ok(record) => record,
        Err(e) => {
            error!("handoff rejected: {e}");
            process::exit(1);
        }
    };

    let mut analyst = QueryAgent::new(api_key);
    if let Err(e) = analyst.index_from_handoff(&validated).await {
        error!("indexing failed: {e:#}");
        process::exit(1);
    }

    println!("The document is ready. Ask me anything about it.");
    println!("(Type 'exit' to quit)\n");

    if let Err(e) = query_loop(&analyst).await {
        error!("query loop failed: {e:#}");
        process::exit(1);
    }
}

async fn query_loop(analyst: &QueryAgent) -> Result<()> {
    let mut rl = rustyline::DefaultEditor::new()?;
    loop {
        match rl.readline("You: ") {
            Ok(line) => {
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
                    println!("Shutting down.");
                    break;
                }
                let _ = rl.add_history_entry(question);

                match analyst.query(question).await {
                    Ok(answer) => {
                        println!("\n{}", answer.text);
                        if !answer.source_pages.is_empty() {
                            println!("Sources (pages): {:?}", answer.source_pages);
                        }
                        println!();
                    }
                    Err(e) => error!("query failed: {e:#}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Shutting down.");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
