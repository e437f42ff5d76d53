//! Wiki Lens command line entry point.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wiki_lens::cli::{Cli, Commands, ConfigAction, OutputArgs};
use wiki_lens::models::analysis::{AnalysisReport, AnalysisUpdate};
use wiki_lens::models::search::SearchUpdate;
use wiki_lens::services::analysis::ImportCandidate;
use wiki_lens::services::navigation_cache::FetchOptions;
use wiki_lens::services::tree_batch::render_forest;
use wiki_lens::storage::{apply_env_overrides, ConfigService};
use wiki_lens::utils::paths::config_path;
use wiki_lens::{AppConfig, SpaceViewState};

const UPDATE_BUFFER: usize = 256;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config_path()?,
    };

    if let Commands::Config { action } = &cli.command {
        return handle_config(action, &path);
    }

    let mut config = ConfigService::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    if let Some(url) = &cli.backend_url {
        config.backend_url = url.clone();
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let state = Arc::new(SpaceViewState::from_config(&config)?);
    tokio::select! {
        result = run_command(&state, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            let cancelled = state.teardown();
            warn!(cancelled, "interrupted");
            eprintln!("\ninterrupted");
            Ok(())
        }
    }
}

fn handle_config(action: &ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let service = ConfigService::open(path.to_path_buf())?;
            println!("{}", service.path().display());
        }
        ConfigAction::Show => {
            let mut config = ConfigService::load_or_default(path)?;
            apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            print!("{}", toml::to_string_pretty(&redacted(config))?);
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    for secret in [&mut config.llm.api_key, &mut config.access_token] {
        if !secret.is_empty() {
            *secret = "********".to_string();
        }
    }
    config
}

async fn run_command(state: &SpaceViewState, command: Commands) -> Result<()> {
    match command {
        Commands::AnalyzeSpace {
            space_id,
            title,
            refresh,
            output,
        } => {
            let (tx, printer) = analysis_printer(output.reasoning);
            let report = state
                .analysis()
                .analyze_knowledge_base(&space_id, &title, fetch_options(refresh), Some(tx))
                .await?;
            finish_printer(printer).await;
            finish_report(state, report, &output).await
        }
        Commands::AnalyzeDoc {
            doc_id,
            space_id,
            title,
            expanded,
            output,
        } => {
            let forest = state
                .navigation()
                .fetch_all(&space_id, FetchOptions::default(), |_| {})
                .await?;
            let expanded: HashSet<String> = expanded.into_iter().collect();
            let (tx, printer) = analysis_printer(output.reasoning);
            let report = state
                .analysis()
                .analyze_document(&doc_id, &title, &forest, &expanded, Some(tx))
                .await?;
            finish_printer(printer).await;
            finish_report(state, report, &output).await
        }
        Commands::EvaluateImport {
            space_id,
            doc_id,
            kind,
            title,
            refresh,
            output,
        } => {
            let candidate = ImportCandidate {
                doc_id,
                doc_kind: kind,
            };
            let (tx, printer) = analysis_printer(output.reasoning);
            let report = state
                .analysis()
                .evaluate_import(&space_id, &title, &candidate, fetch_options(refresh), Some(tx))
                .await?;
            finish_printer(printer).await;
            finish_report(state, report, &output).await
        }
        Commands::Search { keyword, pages } => search(state, &keyword, pages).await,
        Commands::ExportNav { space_id, refresh } => {
            let forest = state
                .navigation()
                .fetch_all(&space_id, fetch_options(refresh), |count| {
                    eprint!("\rfetched {} nodes", count);
                })
                .await?;
            eprintln!();
            print!("{}", render_forest(&forest));
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn fetch_options(force_refresh: bool) -> FetchOptions {
    FetchOptions { force_refresh }
}

/// Streams progress to stderr while an analysis runs.
fn analysis_printer(show_reasoning: bool) -> (mpsc::Sender<AnalysisUpdate>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(UPDATE_BUFFER);
    let task = tokio::spawn(async move {
        let mut stderr = io::stderr();
        while let Some(update) = rx.recv().await {
            match update {
                AnalysisUpdate::NavigationProgress { node_count } => {
                    let _ = write!(stderr, "\rfetched {} nodes", node_count);
                }
                AnalysisUpdate::Reasoning { content } if show_reasoning => {
                    let _ = write!(stderr, "{}", content);
                }
                AnalysisUpdate::ReasoningDone if show_reasoning => {
                    let _ = writeln!(stderr, "\n");
                }
                AnalysisUpdate::Content { content } => {
                    let _ = write!(stderr, "{}", content);
                }
                AnalysisUpdate::BatchStarted {
                    index,
                    total,
                    root_titles,
                } => {
                    let _ = writeln!(
                        stderr,
                        "\n[batch {}/{}: {}]",
                        index + 1,
                        total,
                        root_titles.join(", ")
                    );
                }
                AnalysisUpdate::Summarizing => {
                    let _ = writeln!(stderr, "\n[summarizing]");
                }
                _ => {}
            }
            let _ = stderr.flush();
        }
    });
    (tx, task)
}

async fn finish_printer(printer: JoinHandle<()>) {
    let _ = printer.await;
    eprintln!();
}

async fn finish_report(
    state: &SpaceViewState,
    report: AnalysisReport,
    output: &OutputArgs,
) -> Result<()> {
    match report {
        AnalysisReport::Completed { result, .. } => {
            println!("{}", result);
            if let Some(path) = &output.out {
                std::fs::write(path, &result)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            if let Some(title) = &output.export {
                let document = state.analysis().export_report(title, &result).await?;
                eprintln!("exported to {}", document.document_url);
            }
            Ok(())
        }
        AnalysisReport::Failed {
            message, partial, ..
        } => {
            if !partial.is_empty() {
                println!("{}", partial);
            }
            anyhow::bail!(message)
        }
        AnalysisReport::Cancelled { .. } => {
            eprintln!("analysis cancelled");
            Ok(())
        }
    }
}

async fn search(state: &SpaceViewState, keyword: &str, pages: u32) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(UPDATE_BUFFER);
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                SearchUpdate::Item { item, .. } => {
                    println!(
                        "{}\t{}\t{}",
                        item.space_id,
                        item.title,
                        item.url.unwrap_or_default()
                    );
                }
                SearchUpdate::Failed { message, .. } => eprintln!("search failed: {}", message),
                _ => {}
            }
        }
    });

    let mut ticket = state.search().search(keyword, None, Some(tx.clone()))?;
    for page in 1..=pages.max(1) {
        let Some(session) = ticket.finished().await else {
            break;
        };
        if page == pages.max(1) || !session.has_more || session.error.is_some() {
            eprintln!(
                "{} results{}",
                session.results.len(),
                if session.has_more { ", more available" } else { "" }
            );
            break;
        }
        ticket = state.search().load_more(Some(tx.clone()))?;
    }

    drop(tx);
    let _ = printer.await;
    Ok(())
}
