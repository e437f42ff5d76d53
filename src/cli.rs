//! CLI argument parsing using Clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Wiki Lens - AI review of knowledge-base structure and documents
#[derive(Parser, Debug)]
#[command(name = "wiki-lens")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  wiki-lens analyze-space 7034502641455497244 --title \"Team Wiki\"
  wiki-lens analyze-doc doxcnAbc 7034502641455497244 --expanded n1,n2
  wiki-lens evaluate-import 7034502641455497244 doxcnAbc --kind docx
  wiki-lens search onboarding --pages 2
")]
pub struct Cli {
    /// Config file (defaults to ~/.wiki-lens/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides the config file)
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Review the structure of a knowledge base
    AnalyzeSpace {
        space_id: String,
        /// Knowledge base title shown to the model
        #[arg(long, default_value = "")]
        title: String,
        /// Ignore the cached tree
        #[arg(long)]
        refresh: bool,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Review one document in the context of its knowledge base
    AnalyzeDoc {
        doc_id: String,
        space_id: String,
        #[arg(long, default_value = "")]
        title: String,
        /// Node ids on the opened path, comma-separated
        #[arg(long, value_delimiter = ',')]
        expanded: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Suggest where a document should be imported
    EvaluateImport {
        space_id: String,
        doc_id: String,
        /// Document kind: docx, doc or wiki
        #[arg(long, default_value = "docx")]
        kind: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        refresh: bool,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Search knowledge bases by keyword
    Search {
        keyword: String,
        /// Pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Print the navigation tree of a knowledge base
    ExportNav {
        space_id: String,
        #[arg(long)]
        refresh: bool,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Where a finished report goes.
#[derive(clap::Args, Debug, Clone)]
pub struct OutputArgs {
    /// Also write the report to this file
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Publish the report as a cloud document with this title
    #[arg(long)]
    pub export: Option<String>,
    /// Print the model's reasoning to stderr
    #[arg(long)]
    pub reasoning: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default config file if none exists
    Init,
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}
