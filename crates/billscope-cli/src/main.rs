mod display;

use std::path::{Path, PathBuf};

use anyhow::Context;
use billscope_ai::{ImpactFilters, ModelBundle, predict_impact};
use billscope_core::{InstitutionRecord, LlmConfig, PipelineConfig};
use billscope_extract::{Extraction, Extractor};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "billscope", version, about = "Education bill impact estimation", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true, env = "BILLSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Print JSON instead of the text summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract policy parameters from a bill.
    Extract {
        /// Bill text file.
        bill: PathBuf,

        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Extract parameters and predict per-institution impact.
    Predict {
        /// Bill text file.
        bill: PathBuf,

        /// Institution master table (.parquet or .csv).
        #[arg(long, short = 'i')]
        institutions: PathBuf,

        /// Model bundle directory (manifest.json plus four model artifacts).
        #[arg(long, short = 'm', env = "BILLSCOPE_MODELS")]
        models: PathBuf,

        /// Restrict to these states (repeatable or comma-separated).
        #[arg(long = "state", value_delimiter = ',')]
        states: Vec<String>,

        /// Query the table through DuckDB with this filter (after WHERE).
        #[cfg(feature = "duckdb")]
        #[arg(long)]
        sql_filter: Option<String>,

        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Args)]
struct LlmArgs {
    /// Skip the language-model fallback even when a key is configured.
    #[arg(long)]
    no_llm: bool,

    /// API key; `ANTHROPIC_API_KEY` is used when omitted.
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long, env = "BILLSCOPE_LLM_MODEL")]
    llm_model: Option<String>,
}

impl LlmArgs {
    /// Merge environment and CLI overrides into the configured LLM section.
    fn apply(&self, config: &mut PipelineConfig) {
        if self.no_llm {
            config.llm = None;
            return;
        }
        let from_env = LlmConfig::from_env();
        match config.llm.as_mut() {
            None => config.llm = from_env,
            Some(llm) if llm.api_key.is_none() => {
                llm.api_key = from_env.and_then(|env| env.api_key);
            }
            Some(_) => {}
        }
        if self.api_key.is_none() && self.llm_model.is_none() {
            return;
        }
        let llm = config.llm.get_or_insert_with(LlmConfig::default);
        if let Some(key) = &self.api_key {
            llm.api_key = Some(key.clone());
        }
        if let Some(model) = &self.llm_model {
            llm.model = model.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    info!(version = env!("CARGO_PKG_VERSION"), "billscope");

    match &cli.command {
        Command::Extract { bill, llm } => {
            llm.apply(&mut config);
            let extraction = extract(bill, &config).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&extraction)?);
            } else {
                display::print_extraction(&extraction);
            }
        }
        Command::Predict {
            bill,
            institutions,
            models,
            states,
            #[cfg(feature = "duckdb")]
            sql_filter,
            llm,
        } => {
            llm.apply(&mut config);
            // Load models first: a broken bundle aborts before any external call.
            let bundle = ModelBundle::load(models)
                .with_context(|| format!("loading model bundle {}", models.display()))?;

            #[cfg(feature = "duckdb")]
            let table = load_table(institutions, sql_filter.as_deref())?;
            #[cfg(not(feature = "duckdb"))]
            let table = load_table(institutions)?;

            let missing = bundle.schema().validate_columns(table.columns());
            if !missing.is_empty() {
                tracing::warn!(columns = ?missing, "institution table lacks model columns");
            }

            let extraction = extract(bill, &config).await?;
            let records: Vec<InstitutionRecord> = table.into_records();
            let report = predict_impact(
                extraction.params(),
                &records,
                &bundle,
                &ImpactFilters::states(states),
                &config.impact,
            )
            .context("predicting impact")?;

            if cli.json {
                let out = serde_json::json!({
                    "extraction": extraction,
                    "impact": report,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                display::print_extraction(&extraction);
                display::print_impact(&report);
            }
        }
    }
    Ok(())
}

async fn extract(bill: &Path, config: &PipelineConfig) -> anyhow::Result<Extraction> {
    let text = std::fs::read_to_string(bill)
        .with_context(|| format!("reading bill {}", bill.display()))?;
    let extractor = Extractor::from_config(config);
    extractor
        .run(&text)
        .await
        .with_context(|| format!("extracting parameters from {}", bill.display()))
}

#[cfg(not(feature = "duckdb"))]
fn load_table(path: &Path) -> anyhow::Result<billscope_store::InstitutionTable> {
    billscope_store::read_table(path)
        .with_context(|| format!("reading institution table {}", path.display()))
}

#[cfg(feature = "duckdb")]
fn load_table(
    path: &Path,
    sql_filter: Option<&str>,
) -> anyhow::Result<billscope_store::InstitutionTable> {
    let Some(filter) = sql_filter else {
        return billscope_store::read_table(path)
            .with_context(|| format!("reading institution table {}", path.display()));
    };
    let store = billscope_store::DuckStore::open()?;
    store
        .load_institutions(path)
        .with_context(|| format!("importing {} into DuckDB", path.display()))?;
    Ok(store.institutions(Some(filter))?)
}
