//! evalgate CLI - cost-tiered RAG evaluation from the terminal
//!
//! Commands:
//! - `evaluate`: run one request (or a batch) through the full pipeline
//! - `cache-key`: print the cache identity of a request
//! - `gate`: apply a policy to a metric file
//! - `pricing`: show the price table, price a call, or project stage costs
//!
//! `evaluate` and `gate` exit with status 1 when any verdict is FAIL, so the
//! binary can sit directly in a CI job.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evalgate_core::{
    derive_cache_key, Canonicalizer, Decision, EvaluationInput, GatePolicy, GatePolicyEngine,
    Issue, MetricSet, Stage,
};
use evalgate_runtime::{
    EvaluationRecord, EvaluationService, ProviderRegistry, ProviderSet, RuntimeConfig,
    StaticPolicySource,
};

#[derive(Parser)]
#[command(name = "evalgate")]
#[command(about = "Cost-tiered RAG evaluation with confidence-gated escalation", long_about = None)]
#[command(version)]
struct Cli {
    /// Runtime configuration file (YAML)
    #[arg(short, long, env = "EVALGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    output: OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a request file (one request or a list)
    Evaluate {
        /// Request file (JSON or YAML)
        input: PathBuf,

        /// Gate policy file; without one, threshold checks are skipped
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },

    /// Print the cache identity of a request
    CacheKey {
        /// Request file (JSON or YAML)
        input: PathBuf,

        /// Policy version to key under
        #[arg(long)]
        policy_version: Option<u32>,
    },

    /// Gate a metric file against a policy
    Gate {
        /// Metric file (JSON or YAML)
        metrics: PathBuf,

        /// Gate policy file
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },

    /// Inspect pricing
    Pricing {
        #[command(subcommand)]
        command: Option<PricingCommands>,
    },
}

#[derive(Subcommand)]
enum PricingCommands {
    /// Exact cost of one call
    Cost {
        model: String,
        #[arg(long)]
        input_tokens: u64,
        #[arg(long, default_value_t = 0)]
        output_tokens: u64,
    },

    /// Projected cost of an evaluation that reaches `stage`
    Estimate {
        /// Prompt tokens (query + context + response)
        #[arg(long)]
        tokens: u64,

        #[arg(long, value_enum, default_value = "large-model")]
        stage: StageArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
    Text,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Deterministic,
    SmallModel,
    LargeModel,
}

impl From<StageArg> for Stage {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::Deterministic => Stage::Deterministic,
            StageArg::SmallModel => Stage::SmallModel,
            StageArg::LargeModel => Stage::LargeModel,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Requests {
    Many(Vec<EvaluationInput>),
    One(Box<EvaluationInput>),
}

/// Metric file: the metrics plus any Stage 1 issues to fold in.
#[derive(Deserialize)]
struct GateInput {
    #[serde(flatten)]
    metrics: MetricSet,
    #[serde(default)]
    issues: Vec<Issue>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .init();

    let config = RuntimeConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Evaluate { input, policy } => evaluate(config, &input, policy, cli.output).await,
        Commands::CacheKey {
            input,
            policy_version,
        } => cache_key(&config, &input, policy_version, cli.output),
        Commands::Gate { metrics, policy } => gate(&metrics, policy, cli.output),
        Commands::Pricing { command } => pricing(&config, command, cli.output),
    }
}

async fn evaluate(
    config: RuntimeConfig,
    input: &Path,
    policy: Option<PathBuf>,
    output: OutputFormat,
) -> Result<ExitCode> {
    let requests = match read_document::<Requests>(input)? {
        Requests::Many(requests) => requests,
        Requests::One(request) => vec![*request],
    };

    let providers = ProviderSet::from_configs(&ProviderRegistry::with_defaults(), &config.providers)
        .context("configuring judge providers")?;
    if providers.is_empty() {
        tracing::info!("No judge providers configured, judges will use synthetic estimates");
    }

    let mut policies = StaticPolicySource::empty();
    if let Some(path) = policy {
        let policy = GatePolicy::from_file(&path)
            .with_context(|| format!("loading policy {}", path.display()))?;
        policies = policies.with_default(policy);
    }

    let service = EvaluationService::builder(config)
        .providers(providers)
        .policies(Arc::new(policies))
        .build()
        .context("building evaluation service")?;

    let mut records = Vec::with_capacity(requests.len());
    for result in service.evaluate_batch(requests).await {
        records.push(result?);
    }

    match output {
        OutputFormat::Text => {
            for record in &records {
                print_record(record);
            }
        }
        _ => emit(&records, output)?,
    }

    Ok(exit_code(records.iter().map(|r| r.gate.decision)))
}

fn cache_key(
    config: &RuntimeConfig,
    input: &Path,
    policy_version: Option<u32>,
    output: OutputFormat,
) -> Result<ExitCode> {
    let request: EvaluationInput = read_document(input)?;
    let mut canonical = Canonicalizer::new(config.canonical_defaults()).normalize(request);
    if let Some(version) = policy_version {
        canonical.policy_version = version;
    }

    let identity = derive_cache_key(
        &canonical.query,
        &canonical.context_chunks,
        &canonical.response,
        canonical.policy_version,
        &canonical.judge_model,
        &canonical.evaluator_version,
    );

    match output {
        OutputFormat::Text => println!("{}", identity.cache_key),
        _ => emit(&identity, output)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn gate(metrics: &Path, policy: Option<PathBuf>, output: OutputFormat) -> Result<ExitCode> {
    let input: GateInput = read_document(metrics)?;
    let policy = match policy {
        Some(path) => Some(
            GatePolicy::from_file(&path)
                .with_context(|| format!("loading policy {}", path.display()))?,
        ),
        None => None,
    };

    let outcome = GatePolicyEngine::new().evaluate(&input.metrics, policy.as_ref(), &input.issues);

    match output {
        OutputFormat::Text => {
            let codes: Vec<&str> = outcome.failure_codes.iter().map(|c| c.as_str()).collect();
            println!("{} ({})", outcome.decision, outcome.severity);
            if !codes.is_empty() {
                println!("  {}", codes.join(", "));
            }
        }
        _ => emit(&outcome, output)?,
    }
    Ok(exit_code([outcome.decision]))
}

fn pricing(
    config: &RuntimeConfig,
    command: Option<PricingCommands>,
    output: OutputFormat,
) -> Result<ExitCode> {
    let costs = config.cost_accountant().context("loading price table")?;

    match command {
        None => match output {
            OutputFormat::Text => {
                println!("Pricing version: {}", costs.pricing_version());
                for (model, rate) in &costs.table().models {
                    println!(
                        "  {:<28} in {:>8} / out {:>8} per 1M tokens",
                        model, rate.input_per_million, rate.output_per_million
                    );
                }
            }
            _ => emit(costs.table(), output)?,
        },
        Some(PricingCommands::Cost {
            model,
            input_tokens,
            output_tokens,
        }) => {
            if !costs.knows(&model) {
                tracing::warn!(model = %model, "Model not in price table");
            }
            let cost = costs.cost(&model, input_tokens, output_tokens);
            match output {
                OutputFormat::Text => println!("{}", cost),
                _ => emit(&serde_json::json!({
                    "model": model,
                    "input_tokens": input_tokens,
                    "output_tokens": output_tokens,
                    "cost": cost,
                    "pricing_version": costs.pricing_version(),
                }), output)?,
            }
        }
        Some(PricingCommands::Estimate { tokens, stage }) => {
            let estimate = costs.estimate_stage_costs(
                tokens,
                stage.into(),
                &config.small_model,
                &config.large_model,
            );
            match output {
                OutputFormat::Text => {
                    println!("small_model: {}", estimate.small_model);
                    println!("large_model: {}", estimate.large_model);
                    println!("total:       {}", estimate.total);
                }
                _ => emit(&estimate, output)?,
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

fn emit<T: Serialize + ?Sized>(value: &T, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Text => bail!("text output is not supported here"),
    }
    Ok(())
}

fn print_record(record: &EvaluationRecord) {
    println!(
        "{} ({}) stage={} confidence={:.2} cost={}{}",
        record.gate.decision,
        record.gate.severity,
        record.result.stage,
        record.result.confidence,
        record.result.total_cost,
        if record.cached { " [cached]" } else { "" }
    );
    for issue in &record.result.issues {
        println!("  {} {}: {}", issue.severity, issue.code, issue.message);
    }
    for code in &record.gate.failure_codes {
        println!("  gate: {}", code);
    }
    for fix in &record.recommendations {
        println!(
            "  fix: {} -> {} ({})",
            fix.rule_name, fix.recommended_value, fix.expected_improvement
        );
    }
}

fn exit_code(decisions: impl IntoIterator<Item = Decision>) -> ExitCode {
    if decisions.into_iter().any(|d| d == Decision::Fail) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
