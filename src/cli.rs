//! CLI interface for autofix-agent

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use crate::agent::{
    CompletionProvider, Detector, LlmClient, LlmDetector, Planner, RepoSensor, SyntheticDetector,
};
use crate::config::Config;
use crate::learning::EpisodicStore;
use crate::orchestrator::{BoundedScheduler, RunOutcome, RunPipeline, RunReport, SchedulerConfig};
use crate::security::{Credential, PolicyGate};
use crate::tools::GitHubSubmitter;
use crate::types::{RunInsights, RunRecord};

/// Lines of code shown per step when printing insights
const CODE_PREVIEW_LINES: usize = 10;

#[derive(Parser)]
#[command(name = "autofix-agent")]
#[command(about = "Autonomous agent that detects code issues, plans fixes and opens pull requests", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single run (default when no command given)
    Run,
    /// Run continuously on a fixed interval
    Loop {
        /// Minutes between runs (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
        /// Stop after this many runs (overrides config)
        #[arg(short, long)]
        max_runs: Option<u64>,
    },
    /// List recent runs, newest first
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show one recorded run as JSON
    Show {
        /// Run ID
        run_id: String,
    },
    /// Success statistics for an issue family
    Stats {
        /// Case-insensitive substring of the issue description
        issue: String,
    },
    /// Configure the agent
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Store the LLM API key
        #[arg(long)]
        set_llm_key: Option<String>,
        /// Store the GitHub token
        #[arg(long)]
        set_github_token: Option<String>,
        /// Remove stored credentials
        #[arg(long)]
        clear_credentials: bool,
        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let config = Config::load()?;
            let pipeline = build_pipeline(&config)?;
            let report = pipeline.run_once().await;
            print_report(&report);
            let denied = pipeline
                .approvals()
                .audit_log()
                .into_iter()
                .filter(|record| !record.outcome.granted)
                .count();
            if denied > 0 {
                println!("\n{} plan(s) held for manual review.", denied);
            }
        }
        Some(Commands::Loop { interval, max_runs }) => {
            let mut config = Config::load()?;
            if let Some(minutes) = interval {
                config.scheduler.interval_minutes = minutes;
            }
            if max_runs.is_some() {
                config.scheduler.max_runs = max_runs;
            }
            run_loop(&config).await?;
        }
        Some(Commands::History { limit }) => {
            let config = Config::load()?;
            let store = EpisodicStore::open(config.store_path()?)?;
            let runs = store.recent(limit);
            if runs.is_empty() {
                println!("No runs recorded yet.");
            }
            for run in runs {
                print_history_line(run);
            }
        }
        Some(Commands::Show { run_id }) => {
            let config = Config::load()?;
            let id = Uuid::parse_str(run_id.trim()).with_context(|| format!("Invalid run id: {}", run_id))?;
            let store = EpisodicStore::open(config.store_path()?)?;
            match store.get_by_id(&id) {
                Some(run) => println!("{}", serde_json::to_string_pretty(run)?),
                None => println!("Run not found: {}", id),
            }
        }
        Some(Commands::Stats { issue }) => {
            let config = Config::load()?;
            let store = EpisodicStore::open(config.store_path()?)?;
            let stats = store.statistics(&issue);
            println!("Issue: {}", issue);
            println!("  Runs:          {}", stats.total);
            println!("  Successful:    {}", stats.success_count);
            println!("  Success rate:  {:.0}%", stats.success_rate * 100.0);
            if let Some(fix) = stats.most_recent_fix {
                println!("  Most recent fix ({}):", fix.file_path);
                print_preview(&fix.code_snippet, "    ");
            }
        }
        Some(Commands::Config {
            show,
            set_llm_key,
            set_github_token,
            clear_credentials,
            reset,
        }) => {
            let mut acted = false;
            if let Some(key) = set_llm_key {
                crate::security::set_credential(Credential::LlmApiKey, &key)?;
                println!("LLM API key stored.");
                acted = true;
            }
            if let Some(token) = set_github_token {
                crate::security::set_credential(Credential::RepoToken, &token)?;
                println!("GitHub token stored.");
                acted = true;
            }
            if clear_credentials {
                crate::security::delete_credential(Credential::LlmApiKey)?;
                crate::security::delete_credential(Credential::RepoToken)?;
                println!("Stored credentials removed.");
                acted = true;
            }
            if reset {
                crate::config::reset_config()?;
                acted = true;
            }
            if show {
                crate::config::show_config()?;
                acted = true;
            }
            if !acted {
                println!("Configuration options:");
                println!("  --show                     Display current configuration");
                println!("  --set-llm-key <key>        Store the LLM API key");
                println!("  --set-github-token <tok>   Store the GitHub token");
                println!("  --clear-credentials        Remove stored credentials");
                println!("  --reset                    Reset configuration to defaults");
                println!();
                println!("Config file: {}", crate::config::config_path()?.display());
            }
        }
    }

    Ok(())
}

/// Wire a pipeline from configuration and stored credentials.
///
/// Without an LLM key the synthetic detector and the built-in fallback plan
/// are used; without a repository token submissions are reported as demo PRs.
pub fn build_pipeline(config: &Config) -> Result<RunPipeline> {
    let store = EpisodicStore::open(config.store_path()?)?.into_shared();

    let provider: Option<Arc<dyn CompletionProvider>> = match LlmClient::from_config(&config.llm)? {
        Some(client) => {
            tracing::info!("Using {} via {}", client.model(), client.provider().base_url);
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("No LLM API key configured; using synthetic detector and fallback plans");
            None
        }
    };

    let detector: Arc<dyn Detector> = match &provider {
        Some(provider) => Arc::new(LlmDetector::new(provider.clone(), config.llm.detect_max_tokens)),
        None => Arc::new(SyntheticDetector::new()),
    };
    let planner = Planner::new(provider, Some(store.clone()), config.llm.plan_max_tokens);
    let submitter = GitHubSubmitter::from_config(&config.repository)?;

    Ok(RunPipeline::new(
        Arc::new(RepoSensor::from_config(&config.sensor)),
        detector,
        planner,
        Arc::new(submitter),
        store,
        PolicyGate::new(config.policy.hitl_threshold),
        config.repository.clone(),
    ))
}

async fn run_loop(config: &Config) -> Result<()> {
    let schedule = SchedulerConfig::from_settings(&config.scheduler)?;
    let pipeline = Arc::new(build_pipeline(config)?);

    println!("Continuous mode: every {} minute(s)", config.scheduler.interval_minutes);
    match schedule.max_runs() {
        Some(n) => println!("Max runs: {}", n),
        None => println!("Max runs: unlimited (press Ctrl+C to stop)"),
    }

    let mut scheduler = BoundedScheduler::new(pipeline, schedule);
    scheduler.start();

    tokio::select! {
        _ = scheduler.wait() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            println!("\nStopping after the current run...");
        }
    }
    scheduler.stop().await;
    println!("Scheduler stopped. Total runs: {}", scheduler.run_count());
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run ID: {}\n", report.run_id);
    match &report.outcome {
        RunOutcome::Completed { record, persisted } => {
            print_insights(&record.insights);
            if !persisted {
                println!("\nWarning: run could not be saved to the episodic store.");
            }
        }
        RunOutcome::NoDetection => println!("No issue detected."),
        RunOutcome::RejectedByApproval { plan_id, reason } => {
            println!("Plan {} rejected by approval gate: {}", plan_id, reason);
        }
        RunOutcome::Failed { error } => println!("Run failed: {}", error),
    }
}

fn print_insights(insights: &RunInsights) {
    let detection = &insights.detection_summary;
    println!("Detection:");
    println!("  - Issue ID: {}", detection.issue_id);
    println!("  - Description: {}", detection.description);
    println!("  - Classification: {}", detection.classification);
    println!(
        "  - Score: {}\n",
        detection.score.map(|s| s.to_string()).unwrap_or_else(|| "N/A".to_string())
    );

    println!("Plan Explanation:");
    println!("  {}\n", insights.plan_explanation);

    if insights.steps.is_empty() {
        println!("No steps generated.\n");
    } else {
        println!("Steps:");
        for (i, step) in insights.steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step.description);
            if let Some(code) = step.code() {
                println!("    Code preview:");
                print_preview(code, "      ");
            }
        }
        println!();
    }

    println!("Risk score: {}", insights.risk_score);
    println!("\nPull Request:");
    println!("  - URL: {}", insights.change.url.as_deref().unwrap_or("N/A"));
    println!(
        "  - PR Number: {}",
        insights
            .change
            .identifier
            .map(|n| n.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    );
    if let Some(reason) = &insights.change.reason {
        println!("  - Reason: {}", reason);
    }
    println!("\nValidation passed: {}", insights.validation.passed);
}

fn print_preview(code: &str, indent: &str) {
    let lines: Vec<&str> = code.lines().collect();
    for line in lines.iter().take(CODE_PREVIEW_LINES) {
        println!("{}{}", indent, line);
    }
    if lines.len() > CODE_PREVIEW_LINES {
        println!("{}... (truncated) ...", indent);
    }
}

fn print_history_line(run: &RunRecord) {
    println!(
        "{}  {}  {:<8} risk {:>3}  {}",
        run.timestamp.format("%Y-%m-%d %H:%M:%S"),
        run.run_id,
        if run.succeeded() { "ok" } else { "error" },
        run.plan.estimated_risk_score,
        crate::truncate_safe(&run.detection.description, 60)
    );
}
