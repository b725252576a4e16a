//! CLI binary for running and inspecting payroll runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use payrun_pipeline::{
    ApprovalDecision, Collaborators, DiagnosticLevel, InMemoryRoster, NoFlags, PipelineConfig,
    PipelineEngine, PipelineEvent, PipelineSession, ProgressSummary, RemediationPolicy,
    RosterFlagger, RunSnapshot, ScriptedFlagger, SimulatedWorker, StepDefinition, StepRegistry,
    ValidationFlagger,
};
use payrun_types::{StepStatus, TargetPage, ValidationFlag};

#[derive(Parser)]
#[command(name = "payrun", version, about = "Step-by-step payroll run processing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a payroll run interactively
    Run {
        /// Step catalogue JSON (default: built-in nine-step payroll catalogue)
        #[arg(short, long)]
        catalogue: Option<PathBuf>,

        /// Employee roster JSON used for validation (default: built-in sample roster)
        #[arg(short, long, conflicts_with_all = ["flags", "clean"])]
        roster: Option<PathBuf>,

        /// Scripted flags JSON: an object mapping step index to a list of flags
        #[arg(long, conflicts_with = "clean")]
        flags: Option<PathBuf>,

        /// Skip validation entirely; every step is clean
        #[arg(long)]
        clean: bool,

        /// Simulated processing time per step in milliseconds
        #[arg(long, default_value = "400")]
        delay_ms: u64,

        /// Flag a step whose processing takes longer than this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Returning from remediation does not re-validate; flags must be overridden
        #[arg(long)]
        require_override: bool,

        /// Answer every pause automatically (override flags, continue, approve)
        #[arg(long)]
        auto: bool,

        /// Directory downloaded reports are written to
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
    },

    /// Lint a step catalogue
    Validate {
        /// Path to the catalogue JSON
        catalogue: PathBuf,
    },

    /// List the steps of a catalogue
    Steps {
        /// Path to the catalogue JSON (default: built-in catalogue)
        catalogue: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            catalogue,
            roster,
            flags,
            clean,
            delay_ms,
            timeout_ms,
            require_override,
            auto,
            reports_dir,
        } => {
            let flagger = build_flagger(roster.as_deref(), flags.as_deref(), clean)?;
            let config = PipelineConfig {
                step_timeout: timeout_ms.map(Duration::from_millis),
                remediation_policy: if require_override {
                    RemediationPolicy::RequireOverride
                } else {
                    RemediationPolicy::Revalidate
                },
                ..Default::default()
            };
            let engine = PipelineEngine::new(
                load_registry(catalogue.as_deref())?,
                flagger,
                Arc::new(SimulatedWorker::new(Duration::from_millis(delay_ms))),
            )
            .with_config(config);
            cmd_run(engine, auto, &reports_dir).await?;
        }
        Commands::Validate { catalogue } => {
            cmd_validate(&catalogue)?;
        }
        Commands::Steps { catalogue } => {
            cmd_steps(catalogue.as_deref())?;
        }
    }

    Ok(())
}

fn load_registry(path: Option<&Path>) -> anyhow::Result<StepRegistry> {
    Ok(match path {
        Some(p) => StepRegistry::from_json_file(p)?,
        None => StepRegistry::payroll_default(),
    })
}

fn build_flagger(
    roster: Option<&Path>,
    flags: Option<&Path>,
    clean: bool,
) -> anyhow::Result<Arc<dyn ValidationFlagger>> {
    if clean {
        return Ok(Arc::new(NoFlags));
    }
    if let Some(path) = flags {
        let data = std::fs::read_to_string(path)?;
        let scripted: HashMap<usize, Vec<ValidationFlag>> = serde_json::from_str(&data)?;
        let flagger = scripted
            .into_iter()
            .fold(ScriptedFlagger::new(), |f, (index, flags)| f.with_flags(index, flags));
        return Ok(Arc::new(flagger));
    }
    let roster = match roster {
        Some(p) => InMemoryRoster::from_json_file(p)?,
        None => InMemoryRoster::sample(),
    };
    Ok(Arc::new(RosterFlagger::new(Arc::new(roster))))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(path)?;
    let steps: Vec<StepDefinition> = serde_json::from_str(&data)?;
    let diagnostics = payrun_pipeline::validate(&steps);

    if diagnostics.is_empty() {
        println!("Catalogue is valid ({} steps)", steps.len());
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let level = match diag.level {
            DiagnosticLevel::Error => {
                has_error = true;
                "ERROR"
            }
            DiagnosticLevel::Warning => "WARN",
        };
        match &diag.step_id {
            Some(step) => println!("[{}] {} ({}): {}", level, diag.rule, step, diag.message),
            None => println!("[{}] {}: {}", level, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_steps(path: Option<&Path>) -> anyhow::Result<()> {
    let registry = load_registry(path)?;
    println!("Steps: {}", registry.len());
    for (i, step) in registry.iter().enumerate() {
        let mut tags = Vec::new();
        if step.checkpoint {
            tags.push("checkpoint".to_string());
        }
        if step.requires_confirmation {
            tags.push("confirmation".to_string());
        }
        if let Some(title) = &step.report_title {
            tags.push(format!("report: {title}"));
        }
        if let Some(kind) = step.validation {
            tags.push(format!("validates: {kind:?}"));
        }
        if let Some(page) = step.target_page {
            tags.push(format!("fix on: {page}"));
        }
        println!("  {:>2}. {} ({})", i + 1, step.name, step.id);
        if !step.description.is_empty() {
            println!("      {}", step.description);
        }
        if !tags.is_empty() {
            println!("      [{}]", tags.join(", "));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Interactive run
// ---------------------------------------------------------------------------

/// A line typed at the run prompt.
#[derive(Debug, PartialEq)]
enum ConsoleAction {
    Continue,
    Override,
    Remediate(Option<TargetPage>),
    Back,
    Confirm,
    Approve(String),
    Reject(String),
    Download(String),
    View(String),
    Status,
    Quit,
}

fn parse_action(line: &str) -> Result<ConsoleAction, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let action = match verb.to_ascii_lowercase().as_str() {
        "c" | "continue" => ConsoleAction::Continue,
        "o" | "override" => ConsoleAction::Override,
        "fix" | "remediate" => {
            if rest.is_empty() {
                ConsoleAction::Remediate(None)
            } else {
                ConsoleAction::Remediate(Some(
                    rest.parse::<TargetPage>().map_err(|e| e.to_string())?,
                ))
            }
        }
        "back" => ConsoleAction::Back,
        "confirm" => ConsoleAction::Confirm,
        "approve" => ConsoleAction::Approve(if rest.is_empty() { "console".into() } else { rest.into() }),
        "reject" => ConsoleAction::Reject(rest.into()),
        "download" | "view" if rest.is_empty() => {
            return Err(format!("usage: {verb} <step_id>"));
        }
        "download" => ConsoleAction::Download(rest.into()),
        "view" => ConsoleAction::View(rest.into()),
        "" | "s" | "status" => ConsoleAction::Status,
        "q" | "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(format!("unknown action '{other}'")),
    };
    Ok(action)
}

/// The action `--auto` takes at a pause, or `None` once the run is over.
fn auto_action(snap: &RunSnapshot) -> Option<ConsoleAction> {
    if snap.is_complete {
        return None;
    }
    let step = snap.current_step();
    match step.status {
        StepStatus::Flagged => Some(ConsoleAction::Override),
        StepStatus::Done if step.requires_confirmation && snap.awaiting_approval => {
            Some(ConsoleAction::Approve("auto".into()))
        }
        StepStatus::Done if step.requires_confirmation => Some(ConsoleAction::Confirm),
        StepStatus::Done => Some(ConsoleAction::Continue),
        StepStatus::Pending | StepStatus::InProgress => None,
    }
}

fn headline(snap: &RunSnapshot) -> String {
    let summary = ProgressSummary::of(&snap.steps, snap.is_complete);
    let mut line = format!(
        "Payroll run {}  [{:>3}%]  {}/{} done",
        snap.id, summary.percent, summary.done, summary.total
    );
    if summary.flagged > 0 {
        line.push_str(&format!(", {} flagged", summary.flagged));
    }
    line
}

fn render(snap: &RunSnapshot) {
    println!();
    println!("{}", headline(snap));
    for (i, step) in snap.steps.iter().enumerate() {
        let mark = match step.status {
            StepStatus::Pending => "  ",
            StepStatus::InProgress => "..",
            StepStatus::Done if step.overridden => "ok*",
            StepStatus::Done => "ok",
            StepStatus::Flagged => "!!",
        };
        let cursor = if i == snap.current_step_index && !snap.is_complete { ">" } else { " " };
        let checkpoint = if step.is_checkpoint { " (checkpoint)" } else { "" };
        println!("{cursor} [{mark:^3}] {}{checkpoint}", step.name);
    }

    if snap.is_complete {
        println!("\nRun complete.");
        return;
    }
    let step = snap.current_step();
    match step.status {
        StepStatus::Flagged => {
            println!("\n{} issue(s) on '{}':", step.flags.len(), step.name);
            for flag in &step.flags {
                println!("  - [{:?}] {}: {}", flag.severity, flag.employee_name, flag.description);
            }
            println!("Actions: override | fix [page] | back | quit");
        }
        StepStatus::Done if snap.awaiting_approval => {
            println!("\nAwaiting approval of '{}'.", step.name);
            println!("Actions: approve [reference] | reject <reason> | quit");
        }
        StepStatus::Done if step.requires_confirmation => {
            println!("\n'{}' is ready for confirmation.", step.name);
            println!("Actions: confirm | download <step> | view <step> | quit");
        }
        StepStatus::Done => {
            println!("\nCheckpoint '{}' ready for review.", step.name);
            println!("Actions: continue | download <step> | view <step> | quit");
        }
        _ => {}
    }
}

async fn apply(
    session: &PipelineSession,
    action: ConsoleAction,
    reports_dir: &Path,
) -> anyhow::Result<()> {
    match action {
        ConsoleAction::Continue => session.continue_processing().await?,
        ConsoleAction::Override => session.override_and_continue().await?,
        ConsoleAction::Remediate(page) => {
            let page = session.request_remediation(page).await?;
            println!("Open the {page} page, fix the issues, then type 'back'.");
        }
        ConsoleAction::Back => {
            if !session.return_from_remediation().await? {
                println!("Re-validation is disabled; override the flags to continue.");
            }
        }
        ConsoleAction::Confirm => {
            let request = session.request_confirmation().await?;
            println!("Sent '{}' for approval.", request.step_name);
        }
        ConsoleAction::Approve(reference) => {
            session
                .resume_from_approval(ApprovalDecision::Approved { reference })
                .await?
        }
        ConsoleAction::Reject(reason) => {
            session
                .resume_from_approval(ApprovalDecision::Rejected { reason })
                .await?
        }
        ConsoleAction::Download(step_id) => {
            let report = session.download_report(&step_id).await?;
            std::fs::create_dir_all(reports_dir)?;
            let path = reports_dir.join(format!("{}.txt", report.step_id));
            std::fs::write(&path, &report.body)?;
            println!("Saved '{}' to {}", report.title, path.display());
        }
        ConsoleAction::View(step_id) => {
            let report = session.view_report(&step_id).await?;
            println!("\n{}", report.body);
        }
        ConsoleAction::Status | ConsoleAction::Quit => {}
    }
    Ok(())
}

async fn cmd_run(engine: PipelineEngine, auto: bool, reports_dir: &Path) -> anyhow::Result<()> {
    let engine = Arc::new(engine);
    let mut events = engine.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PipelineEvent::StepStarted { step_id, index } = event {
                println!("  processing {} ({})", step_id, index + 1);
            }
        }
    });

    let session = PipelineSession::open(engine, Collaborators::default());
    tracing::debug!(run = %session.run_id(), auto, reports = %reports_dir.display(), "Interactive run");
    println!("Starting payroll run {}", session.run_id());
    session.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        session.settled().await?;
        let snap = session.snapshot().await?;
        render(&snap);

        let action = if auto {
            match auto_action(&snap) {
                Some(action) => {
                    println!("> {action:?}");
                    action
                }
                None => break,
            }
        } else {
            if snap.is_complete {
                break;
            }
            print!("> ");
            std::io::Write::flush(&mut std::io::stdout())?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            match parse_action(&line) {
                Ok(action) => action,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            }
        };

        if action == ConsoleAction::Quit {
            break;
        }
        if let Err(e) = apply(&session, action, reports_dir).await {
            println!("Cannot do that: {e}");
        }
    }

    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_actions() {
        assert_eq!(parse_action("continue"), Ok(ConsoleAction::Continue));
        assert_eq!(parse_action(" O "), Ok(ConsoleAction::Override));
        assert_eq!(parse_action("fix"), Ok(ConsoleAction::Remediate(None)));
        assert_eq!(
            parse_action("fix timesheets"),
            Ok(ConsoleAction::Remediate(Some(TargetPage::Timesheets)))
        );
        assert_eq!(
            parse_action("reject totals are off"),
            Ok(ConsoleAction::Reject("totals are off".into()))
        );
        assert_eq!(
            parse_action("download gross_to_net"),
            Ok(ConsoleAction::Download("gross_to_net".into()))
        );
        assert_eq!(parse_action(""), Ok(ConsoleAction::Status));
        assert!(parse_action("view").is_err());
        assert!(parse_action("fix nowhere").is_err());
        assert!(parse_action("launch").is_err());
    }

    #[tokio::test]
    async fn headline_counts_done_and_flagged_steps() {
        let engine = Arc::new(PipelineEngine::new(
            StepRegistry::payroll_default(),
            Arc::new(RosterFlagger::new(Arc::new(InMemoryRoster::sample()))),
            Arc::new(SimulatedWorker::instant()),
        ));
        let session = PipelineSession::open(engine, Collaborators::default());

        let snap = session.snapshot().await.unwrap();
        assert!(headline(&snap).ends_with("[  0%]  0/9 done"));

        session.start().await.unwrap();
        session.settled().await.unwrap();
        let snap = session.snapshot().await.unwrap();
        let line = headline(&snap);
        assert!(line.starts_with(&format!("Payroll run {}", snap.id)));
        assert!(line.ends_with("0/9 done, 1 flagged"), "{line}");
    }

    #[tokio::test]
    async fn auto_mode_drives_a_run_to_completion() {
        let engine = Arc::new(PipelineEngine::new(
            StepRegistry::payroll_default(),
            Arc::new(RosterFlagger::new(Arc::new(InMemoryRoster::sample()))),
            Arc::new(SimulatedWorker::instant()),
        ));
        let session = PipelineSession::open(engine, Collaborators::default());
        session.start().await.unwrap();

        let dir = std::env::temp_dir();
        let mut actions = 0;
        loop {
            session.settled().await.unwrap();
            let snap = session.snapshot().await.unwrap();
            let Some(action) = auto_action(&snap) else {
                assert!(snap.is_complete);
                break;
            };
            apply(&session, action, &dir).await.unwrap();
            actions += 1;
            assert!(actions < 20, "auto mode did not converge");
        }
        // Three overrides, one continue, confirm, approve.
        assert_eq!(actions, 6);
    }
}
