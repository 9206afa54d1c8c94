//! Analysis runs: `fcip run` and `fcip runs ...`.

use anyhow::{Context, Result};
use serde_json::json;

use fcip::Orchestrator;
use fcip::fcip_config::FcipConfig;
use fcip::orchestrator::ProgressView;
use fcip::sam::{RunOptions, RunStatus, SamPhase};
use fcip::storage::Storage;

use super::super::RunsCommands;

fn parse_phase(raw: Option<&str>) -> Result<Option<SamPhase>> {
    raw.map(|s| s.parse::<SamPhase>().map_err(anyhow::Error::msg))
        .transpose()
}

fn print_progress(progress: &ProgressView) {
    println!();
    println!(
        "Run {} (case {}): {}",
        progress.run_id, progress.case_id, progress.status
    );
    let rows = [
        (
            SamPhase::Anchor,
            progress.anchor_started_at,
            progress.anchor_completed_at,
            "false premises",
            progress.false_premises_found,
        ),
        (
            SamPhase::Inherit,
            progress.inherit_started_at,
            progress.inherit_completed_at,
            "propagation chains",
            progress.propagation_chains_found,
        ),
        (
            SamPhase::Compound,
            progress.compound_started_at,
            progress.compound_completed_at,
            "authority accumulations",
            progress.authority_accumulations_found,
        ),
        (
            SamPhase::Arrive,
            progress.arrive_started_at,
            progress.arrive_completed_at,
            "outcomes linked",
            progress.outcomes_linked,
        ),
    ];
    for (phase, started, completed, label, count) in rows {
        let state = match (started, completed) {
            (_, Some(_)) => "done",
            (Some(_), None) => "interrupted",
            (None, None) => "-",
        };
        println!("  {:<9} {:<12} {}: {}", phase.as_str(), state, label, count);
    }
    if let (Some(phase), Some(message)) = (progress.error_phase, &progress.error_message) {
        println!("  error at {}: {}", phase, message);
    }
    println!();
}

fn finish(progress: &ProgressView) -> Result<()> {
    if progress.status == RunStatus::Failed {
        anyhow::bail!(
            "Analysis run {} failed at {}: {}",
            progress.run_id,
            progress
                .error_phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown phase".to_string()),
            progress.error_message.as_deref().unwrap_or("no error message")
        );
    }
    Ok(())
}

pub async fn cmd_run(
    config: &FcipConfig,
    case_id: &str,
    docs: &[String],
    focus: &[String],
    stop_after: Option<&str>,
    json: bool,
) -> Result<()> {
    let stop_after = parse_phase(stop_after)?;
    let orchestrator = Orchestrator::from_config(&config.toml)?;

    let document_ids = if docs.is_empty() {
        orchestrator
            .store()
            .list_documents(case_id)
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect()
    } else {
        docs.to_vec()
    };
    if document_ids.is_empty() {
        anyhow::bail!("No documents found for case {}", case_id);
    }

    let mut options = RunOptions::new(case_id, document_ids).with_focus_claims(focus.to_vec());
    if let Some(phase) = stop_after {
        options = options.with_stop_after(phase);
    }
    let run_id = orchestrator.start_with(options).await?;
    orchestrator.wait(&run_id).await?;
    let progress = orchestrator.progress(&run_id).await?;
    let findings = orchestrator.findings(&run_id).await?;

    if json {
        let results = if progress.status == RunStatus::Completed {
            Some(orchestrator.results(&run_id).await?)
        } else {
            None
        };
        let out = json!({
            "progress": progress,
            "results": results,
            "findings": findings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_progress(&progress);
        println!("Findings: {}", findings.len());
        for finding in &findings {
            println!("  {}", finding);
        }
        println!();
    }
    finish(&progress)
}

pub async fn cmd_runs(config: &FcipConfig, command: RunsCommands) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config.toml)?;

    match command {
        RunsCommands::List => {
            let runs = orchestrator.list_runs().await?;
            if runs.is_empty() {
                println!("No analysis runs found.");
                return Ok(());
            }
            println!();
            println!("{:<38} {:<14} {:<18} Created", "Run", "Case", "Status");
            for run in runs {
                println!(
                    "{:<38} {:<14} {:<18} {}",
                    run.id,
                    run.case_id,
                    run.status.as_str(),
                    run.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!();
        }
        RunsCommands::Show { run_id } => {
            let progress = orchestrator.progress(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        RunsCommands::Results { run_id } => {
            let results = orchestrator.results(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        RunsCommands::Findings { run_id } => {
            let findings = orchestrator.findings(&run_id).await?;
            println!();
            println!("{:<38} {:<14} {:<9} Title", "Finding", "Engine", "Severity");
            for f in &findings {
                println!(
                    "{:<38} {:<14} {:<9} {}",
                    f.id,
                    f.engine_id,
                    f.severity.as_str(),
                    f.title
                );
            }
            println!();
        }
        RunsCommands::Audit {
            run_id,
            finding_id,
            json,
        } => {
            let trail = orchestrator
                .audit_trail(&run_id, &finding_id)
                .await
                .with_context(|| format!("Failed to build audit trail for {}", finding_id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&trail)?);
            } else {
                print!("{}", trail.render_text());
            }
        }
        RunsCommands::Resume { run_id } => {
            let phase = orchestrator.resume(&run_id).await?;
            println!("Resuming run {} from {}", run_id, phase);
            orchestrator.wait(&run_id).await?;
            let progress = orchestrator.progress(&run_id).await?;
            print_progress(&progress);
            finish(&progress)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_after_accepts_phase_names() {
        assert_eq!(parse_phase(Some("inherit")).unwrap(), Some(SamPhase::Inherit));
        assert_eq!(parse_phase(None).unwrap(), None);
        assert!(parse_phase(Some("verify")).is_err());
    }
}
