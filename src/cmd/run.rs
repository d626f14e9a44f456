//! Foreground session command (`kaizen run`).

use anyhow::{Result, anyhow};
use kaizen::app::Kaizen;
use kaizen::config::KaizenConfig;
use kaizen::models::{IterationOutcome, Mode, Session};
use tracing::info;

pub async fn cmd_run(
    config: &KaizenConfig,
    mode: Option<&str>,
    max_iterations: Option<u32>,
    scope: Option<&str>,
) -> Result<()> {
    let mode = match mode {
        Some(m) => m.parse::<Mode>().map_err(|e| anyhow!(e))?,
        None => config.toml.engine.mode(),
    };
    let max_iterations = max_iterations.unwrap_or(config.toml.engine.default_max_iterations);
    let scope = scope.unwrap_or(&config.toml.engine.scope).to_string();

    let kaizen = Kaizen::open(config).await?;

    println!(
        "{} scope={} mode={} max_iterations={}",
        console::style("Kaizen session").bold().cyan(),
        scope,
        mode,
        max_iterations
    );

    let session = kaizen.sessions.start(&scope, mode, max_iterations).await?;
    let id = session.id.clone();

    // Ctrl-C asks the session to stop; the loop below still waits for it.
    let stopper = kaizen.sessions.clone();
    let stop_id = id.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping session...");
            let _ = stopper.stop(&stop_id).await;
        }
    });

    let finished = kaizen.sessions.wait_for(&id).await?;
    signal.abort();
    info!(session = %id, status = %finished.status, "Session finished");

    let iterations = kaizen.sessions.iterations(&id).await?;
    println!();
    for it in &iterations {
        let marker = match it.outcome {
            IterationOutcome::Succeeded => console::style("✓").green(),
            IterationOutcome::NoOpportunity | IterationOutcome::NotApproved => {
                console::style("·").dim()
            }
            IterationOutcome::Cancelled => console::style("■").yellow(),
            IterationOutcome::ExecutionFailed | IterationOutcome::PhaseFailed => {
                console::style("✗").red()
            }
        };
        let subject = it
            .proposal
            .as_ref()
            .map(|p| format!("{} {}", p.file_path, p.description))
            .unwrap_or_default();
        println!(
            "  {} #{:<3} {:<16} {}",
            marker,
            it.number,
            it.outcome.as_str(),
            subject
        );
        if let Some(err) = &it.error {
            println!("         {} {}", console::style("Error:").red().bold(), err);
        }
    }

    print_rollup(&finished);
    Ok(())
}

fn print_rollup(session: &Session) {
    println!();
    println!("Session {}", session.id);
    println!("  status:     {}", session.status);
    println!("  iterations: {}", session.iterations_run);
    println!(
        "  attempted:  {} (succeeded {}, failed {})",
        session.attempted, session.succeeded, session.failed
    );
    println!("  success:    {:.1}%", session.success_rate() * 100.0);
    println!();
}
