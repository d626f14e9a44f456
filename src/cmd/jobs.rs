//! Improvement job lifecycle commands (`kaizen jobs`).

use anyhow::{Result, bail};
use kaizen::app::Kaizen;
use kaizen::config::KaizenConfig;
use kaizen::models::ImprovementJob;

use super::super::JobsCommands;
use super::short_id;

pub async fn cmd_jobs(config: &KaizenConfig, command: Option<JobsCommands>) -> Result<()> {
    let kaizen = Kaizen::open(config).await?;

    match command {
        None | Some(JobsCommands::List { scope: None }) => list(&kaizen, None).await,
        Some(JobsCommands::List { scope: Some(scope) }) => list(&kaizen, Some(&scope)).await,
        Some(JobsCommands::Show { id }) => {
            let job = kaizen.jobs.get(&resolve_id(&kaizen, &id).await?).await?;
            print_job(&job);
            Ok(())
        }
        Some(JobsCommands::Approve { id }) => {
            let job = kaizen.jobs.approve(&resolve_id(&kaizen, &id).await?).await?;
            println!("Job {} approved", short_id(&job.id));
            Ok(())
        }
        Some(JobsCommands::Reject { id }) => {
            let job = kaizen.jobs.reject(&resolve_id(&kaizen, &id).await?).await?;
            println!("Job {} rejected", short_id(&job.id));
            Ok(())
        }
        Some(JobsCommands::Cancel { id }) => {
            let job = kaizen.jobs.cancel(&resolve_id(&kaizen, &id).await?).await?;
            println!("Job {} cancelled", short_id(&job.id));
            Ok(())
        }
        Some(JobsCommands::Execute { id }) => {
            let id = resolve_id(&kaizen, &id).await?;
            kaizen.jobs.execute(&id).await?;
            println!("Evaluating job {}...", short_id(&id));
            let job = kaizen.jobs.wait_until_settled(&id).await?;
            print_job(&job);
            Ok(())
        }
        Some(JobsCommands::Apply { id }) => {
            let job = kaizen.jobs.apply(&resolve_id(&kaizen, &id).await?).await?;
            println!(
                "{} {} to {}",
                console::style("Applied").green().bold(),
                short_id(&job.id),
                job.file_path
            );
            Ok(())
        }
        Some(JobsCommands::Cleanup { id }) => {
            let id = resolve_id(&kaizen, &id).await?;
            kaizen.jobs.cleanup(&id).await?;
            println!("Job {} archived", short_id(&id));
            Ok(())
        }
        Some(JobsCommands::Resolve { id, reason }) => {
            let job = kaizen
                .jobs
                .resolve_stuck(&resolve_id(&kaizen, &id).await?, &reason)
                .await?;
            println!("Job {} marked {}", short_id(&job.id), job.status);
            Ok(())
        }
    }
}

async fn list(kaizen: &Kaizen, scope: Option<&str>) -> Result<()> {
    let jobs = kaizen.jobs.list(scope).await?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!();
    println!(
        "{:<10} {:<10} {:<14} {:<28} Description",
        "Id", "Status", "Type", "File"
    );
    println!("{}", "-".repeat(88));
    for job in &jobs {
        println!(
            "{:<10} {:<10} {:<14} {:<28} {}",
            short_id(&job.id),
            job.status.as_str(),
            job.improvement_type.as_str(),
            job.file_path,
            job.description
        );
    }
    println!();
    Ok(())
}

/// Accept a full id or a unique prefix of one.
async fn resolve_id(kaizen: &Kaizen, id: &str) -> Result<String> {
    let matches: Vec<String> = kaizen
        .jobs
        .list(None)
        .await?
        .into_iter()
        .map(|j| j.id)
        .filter(|j| j.starts_with(id))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.clone()),
        [] => Ok(id.to_string()),
        _ => bail!("Job id prefix '{}' is ambiguous ({} matches)", id, matches.len()),
    }
}

fn print_job(job: &ImprovementJob) {
    println!();
    println!("{}", console::style(format!("Job {}", job.id)).bold());
    println!("  status:      {}", job.status);
    println!("  mode:        {}", job.mode);
    println!("  type:        {}", job.improvement_type);
    println!("  file:        {}", job.file_path);
    println!("  description: {}", job.description);
    if !job.rationale.is_empty() {
        println!("  rationale:   {}", job.rationale);
    }
    println!(
        "  metrics:     {} loc, complexity {}",
        job.metrics_before.lines_of_code, job.metrics_before.complexity
    );
    if let Some(after) = &job.metrics_after {
        println!(
            "  after:       {} loc, complexity {}",
            after.lines_of_code, after.complexity
        );
    }
    if let Some(council) = &job.council {
        println!(
            "  council:     {} (risk {}, confidence {:.2})",
            council.decision, council.overall_risk_level, council.overall_confidence
        );
    }
    if let Some(architect) = &job.architect {
        println!(
            "  architect:   {} ({:.2}) {}",
            architect.decision, architect.confidence, architect.reasoning
        );
    }
    if let Some(execution) = &job.execution {
        let label = if execution.success {
            console::style("ok").green()
        } else {
            console::style("failed").red()
        };
        println!("  execution:   {} {}", label, execution.message);
    }
    if let Some(err) = &job.error {
        println!("  {}      {}", console::style("error:").red().bold(), err);
    }
    println!();
    print!("{}", job.proposal.diff);
}
