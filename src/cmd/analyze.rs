//! Opportunity scan into pending jobs (`kaizen analyze`).

use anyhow::{Result, anyhow};
use kaizen::app::Kaizen;
use kaizen::config::KaizenConfig;
use kaizen::models::Mode;

use super::short_id;

pub async fn cmd_analyze(config: &KaizenConfig, mode: Option<&str>, scope: Option<&str>) -> Result<()> {
    let mode = mode
        .map(|m| m.parse::<Mode>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let scope = scope.unwrap_or(&config.toml.engine.scope).to_string();

    let kaizen = Kaizen::open(config).await?;
    let jobs = kaizen.jobs.analyze(&scope, mode).await?;

    if jobs.is_empty() {
        println!("No improvement opportunities found in {}", config.target_dir().display());
        return Ok(());
    }

    println!();
    println!("Created {} pending job(s):", jobs.len());
    println!();
    println!("{:<10} {:<14} {:<32} Description", "Id", "Type", "File");
    println!("{}", "-".repeat(80));
    for job in &jobs {
        println!(
            "{:<10} {:<14} {:<32} {}",
            short_id(&job.id),
            job.improvement_type.as_str(),
            job.file_path,
            job.description
        );
    }
    println!();
    println!("Review with `kaizen jobs show <id>`, then `kaizen jobs approve <id>`.");
    Ok(())
}
