//! Global statistics command (`kaizen stats`).

use anyhow::Result;
use kaizen::config::KaizenConfig;
use kaizen::models::GlobalStats;
use kaizen::stats;
use kaizen::store::{DbHandle, KaizenDb};

/// Stats are recomputed from storage so they work without a running server.
pub async fn cmd_stats(config: &KaizenConfig, json: bool) -> Result<()> {
    let db_path = config.db_path();
    let stats = if db_path.exists() {
        let db = DbHandle::new(KaizenDb::new(&db_path)?);
        stats::recompute(&db).await?
    } else {
        GlobalStats::default()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }
    Ok(())
}

fn print_stats(stats: &GlobalStats) {
    if stats.total_sessions == 0 && stats.total_attempted == 0 {
        println!("No sessions or jobs recorded yet.");
        return;
    }

    println!();
    println!("Kaizen Statistics");
    println!("=================");
    println!("  sessions:            {}", stats.total_sessions);
    println!("  attempted:           {}", stats.total_attempted);
    println!("  succeeded:           {}", stats.total_succeeded);
    println!("  success rate:        {:.1}%", stats.success_rate * 100.0);
    println!(
        "  avg iterations/run:  {:.1}",
        stats.average_iterations_per_session
    );

    print_rates("By improvement type", &stats.success_rate_by_type);
    print_rates("By mode", &stats.success_rate_by_mode);
    println!();
}

fn print_rates(title: &str, rates: &std::collections::BTreeMap<String, f64>) {
    if rates.is_empty() {
        return;
    }
    println!();
    println!("{:<20} {:>10}", title, "Success");
    println!("{}", "-".repeat(31));
    for (key, rate) in rates {
        println!("{:<20} {:>9.1}%", key, rate * 100.0);
    }
}
