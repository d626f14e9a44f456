//! Configuration view and validation commands (`kaizen config`).

use anyhow::Result;
use kaizen::config::{CONFIG_DIR, CONFIG_FILE, KaizenConfig, KaizenToml};
use kaizen::models::Mode;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Kaizen Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                KaizenToml::load(&config_path)?
            } else {
                println!("No kaizen.toml found at {}", config_path.display());
                println!("Using default configuration.");
                KaizenToml::default()
            };
            println!();
            print_toml(&toml);

            println!("Effective values (with env overrides):");
            let config = KaizenConfig::new(project_dir.to_path_buf())?;
            println!("  target_dir = \"{}\"", config.target_dir().display());
            println!("  db_path = \"{}\"", config.db_path().display());
            println!("  port = {}", config.toml.server.port);
            println!("  scope = \"{}\"", config.toml.engine.scope);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No kaizen.toml found at {}", config_path.display());
                println!("Using default configuration (valid).");
                return Ok(());
            }

            println!("Validating {}...", config_path.display());
            let toml = match KaizenToml::load(&config_path) {
                Ok(t) => t,
                Err(e) => {
                    println!();
                    println!("{} {:#}", console::style("Error:").red().bold(), e);
                    std::process::exit(1);
                }
            };

            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  {} {}", console::style("⚠").yellow(), warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("kaizen.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to regenerate.");
                return Ok(());
            }
            std::fs::create_dir_all(&config_dir)?;
            KaizenToml::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}

fn print_toml(toml: &KaizenToml) {
    println!("[engine]");
    println!("  target_dir = \"{}\"", toml.engine.target_dir.display());
    println!("  scope = \"{}\"", toml.engine.scope);
    println!("  default_mode = \"{}\"", toml.engine.default_mode);
    println!("  default_max_iterations = {}", toml.engine.default_max_iterations);
    println!("  phase_timeout_secs = {}", toml.engine.phase_timeout_secs);
    println!("  iteration_delay_ms = {}", toml.engine.iteration_delay_ms);
    println!();

    println!("[architect.thresholds]");
    for mode in Mode::ALL {
        let marker = if toml.architect.thresholds.get(mode).is_some() {
            ""
        } else {
            " (default)"
        };
        println!("  {} = {:.2}{}", mode, toml.threshold(mode), marker);
    }
    println!();

    println!("[detector]");
    println!("  include = {:?}", toml.detector.include);
    println!("  exclude = {:?}", toml.detector.exclude);
    println!("  max_candidates = {}", toml.detector.max_candidates);
    println!();

    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  db_path = \"{}\"", toml.server.db_path.display());
    println!();

    println!("[logging]");
    println!("  format = \"{}\"", toml.logging.format);
    println!("  level = \"{}\"", toml.logging.level);
    println!("  file = {}", toml.logging.file);
    println!();
}
