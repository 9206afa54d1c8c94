//! Configuration view and validation commands: `fcip config`.

use anyhow::Result;
use std::path::PathBuf;

use fcip::engine::EngineId;
use fcip::fcip_config::{CONFIG_FILE, FcipConfig, FcipToml};
use fcip::sam::SamPhase;

use super::super::{Cli, ConfigCommands};

fn print_effective(toml: &FcipToml) {
    println!("[storage]");
    println!("  backend = \"{}\"", toml.storage.backend);
    println!("  path = \"{}\"", toml.storage.path.display());
    println!("  seed_fixtures = {}", toml.storage.seed_fixtures);
    println!();

    println!("[dispatcher]");
    println!("  timeout_secs = {}", toml.dispatcher.timeout_secs);
    println!(
        "  max_concurrent_engines = {}",
        toml.dispatcher.max_concurrent_engines
    );
    println!();

    if !toml.engines.is_empty() {
        for (name, section) in &toml.engines {
            println!("[engines.{}]", name);
            if let Some(secs) = section.timeout_secs {
                println!("  timeout_secs = {}", secs);
            }
            if let Some(command) = &section.command {
                println!("  command = \"{}\"", command);
                if !section.args.is_empty() {
                    println!("  args = {:?}", section.args);
                }
            }
            if !section.enabled {
                println!("  enabled = false");
            }
        }
        println!();
    }

    println!("[phases]");
    for phase in SamPhase::ALL {
        let engines: Vec<String> = toml
            .phases
            .get(phase)
            .engines
            .iter()
            .map(|e| {
                if e.required {
                    format!("{}*", e.id)
                } else {
                    e.id.clone()
                }
            })
            .collect();
        println!("  {} = {}", phase, engines.join(", "));
    }
    println!("  (* = required)");
    println!();

    println!("[audit]");
    println!("  max_quote_chars = {}", toml.audit.max_quote_chars);
    println!();
    println!("[compound]");
    println!(
        "  laundering_threshold = {}",
        toml.compound.laundering_threshold
    );
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{}\"", toml.logging.format);
    if let Some(file) = &toml.logging.file {
        println!("  file = \"{}\"", file.display());
    }
    println!();
}

pub fn cmd_config(cli: &Cli, config: &FcipConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("fcip Configuration");
            println!("==================");
            println!();
            match &config.source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No {} found; using defaults.", CONFIG_FILE),
            }
            println!("Effective values (with env/CLI overrides):");
            println!();
            print_effective(&config.toml);
            println!(
                "Engine timeouts: {}",
                EngineId::ALL
                    .iter()
                    .map(|id| format!("{}={}s", id, config.toml.engine_timeout(*id).as_secs()))
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
            if path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            FcipToml::default().save(&path)?;

            println!("Created {} at {}", CONFIG_FILE, path.display());
            println!();
            println!("You can now customize:");
            println!("  - [storage] backend, path");
            println!("  - [engines.<id>] timeout_secs, command, enabled");
            println!("  - [phases.<phase>] engines run in each S.A.M. phase");
            println!();
        }
    }

    Ok(())
}
