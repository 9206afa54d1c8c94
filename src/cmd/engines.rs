//! Engine listing: `fcip engines`.

use anyhow::Result;

use fcip::engine::{EngineRegistry, EngineSource, RegistryBuilder};
use fcip::fcip_config::FcipConfig;

fn source_label(source: &EngineSource) -> String {
    match source {
        EngineSource::Builtin => "builtin".to_string(),
        EngineSource::Process { command } => format!("process: {}", command),
        EngineSource::Custom => "custom".to_string(),
    }
}

fn print_registry(registry: &EngineRegistry, config: &FcipConfig) {
    println!();
    println!(
        "{:<14} {:<8} {:<9} {:<34} Source",
        "Engine", "MinDocs", "Timeout", "Name"
    );
    println!("{}", "-".repeat(80));
    for engine in registry.engines() {
        println!(
            "{:<14} {:<8} {:<9} {:<34} {}",
            engine.id.as_str(),
            engine.requirements.min_documents,
            format!("{}s", config.toml.engine_timeout(engine.id).as_secs()),
            engine.id.display_name(),
            source_label(&engine.source)
        );
    }
    println!();
    println!("{} engine(s) registered", registry.len());
    println!();
}

pub fn cmd_engines(config: &FcipConfig) -> Result<()> {
    let registry = RegistryBuilder::from_config(&config.toml).build();
    print_registry(&registry, config);
    Ok(())
}
