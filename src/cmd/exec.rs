//! Single engine invocation: `fcip exec <engine>`.

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use fcip::Orchestrator;
use fcip::fcip_config::FcipConfig;

fn parse_options(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(raw).context("Invalid --options JSON")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("--options must be a JSON object"),
        },
    }
}

/// Print the engine's response as one JSON line; a failed response is an
/// error exit after printing.
pub async fn cmd_exec(
    config: &FcipConfig,
    engine: &str,
    case_id: &str,
    docs: &[String],
    options: Option<&str>,
) -> Result<()> {
    let options = parse_options(options)?;
    let orchestrator = Orchestrator::from_config(&config.toml)?;
    let response = orchestrator
        .execute_engine(engine, case_id, docs, options)
        .await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        anyhow::bail!(
            "Engine {} failed: {}",
            engine,
            response.error.as_deref().unwrap_or("no error message")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_must_be_an_object() {
        assert!(parse_options(None).unwrap().is_empty());
        assert_eq!(
            parse_options(Some(r#"{"focus_claims": ["x"]}"#)).unwrap().len(),
            1
        );
        assert!(parse_options(Some("[1]")).is_err());
        assert!(parse_options(Some("{oops")).is_err());
    }
}
