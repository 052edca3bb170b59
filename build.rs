use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
    }

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        build_time()?.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let esframe_version = esframe_version_from_metadata()
        .or_else(|_| esframe_version_from_manifest())
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=ESFRAME_VERSION={esframe_version}");

    println!("cargo:rerun-if-changed=esframe/Cargo.toml");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    Ok(())
}

/// Honors SOURCE_DATE_EPOCH for reproducible builds.
fn build_time() -> Result<chrono::DateTime<chrono::Utc>> {
    let Ok(epoch) = env::var("SOURCE_DATE_EPOCH") else {
        return Ok(chrono::Utc::now());
    };

    chrono::Utc
        .timestamp_opt(epoch.trim().parse::<i64>()?, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("SOURCE_DATE_EPOCH out of range: {epoch}"))
}

fn esframe_version_from_metadata() -> Result<String> {
    let output = Command::new(env::var("CARGO").unwrap_or_else(|_| "cargo".into()))
        .args(["metadata", "--format-version", "1", "--no-deps", "--offline"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    metadata["packages"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|package| package["name"].as_str() == Some("esframe"))
        .and_then(|package| package["version"].as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("esframe package not found in metadata"))
}

fn esframe_version_from_manifest() -> Result<String> {
    let toml_content = fs::read_to_string("esframe/Cargo.toml")?;

    for line in toml_content.lines() {
        let line = line.trim();
        if line.starts_with("version")
            && let Some((_, value)) = line.split_once('=')
        {
            return Ok(value.trim().trim_matches('"').trim_matches('\'').to_string());
        }
    }

    anyhow::bail!("Could not find version in esframe/Cargo.toml");
}
