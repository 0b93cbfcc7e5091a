//! Model registry command-line tool
//!
//! Usage:
//! ```bash
//! cargo run --bin model_registry -- list
//! cargo run --bin model_registry -- active
//! cargo run --bin model_registry -- show <version>
//! cargo run --bin model_registry -- register <artifact> [--version ID] [--metric NAME=VALUE]... [--config JSON]
//! cargo run --bin model_registry -- activate <version>
//! cargo run --bin model_registry -- rollback [version]
//! cargo run --bin model_registry -- promote <version> [--metric-name NAME] [--min-improvement X] [--drawdown-metric NAME]
//! ```
//!
//! The registry directory comes from `registry.base_dir` in `CONFIG_PATH`
//! (default `config.yaml`), or `REGISTRY_DIR` when set.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use tracing::info;

use trading_pipeline::config::{self, logging, AppConfig};
use trading_pipeline::registry::{promote, ModelMetadata, ModelRegistry, ModelVersion, PromotionPolicy};

const USAGE: &str = "usage: model_registry <list|active|show|register|activate|rollback|promote> [args]";

fn open_registry() -> anyhow::Result<ModelRegistry> {
    let config_path = PathBuf::from(
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()),
    );
    let config = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        AppConfig::default()
    };

    let base_dir = std::env::var("REGISTRY_DIR")
        .map(PathBuf::from)
        .unwrap_or(config.registry.base_dir);
    let registry = ModelRegistry::open(&base_dir, config.registry.keep_last)
        .with_context(|| format!("opening registry at {}", base_dir.display()))?;
    Ok(registry)
}

fn print_version(version: &ModelVersion, active: bool) {
    let marker = if active { "*" } else { " " };
    let metrics = version
        .metrics
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    println!(
        "{} {}  {}  {}  {}",
        marker,
        version.version,
        version.created_at.to_rfc3339(),
        &version.code_hash[..version.code_hash.len().min(12)],
        metrics
    );
}

/// Value following `flag`, if present
fn flag_value<'a>(args: &'a [String], flag: &str) -> anyhow::Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| anyhow!("{} requires a value", flag)),
        None => Ok(None),
    }
}

fn parse_metadata(args: &[String]) -> anyhow::Result<ModelMetadata> {
    let mut metadata = ModelMetadata::default();
    if let Some(version) = flag_value(args, "--version")? {
        metadata = metadata.with_version(version);
    }
    if let Some(raw) = flag_value(args, "--config")? {
        metadata.config = serde_json::from_str(raw).context("--config must be JSON")?;
    }

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg != "--metric" {
            continue;
        }
        let pair = iter.next().ok_or_else(|| anyhow!("--metric requires NAME=VALUE"))?;
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid metric '{}', expected NAME=VALUE", pair))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("metric '{}' is not a number", name))?;
        metadata = metadata.with_metric(name, value);
    }
    Ok(metadata)
}

fn run(args: &[String]) -> anyhow::Result<()> {
    let Some(command) = args.first() else {
        bail!(USAGE);
    };
    let rest = &args[1..];
    let registry = open_registry()?;

    match command.as_str() {
        "list" => {
            let active = registry.active_version()?;
            for version in registry.list_versions()? {
                print_version(&version, active.as_deref() == Some(version.version.as_str()));
            }
        }
        "active" => match registry.active_model()? {
            Some(pointer) => println!("{}  {}", pointer.version, pointer.artifact.display()),
            None => println!("no active version"),
        },
        "show" => {
            let version = rest.first().ok_or_else(|| anyhow!("show requires a version"))?;
            let entry = registry.metadata(version)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        "register" => {
            let artifact = rest.first().ok_or_else(|| anyhow!("register requires an artifact path"))?;
            let metadata = parse_metadata(&rest[1..])?;
            let entry = registry.register_version(Path::new(artifact), metadata)?;
            info!(version = %entry.version, "[REGISTRY] Registered");
            println!("{}", entry.version);
        }
        "activate" => {
            let version = rest.first().ok_or_else(|| anyhow!("activate requires a version"))?;
            let entry = registry.activate(version)?;
            println!("{}", entry.version);
        }
        "rollback" => {
            let entry = registry.rollback(rest.first().map(String::as_str))?;
            println!("{}", entry.version);
        }
        "promote" => {
            let version = rest.first().ok_or_else(|| anyhow!("promote requires a version"))?;
            let mut policy = PromotionPolicy::default();
            if let Some(metric) = flag_value(rest, "--metric-name")? {
                policy.metric = metric.to_string();
            }
            if let Some(min) = flag_value(rest, "--min-improvement")? {
                policy.min_improvement = min.parse().context("--min-improvement must be a number")?;
            }
            if let Some(dd) = flag_value(rest, "--drawdown-metric")? {
                policy.max_drawdown_metric = Some(dd.to_string());
            }
            let decision = promote(&registry, version, &policy)?;
            println!(
                "{} {}: {}",
                if decision.promote { "promoted" } else { "kept" },
                decision.candidate,
                decision.reason
            );
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    run(&args)
}
