use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fieldgate::config::{FieldgateConfig, LogFormat, LoggingConfig};
use fieldgate::ratelimit::{Coordinator, CounterKey, LimitsFile, RequestContext, ResourceRegistry};
use fieldgate::store::{build_store, CounterStore};

/// Evaluate and manage per-resource rate limits.
#[derive(Debug, Parser)]
#[command(name = "fieldgate", version, about)]
struct Cli {
    /// Service configuration file (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Resource limits file, overriding `limits_path` from the configuration
    #[arg(long)]
    limits: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate resources as one request and print each decision as JSON
    Check {
        /// Request context as a JSON object, e.g. '{"ip": "1.2.3.4"}'
        #[arg(long, default_value = "{}")]
        context: String,

        /// Resource accessed by the request; repeat for several
        #[arg(long = "resource", required = true)]
        resources: Vec<String>,

        /// How many times to send the request
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Load the limits file and list the registered resources
    Validate,
    /// Remove every counter from the configured stores
    Clear,
}

type Stores = (Arc<dyn CounterStore>, HashMap<String, Arc<dyn CounterStore>>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = FieldgateConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), scope = %config.scope, "Configuration loaded");

    let limits_path = cli.limits.clone().or_else(|| config.limits_path.clone());
    let (default_store, stores) = build_stores(&config).await?;

    match cli.command {
        Command::Check {
            context,
            resources,
            repeat,
        } => {
            let context: RequestContext = serde_json::from_str(&context)
                .context("--context must be a JSON object of string values")?;
            let registry = load_registry(limits_path.as_deref(), &stores)?;
            let coordinator = Coordinator::new(config.scope.clone(), Arc::new(registry), default_store)?
                .with_failure_policy(config.on_store_failure);
            info!(
                scope = %coordinator.scope(),
                resources = coordinator.registry().len(),
                "Coordinator ready"
            );

            let resources: Vec<&str> = resources.iter().map(String::as_str).collect();
            for _ in 0..repeat {
                let decision = coordinator.evaluate_request(&context, &resources).await?;
                println!("{}", serde_json::to_string(&decision)?);
            }
        }
        Command::Validate => {
            let registry = load_registry(limits_path.as_deref(), &stores)?;
            for name in registry.resources() {
                let limit = registry.lookup(name)?;
                println!(
                    "{}\tthreshold={}\tinterval={}s\ton={}\tstore={}",
                    name,
                    limit.threshold,
                    limit.window.as_secs(),
                    limit.identifier_key,
                    limit.store_override.as_ref().map_or("default", |s| s.kind()),
                );
            }
        }
        Command::Clear => {
            let namespace = CounterKey::namespace();
            let removed = default_store.clear_namespace(&namespace).await?;
            println!("default\t{}", removed);
            for (name, store) in &stores {
                let removed = store.clear_namespace(&namespace).await?;
                println!("{}\t{}", name, removed);
            }
        }
    }

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// the configured level. Logs go to stderr so command output stays parseable.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn build_stores(config: &FieldgateConfig) -> anyhow::Result<Stores> {
    let default_store = build_store(&config.store).await?;

    let mut stores = HashMap::with_capacity(config.stores.len());
    for (name, store_config) in &config.stores {
        let store = build_store(store_config)
            .await
            .with_context(|| format!("failed to create store `{}`", name))?;
        stores.insert(name.clone(), store);
    }

    info!(
        default = default_store.kind(),
        alternates = stores.len(),
        "Counter stores ready"
    );
    Ok((default_store, stores))
}

fn load_registry(
    path: Option<&str>,
    stores: &HashMap<String, Arc<dyn CounterStore>>,
) -> anyhow::Result<ResourceRegistry> {
    let path = path.context("no limits file: pass --limits or set limits_path")?;
    let registry = LimitsFile::from_file(path)?.into_registry(stores)?;
    Ok(registry)
}
