use clap::{Parser, Subcommand};
use archgen::blueprint::{BlueprintStore, Node};
use archgen::config::{Config, load_config_from_yaml};
use archgen::fragment::{DeclarativeCompiler, Fragment};
use archgen::generator::{CodeGenerator, ElementParams};
use archgen::generator::http::HttpGenerator;
use archgen::generator::template::TemplateGenerator;
use archgen::runtime::{Callbacks, Manager};
use archgen::runtime::protocol::ErrorPayload;
use std::sync::Arc;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tracing::{info, warn, error};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override scheduler.max_permits
    #[arg(long, global = true)]
    max_permits: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a node in a blueprint file
    Find {
        /// Blueprint tree (.json / .yaml)
        #[arg(long, short)]
        tree: PathBuf,

        #[arg(long)]
        id: String,

        /// Breadth-first instead of depth-first
        #[arg(long)]
        bfs: bool,
    },

    /// Generate one element under a target node and print the resulting tree
    Generate {
        /// Blueprint tree (.json / .yaml); starts from an empty root when omitted
        #[arg(long, short)]
        tree: Option<PathBuf>,

        /// Id of the node the new element is attached to
        #[arg(long)]
        target: String,

        /// Element type (wrapper, horizontal, vertical, input, button, dropdown, radio, text)
        #[arg(long)]
        kind: String,

        #[arg(long)]
        label: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Extra parameters (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        params: Vec<(String, serde_json::Value)>,

        /// Override generator.endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Use the built-in template generator instead of the HTTP service
        #[arg(long)]
        offline: bool,
    },

    /// Push a batch of offline requests through the scheduler
    Demo {
        #[arg(long, default_value_t = 6)]
        requests: usize,

        /// Simulated generation latency in milliseconds
        #[arg(long, default_value_t = 300)]
        latency_ms: u64,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

enum Outcome {
    Done(Fragment),
    Failed(ErrorPayload),
}

/// Routes a request's terminal callback into `tx`, tagged with its target node.
fn report_to(tx: &mpsc::UnboundedSender<(String, Outcome)>, target: &str) -> Callbacks {
    let (ok_tx, err_tx) = (tx.clone(), tx.clone());
    let (ok_target, err_target) = (target.to_string(), target.to_string());

    Callbacks::new()
        .on_progress(|p| info!(status = %p.status, "{}", p.message))
        .on_success(move |fragment| {
            let _ = ok_tx.send((ok_target, Outcome::Done(fragment)));
        })
        .on_error(move |payload| {
            let _ = err_tx.send((err_target, Outcome::Failed(payload)));
        })
}

fn splice(store: &mut BlueprintStore, target: &str, fragment: &Fragment) -> Result<()> {
    let compiler = DeclarativeCompiler::new();
    let id = format!("{}-{}", target, uuid::Uuid::new_v4().simple());
    match fragment.materialize(&compiler, &id) {
        Some(node) => {
            store.append_child(target, node)?;
            info!(target_node_id = %target, node_id = %id, component = %fragment.component_name, "Fragment spliced into blueprint");
        }
        None => {
            warn!(target_node_id = %target, component = %fragment.component_name, "Fragment could not be compiled, keeping the raw source");
            println!("{}", fragment.source);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from_yaml(&path.to_string_lossy())?,
        None => Config::default(),
    };
    if let Some(max_permits) = cli.max_permits {
        config.scheduler.max_permits = max_permits;
    }
    config.validate()?;

    match cli.command {
        Commands::Find { tree, id, bfs } => {
            let store = BlueprintStore::load(&tree)?;
            let node = if bfs { store.find_bfs(&id) } else { store.find(&id) };
            let node = node.ok_or_else(|| anyhow!("Node not found: {}", id))?;
            if let Some(located) = store.find_with_path(&id) {
                println!("path: {}", located.path.join(" > "));
            }
            println!("{}", serde_json::to_string_pretty(node)?);
        }

        Commands::Generate { tree, target, kind, label, description, params, endpoint, offline } => {
            // 1. Load blueprint
            let mut store = match tree {
                Some(path) => BlueprintStore::load(&path)?,
                None => BlueprintStore::new(Node::new("root", "wrapper"))?,
            };
            if !store.contains(&target) {
                return Err(anyhow!("Target node not found: {}", target));
            }

            // 2. Pick generator
            if let Some(endpoint) = endpoint {
                config.generator.endpoint = endpoint;
            }
            let generator: Arc<dyn CodeGenerator> = if offline {
                Arc::new(TemplateGenerator::new())
            } else {
                Arc::new(HttpGenerator::from_config(&config.generator)?)
            };
            info!(generator = generator.name(), "Generator ready");

            // 3. Submit through the worker
            let mut element = ElementParams::new(kind);
            element.label = label;
            element.description = description;
            let mut parameters = element.into_parameters();
            parameters.extend(params);

            let manager = Manager::new(&config.scheduler, generator)?;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let id = manager.generate(target.clone(), parameters, report_to(&tx, &target)).await?;
            info!(request_id = %id, "Request submitted");

            // 4. Apply the outcome
            let outcome = rx.recv().await.ok_or_else(|| anyhow!("Worker stopped without a result"))?;
            manager.shutdown().await;
            match outcome {
                (target, Outcome::Done(fragment)) => splice(&mut store, &target, &fragment)?,
                (_, Outcome::Failed(payload)) => {
                    return Err(anyhow!("Request {} failed ({}): {}", id, payload.kind, payload.message));
                }
            }

            println!("{}", store.to_json_pretty()?);
        }

        Commands::Demo { requests, latency_ms } => {
            let mut store = BlueprintStore::new(
                Node::new("root", "wrapper")
                    .with_child(Node::new("A", "horizontal"))
                    .with_child(Node::new("B", "vertical")),
            )?;

            let generator = Arc::new(TemplateGenerator::new().with_latency(Duration::from_millis(latency_ms)));
            let manager = Manager::new(&config.scheduler, generator)?;
            let (tx, mut rx) = mpsc::unbounded_channel();

            let kinds = ["button", "input", "dropdown", "text"];
            for i in 0..requests {
                let target = if i % 2 == 0 { "A" } else { "B" };
                let params = ElementParams::new(kinds[i % kinds.len()])
                    .label(format!("Element {}", i))
                    .into_parameters();
                let id = manager.generate(target, params, report_to(&tx, target)).await?;
                info!(request_id = %id, target_node_id = target, "Submitted");
            }
            drop(tx);

            let mut received = 0;
            while received < requests {
                let Some((target, outcome)) = rx.recv().await else { break };
                received += 1;
                match outcome {
                    Outcome::Done(fragment) => {
                        info!(target_node_id = %target, "Completed ({}/{})", received, requests);
                        splice(&mut store, &target, &fragment)?;
                    }
                    Outcome::Failed(payload) => {
                        error!(target_node_id = %target, kind = %payload.kind, "{}", payload.message);
                    }
                }
            }

            manager.shutdown().await;
            println!("{}", store.to_json_pretty()?);
        }
    }

    Ok(())
}
