use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::path::PathBuf;
use std::sync::Arc;
use tazure::azure::auth::AzureCredentials;
use tazure::azure::client::ArmClient;
use tazure::azure::http::{format_azure_error, AzureHttpClient};
use tazure::config::Config;
use tazure::expander::{ExpanderRegistry, ExpanderResponse, RegistryBuilder, TreeNode};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Explore Azure resources as a tree
#[derive(Parser, Debug)]
#[command(name = "tazure", version = tazure::VERSION, about, long_about = None)]
struct Args {
    /// ARM id to start from instead of the tenant list
    #[arg(short, long)]
    node: Option<String>,

    /// Number of levels to expand
    #[arg(short, long, default_value_t = 2)]
    depth: usize,

    /// Management endpoint (sovereign clouds)
    #[arg(long)]
    endpoint: Option<String>,

    /// Print the raw response body under each expanded node
    #[arg(long)]
    show_response: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("tazure {} started with log level: {:?}", tazure::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("tazure").join("tazure.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".tazure").join("tazure.log");
    }
    PathBuf::from("tazure.log")
}

/// An expanded (or unexpanded) node with its subtree
struct Branch {
    node: TreeNode,
    outcome: Option<Outcome>,
}

enum Outcome {
    Expanded {
        response: Option<ExpanderResponse>,
        children: Vec<Branch>,
    },
    Failed(String),
}

/// Expand `node` and its descendants down to `depth`, siblings concurrently
fn explore(registry: &ExpanderRegistry, node: TreeNode, depth: usize) -> BoxFuture<'_, Branch> {
    async move {
        if depth == 0 {
            return Branch { node, outcome: None };
        }

        let outcome = match registry.expand(&node).await {
            Ok(result) => {
                let children = join_all(
                    result
                        .nodes
                        .into_iter()
                        .map(|child| explore(registry, child, depth - 1)),
                )
                .await;
                Outcome::Expanded {
                    response: result.response,
                    children,
                }
            }
            Err(e) => {
                let error = anyhow::Error::from(e);
                tracing::error!("{:#}", error);
                Outcome::Failed(format_azure_error(&error))
            }
        };

        Branch {
            node,
            outcome: Some(outcome),
        }
    }
    .boxed()
}

fn print_branch(branch: &Branch, indent: usize, show_response: bool) {
    let pad = "  ".repeat(indent);
    let label = if branch.node.display.is_empty() {
        &branch.node.name
    } else {
        &branch.node.display
    };
    println!("{}{} [{}]", pad, label, branch.node.item_type);

    match &branch.outcome {
        None => {}
        Some(Outcome::Failed(message)) => println!("{}  ! {}", pad, message),
        Some(Outcome::Expanded { response, children }) => {
            if show_response {
                if let Some(response) = response {
                    for line in response.body.lines() {
                        println!("{}  | {}", pad, line);
                    }
                }
            }
            for child in children {
                print_branch(child, indent + 1, show_response);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    let endpoint = config.effective_endpoint(args.endpoint.as_deref());
    tracing::info!("Using management endpoint {}", endpoint);

    let client = ArmClient::new(
        AzureCredentials::from_environment(),
        &endpoint,
        Some(config.request_timeout()),
    )?;
    let data_plane = AzureHttpClient::new(Some(config.request_timeout()))?.inner().clone();

    let mut builder = RegistryBuilder::standard(Arc::new(client), data_plane)?;
    if let Some(timeout) = config.expand_timeout() {
        builder = builder.expand_timeout(timeout);
    }
    let registry = builder.build();

    let start = match &args.node {
        Some(id) => registry.default_expander().node_for_id(id)?,
        None => TreeNode::root(),
    };

    let tree = explore(&registry, start, args.depth).await;
    print_branch(&tree, 0, args.show_response);

    if let Some(id) = &args.node {
        if let Err(e) = config.set_last_node(id) {
            tracing::warn!("Failed to save config: {:#}", e);
        }
    }

    Ok(())
}
