//! entity-canon command line
//!
//! Resolves each query argument to its canonical entity and prints one JSON
//! object per query.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use entity_canon::storage::open_store;
use entity_canon::{
    EntityStore, InMemoryEntityStore, NormalizationClient, NormalizerConfig, Resolver,
    ResolverRuntime, RuntimeConfig,
};

/// Command line configuration
struct Config {
    /// Directory of a persistent store; in-memory when absent
    data_dir: Option<PathBuf>,
    /// Worker threads
    workers: usize,
    /// Queries to resolve, in output order
    queries: Vec<String>,
}

fn print_help() {
    println!("entity-canon - resolve queries to canonical entities");
    println!();
    println!("USAGE:");
    println!("    entity-canon [OPTIONS] <QUERY>...");
    println!();
    println!("OPTIONS:");
    println!("    -d, --data-dir <DIR>      Persistent store directory [default: in-memory]");
    println!("    -w, --workers <N>         Resolver threads [default: 4]");
    println!("    -h, --help                Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    ENTITY_CANON_API_KEY      Normalization service key (fallback MISTRAL_API_KEY)");
    println!("    RUST_LOG                  Log filter [default: info]");
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config {
        data_dir: None,
        workers: RuntimeConfig::default().workers,
        queries: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    config.data_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --data-dir requires a value");
                    std::process::exit(1);
                }
            }
            "--workers" | "-w" => {
                if i + 1 < args.len() {
                    config.workers = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid worker count: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --workers requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--" => {
                config.queries.extend(args[i + 1..].iter().cloned());
                break;
            }
            arg if arg.starts_with('-') && arg.len() > 1 => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
            query => {
                config.queries.push(query.to_string());
                i += 1;
            }
        }
    }

    if config.queries.is_empty() {
        eprintln!("error: at least one QUERY is required (see --help)");
        std::process::exit(1);
    }
    config
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = parse_args();

    let normalizer_config = match NormalizerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if normalizer_config.credential().is_none() {
        tracing::warn!("no normalization API key set; unseen queries will use fallback entities");
    }

    let store: Arc<dyn EntityStore> = match &config.data_dir {
        Some(dir) => match open_store(dir, None) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(InMemoryEntityStore::new()),
    };

    let resolver = Resolver::new(store, Arc::new(NormalizationClient::new(normalizer_config)));
    let runtime = match ResolverRuntime::new(
        resolver,
        RuntimeConfig {
            workers: config.workers,
            queue_capacity: config.queries.len(),
        },
    ) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pending: Vec<_> = config
        .queries
        .iter()
        .map(|q| (q, runtime.submit(q.as_str())))
        .collect();

    let mut status = ExitCode::SUCCESS;
    for (query, submitted) in pending {
        match submitted.and_then(entity_canon::ResolutionHandle::join) {
            Ok(resolution) => {
                let line = serde_json::json!({
                    "query": query,
                    "tier": resolution.tier,
                    "entity": resolution.entity,
                });
                println!("{line}");
            }
            Err(e) => {
                eprintln!("error: {query:?}: {e}");
                status = ExitCode::FAILURE;
            }
        }
    }
    status
}
