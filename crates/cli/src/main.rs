//! `km`: cached reads and guarded bulk mutations from the command line.
//!
//! Reports are printed to stdout as JSON; logs go to stderr. See
//! [`MediatorConfig::from_env`] for the environment variables read at
//! startup.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use km_cache::CacheService;
use km_client::{CachedClient, HttpClient, ResourceClient};
use km_core::config::MediatorConfig;
use km_core::{ResourceId, ResourceType};
use km_safety::{BulkOperation, BulkOutcome, BulkRequest, BulkService};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code when a destructive run stopped at the confirmation gate.
const EXIT_CONFIRMATION_REQUIRED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "km", version, about)]
struct Cli {
    /// Print per-type cache statistics to stderr before exiting.
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one resource (cached).
    Get {
        resource_type: ResourceType,
        id: ResourceId,
    },
    /// List the dependents of one resource (cached).
    Dependents {
        resource_type: ResourceType,
        id: ResourceId,
    },
    /// Show the blast radius of deleting or archiving resources.
    Analyze {
        resource_type: ResourceType,
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<ResourceId>,
    },
    /// Delete resources, halting for confirmation if they have dependents.
    Delete {
        resource_type: ResourceType,
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<ResourceId>,
        /// Proceed without dependency analysis.
        #[arg(long)]
        skip_analysis: bool,
        /// Delete cards directly instead of archiving them first.
        #[arg(long)]
        no_archive_first: bool,
    },
    /// Archive resources, halting for confirmation if they have dependents.
    Archive {
        resource_type: ResourceType,
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<ResourceId>,
        #[arg(long)]
        skip_analysis: bool,
    },
    /// Apply the same field changes to every resource.
    Update {
        resource_type: ResourceType,
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<ResourceId>,
        /// JSON object of fields to set, e.g. '{"title":"Renamed"}'.
        #[arg(long)]
        params: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "km_cli=info,km_safety=info,km_client=info,km_cache=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = MediatorConfig::from_env().context("Failed to load configuration")?;
    let http = HttpClient::from_config(&config).context("Failed to build HTTP client")?;
    let cache = Arc::new(CacheService::new(&config.cache));
    let client = Arc::new(CachedClient::from_config(http, Arc::clone(&cache), &config));
    let service = BulkService::new(Arc::clone(&client), &config);

    tracing::info!(
        base_url = client.inner().base_url(),
        read_only = config.read_only,
        "Client ready",
    );

    let code = run(cli.command, client.as_ref(), &service).await?;

    if cli.stats {
        let stats = cache.all_stats().await;
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(code)
}

async fn run<C: ResourceClient + 'static>(
    command: Commands,
    client: &C,
    service: &BulkService<C>,
) -> Result<ExitCode> {
    match command {
        Commands::Get { resource_type, id } => {
            let body = client
                .get_resource(resource_type, id)
                .await
                .with_context(|| format!("Failed to fetch {}", resource_type.fallback_name(id)))?;
            print_json(&body)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dependents { resource_type, id } => {
            let dependents = list_dependents(client, resource_type, id).await?;
            print_json(&dependents)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze { resource_type, ids } => {
            let request = BulkRequest::new(resource_type, BulkOperation::delete(), ids);
            let (_, report) = service.preflight(&request).await?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Delete {
            resource_type,
            ids,
            skip_analysis,
            no_archive_first,
        } => {
            let operation = BulkOperation::Delete {
                archive_first: !no_archive_first,
            };
            let request = BulkRequest {
                analyze_dependencies: !skip_analysis,
                ..BulkRequest::new(resource_type, operation, ids)
            };
            run_bulk(service, request).await
        }
        Commands::Archive {
            resource_type,
            ids,
            skip_analysis,
        } => {
            let request = BulkRequest {
                analyze_dependencies: !skip_analysis,
                ..BulkRequest::new(resource_type, BulkOperation::Archive, ids)
            };
            run_bulk(service, request).await
        }
        Commands::Update {
            resource_type,
            ids,
            params,
        } => {
            let params: Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let request = BulkRequest::new(resource_type, BulkOperation::Update(params), ids);
            run_bulk(service, request).await
        }
    }
}

async fn run_bulk<C: ResourceClient + 'static>(
    service: &BulkService<C>,
    request: BulkRequest,
) -> Result<ExitCode> {
    let outcome = service.run(request).await?;
    print_json(&outcome)?;

    Ok(match &outcome {
        BulkOutcome::ConfirmationRequired(_) => ExitCode::from(EXIT_CONFIRMATION_REQUIRED),
        BulkOutcome::Completed(report) if report.failed > 0 => ExitCode::FAILURE,
        BulkOutcome::Completed(_) => ExitCode::SUCCESS,
    })
}

/// Direct dependents of a resource, keyed by kind.
async fn list_dependents<C: ResourceClient>(
    client: &C,
    resource_type: ResourceType,
    id: ResourceId,
) -> Result<Value> {
    let mut out = serde_json::Map::new();
    match resource_type {
        ResourceType::Board => {
            out.insert("cards".into(), Value::Array(client.list_board_cards(id).await?));
        }
        ResourceType::Workspace => {
            out.insert(
                "boards".into(),
                Value::Array(client.list_workspace_boards(id).await?),
            );
        }
        ResourceType::Card => {
            out.insert(
                "child_cards".into(),
                Value::Array(client.list_card_children(id).await?),
            );
            out.insert(
                "comments".into(),
                Value::Array(client.list_card_comments(id).await?),
            );
            out.insert(
                "subtasks".into(),
                Value::Array(client.list_card_subtasks(id).await?),
            );
        }
        ResourceType::CustomField | ResourceType::User => {}
    }
    Ok(Value::Object(out))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
