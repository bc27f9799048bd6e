use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geobridge::config::Config;
use geobridge::error::{Error, ErrorCategory};
use geobridge::layers::FileProject;
use geobridge::metrics;
use geobridge::publish::runner::{publish_on_background, publish};
use geobridge::publish::task::FATAL_MESSAGE;
use geobridge::publish::{MetadataPolicy, PublishRequest, PublishTask};
use geobridge::report::{HtmlReport, ReportPresenter, TextReport};
use geobridge::servers::geonetwork::{GeonetworkConfig, GeonetworkServer, MetadataProfile};
use geobridge::servers::geoserver::{GeoserverConfig, GeoserverServer, StorageMode};
use geobridge::servers::postgis::{PostgisConfig, PostgisServer};
use geobridge::servers::{RegistryError, Server, ServerContext, ServerFilter, ServerRegistry};
use geobridge::settings::{SettingsStore, SqliteSettings};

#[derive(Parser)]
#[command(
    name = "geobridge",
    version,
    about = "Publish GIS layers, styles and metadata to GeoServer, GeoNetwork and PostGIS",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configured servers
    Servers {
        #[command(subcommand)]
        action: ServersCommand,
    },

    /// Publish project layers
    Publish {
        /// Project file (JSON)
        #[arg(short, long)]
        project: PathBuf,

        /// Comma-separated layer names, in publishing order
        #[arg(short, long, value_delimiter = ',', required = true)]
        layers: Vec<String>,

        /// Geodata server name
        #[arg(long)]
        geodata: Option<String>,

        /// Metadata server name
        #[arg(long)]
        metadata: Option<String>,

        /// Only upload styles
        #[arg(long, default_value = "false")]
        only_symbology: bool,

        /// Published fields of a layer, as `layer=field1,field2`
        #[arg(long)]
        fields: Vec<String>,

        /// Override the configured metadata policy (deny, allow, allow_only_data)
        #[arg(long)]
        policy: Option<MetadataPolicy>,

        /// Run on a background worker
        #[arg(long, default_value = "false")]
        background: bool,

        /// Also write the report as HTML
        #[arg(long)]
        html_report: Option<PathBuf>,

        /// Print Prometheus metrics after the run
        #[arg(long, default_value = "false")]
        print_metrics: bool,
    },

    /// Remove a published layer and its style
    Unpublish {
        /// Layer name
        #[arg(short, long)]
        layer: String,

        /// Geodata server name
        #[arg(long)]
        geodata: String,
    },
}

#[derive(Subcommand)]
enum ServersCommand {
    /// List configured servers
    List {
        /// geodata, metadata, database or all
        #[arg(long, default_value = "all")]
        kind: String,
    },

    /// Add or replace a GeoServer server
    AddGeoserver {
        name: String,
        url: String,
        #[arg(long, default_value = "")]
        authid: String,
        #[arg(long, default_value = "geobridge")]
        workspace: String,
        /// upload or postgis
        #[arg(long, default_value = "upload")]
        storage: StorageMode,
        /// PostGIS database server name (with --storage postgis)
        #[arg(long)]
        postgisdb: Option<String>,
        /// PostGIS datastore name on GeoServer
        #[arg(long)]
        datastore: Option<String>,
    },

    /// Add or replace a GeoNetwork server
    AddGeonetwork {
        name: String,
        url: String,
        #[arg(long, default_value = "")]
        authid: String,
        /// default, inspire or dutch
        #[arg(long, default_value = "default")]
        profile: MetadataProfile,
    },

    /// Add or replace a PostGIS database
    AddPostgis {
        name: String,
        database: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value = "5432")]
        port: u16,
        #[arg(long, default_value = "public")]
        schema: String,
        #[arg(long, default_value = "")]
        authid: String,
    },

    /// Remove a server
    Remove { name: String },

    /// Test the connection to a server
    Test { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let category = ErrorCategory::of(&*e);
            tracing::debug!(category = category.as_str(), "Command failed");
            eprintln!("Error: {e:?}");
            ExitCode::from(category.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .and_then(|config| config.validate().map(|_| config))
    .map_err(|e| Error::config(format!("{e:#}")))?;

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let store = Arc::new(SqliteSettings::open(&config.settings.path)?);
    let loaded = ServerRegistry::open(store.clone(), ServerContext::from_config(&config));

    match cli.command {
        Commands::Servers { action } => match loaded {
            Ok(mut registry) => servers(&mut registry, action).await?,
            // listing and removing still work on the raw entries
            Err(e) => stored_servers(&*store, action, e)?,
        },

        Commands::Publish {
            project,
            layers,
            geodata,
            metadata,
            only_symbology,
            fields,
            policy,
            background,
            html_report,
            print_metrics,
        } => {
            tracing::info!(
                project = %project.display(),
                layers = layers.len(),
                geodata = ?geodata,
                metadata = ?metadata,
                only_symbology = %only_symbology,
                "Starting publish command"
            );

            let registry = loaded.context("Failed to load server registry")?;
            let mut request = PublishRequest::new(layers).only_symbology(only_symbology);
            for (layer, selected) in parse_fields(&fields)? {
                request = request.with_fields(layer, selected);
            }

            let project = Arc::new(FileProject::load(&project)?);
            let mut task = PublishTask::new(request, project)
                .with_policy(policy.unwrap_or(config.publish.allow_without_metadata));
            if let Some(name) = &geodata {
                task = task.with_geodata_server(registry.geodata_server(name)?);
            }
            if let Some(name) = &metadata {
                task = task.with_metadata_server(registry.metadata_server(name)?);
            }

            let task = Arc::new(task);
            let outcome = if background {
                let running = publish_on_background(task.clone());
                running.wait().await
            } else {
                publish(&task).await
            };

            task.finished(&outcome, &TextReport::stdout())?;
            if let Some(path) = html_report {
                let presenter: &dyn ReportPresenter = &HtmlReport::new(path)?;
                task.finished(&outcome, presenter)?;
            }
            if print_metrics {
                println!("{}", metrics::encode_metrics().map_err(|e| anyhow::anyhow!("{e}"))?);
            }

            match outcome.status {
                geobridge::publish::TaskStatus::Completed => {}
                geobridge::publish::TaskStatus::Canceled => println!("Publishing canceled."),
                _ => anyhow::bail!(FATAL_MESSAGE),
            }
        }

        Commands::Unpublish { layer, geodata } => {
            tracing::info!(layer = %layer, geodata = %geodata, "Starting unpublish command");
            let registry = loaded.context("Failed to load server registry")?;
            let server = registry.geodata_server(&geodata)?;
            let log = server.unpublish_data(&layer).await?;
            for warning in &log.warnings {
                println!("warning: {warning}");
            }
            println!("Layer '{layer}' removed from {geodata}");
        }
    }

    Ok(())
}

async fn servers(registry: &mut ServerRegistry, action: ServersCommand) -> Result<()> {
    let context = registry.context().clone();
    match action {
        ServersCommand::List { kind } => {
            let filter = match kind.as_str() {
                "geodata" => ServerFilter::Geodata,
                "metadata" => ServerFilter::Metadata,
                "database" => ServerFilter::Database,
                "all" => ServerFilter::All,
                other => anyhow::bail!("Unknown server kind '{other}'"),
            };
            let servers = registry.list(filter);
            if servers.is_empty() {
                println!("No servers configured.");
            }
            for (name, server) in servers {
                println!("{name}\t{}", server.type_name());
            }
        }

        ServersCommand::AddGeoserver {
            name,
            url,
            authid,
            workspace,
            storage,
            postgisdb,
            datastore,
        } => {
            let config = GeoserverConfig {
                authid,
                workspace,
                storage,
                postgisdb,
                datastore,
                ..GeoserverConfig::new(name, url)
            };
            let server = GeoserverServer::new(config, &context)?;
            registry.add(Server::Geoserver(Arc::new(server)))?;
        }

        ServersCommand::AddGeonetwork {
            name,
            url,
            authid,
            profile,
        } => {
            let config = GeonetworkConfig {
                authid,
                profile,
                ..GeonetworkConfig::new(name, url)
            };
            let server = GeonetworkServer::new(config, &context)?;
            registry.add(Server::Geonetwork(Arc::new(server)))?;
        }

        ServersCommand::AddPostgis {
            name,
            database,
            host,
            port,
            schema,
            authid,
        } => {
            let config = PostgisConfig {
                host,
                port,
                schema,
                authid,
                ..PostgisConfig::new(name, database)
            };
            let server = PostgisServer::new(config, &context)?;
            registry.add(Server::Postgis(Arc::new(server)))?;
        }

        ServersCommand::Remove { name } => {
            registry.remove(&name)?;
            println!("Server '{name}' removed");
        }

        ServersCommand::Test { name } => {
            let server = registry.get(&name)?;
            if server.test_connection().await {
                println!("Connection to '{name}' OK");
            } else {
                anyhow::bail!("Could not connect to '{name}'");
            }
        }
    }
    Ok(())
}

/// Server commands against the stored entries of a registry that failed to load
fn stored_servers(
    store: &dyn SettingsStore,
    action: ServersCommand,
    load_error: RegistryError,
) -> Result<()> {
    tracing::warn!(error = %load_error, "Server registry could not be loaded");
    match action {
        ServersCommand::List { .. } => {
            println!("Server registry could not be loaded: {load_error}");
            for entry in ServerRegistry::stored_entries(store)? {
                println!(
                    "{}\t{}",
                    entry.name.as_deref().unwrap_or("<unnamed>"),
                    entry.type_name
                );
            }
        }
        ServersCommand::Remove { name } => {
            ServerRegistry::remove_stored_entry(store, &name)?;
            println!("Server '{name}' removed");
        }
        _ => return Err(load_error).context("Failed to load server registry"),
    }
    Ok(())
}

/// Parse `layer=field1,field2` selections
fn parse_fields(entries: &[String]) -> Result<Vec<(String, HashMap<String, bool>)>> {
    entries
        .iter()
        .map(|entry| {
            let (layer, fields) = entry
                .split_once('=')
                .with_context(|| format!("Invalid field selection '{entry}'"))?;
            let selected = fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| (f.to_string(), true))
                .collect();
            Ok((layer.trim().to_string(), selected))
        })
        .collect()
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("geobridge=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("geobridge={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
