use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use mcp_gateway::builtin::BuiltinExtension;
use mcp_gateway::config::{
    find_config_file, get_config, load_config, render_config, write_config_file, GatewayConfig,
};
use mcp_gateway::gateway::{router, serve, Gateway};
use mcp_gateway::identity::HeaderIdentityResolver;
use mcp_gateway::mcp::StdioServer;
use mcp_gateway::GatewayError;
use mcp_gateway::registry::{CapabilityRegistry, Extension, HostServices};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MCP Gateway - expose host operations to Model Context Protocol clients
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Expose host operations to MCP clients over SSE, streamable HTTP, stateless HTTP and stdio", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway
    Serve {
        /// Serve the tool catalog over stdio instead of HTTP
        #[arg(long)]
        stdio: bool,

        /// Host to bind to (overrides the configuration)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides the configuration)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the tool catalog
    Tools {
        /// Print the full tool descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create configuration files
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Where to write the file
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

/// Load configuration from the given file, a default location, or the
/// environment alone
fn resolve_config(path: Option<&PathBuf>) -> Result<(GatewayConfig, Option<PathBuf>)> {
    let found = path.cloned().or_else(find_config_file);
    let config = match &found {
        Some(path) => load_config(path)
            .map_err(GatewayError::from)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => get_config()
            .map_err(GatewayError::from)
            .context("failed to read configuration from environment")?,
    };
    Ok((config, found))
}

fn init_tracing(cli: &Cli, config: &GatewayConfig) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("mcp_gateway={}", level)),
    );

    let json = cli.log_json || config.logging.format.as_deref() == Some("json");
    let registry = tracing_subscriber::registry().with(filter);
    // stdout belongs to the stdio binding
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn host_services(config: &GatewayConfig) -> Result<HostServices> {
    let mut host = HostServices::default();
    if let Some(header) = config.security.identity_header.as_deref() {
        let name = http::HeaderName::from_bytes(header.trim().as_bytes())
            .with_context(|| format!("invalid identity header name '{}'", header))?;
        tracing::info!("Taking caller identity from the {} header", name);
        host = host.with_identities(Arc::new(HeaderIdentityResolver::new(name)));
    }
    Ok(host)
}

fn build_registry(config: &GatewayConfig) -> Result<CapabilityRegistry> {
    let builtin = Arc::new(BuiltinExtension::new(
        config.server_info(),
        config.enabled_bindings(),
    ));
    let extensions: Vec<Arc<dyn Extension>> = vec![builtin.clone()];
    let registry = CapabilityRegistry::collect(&extensions, host_services(config)?);
    builtin.publish_catalog(&registry);
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, config_path) = resolve_config(cli.config.as_ref())?;
    init_tracing(&cli, &config);
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    match cli.command {
        Commands::Serve { stdio, host, port } => {
            let registry = build_registry(&config)?;

            if stdio {
                StdioServer::new(&config.server_info(), registry.stateless_tools())
                    .map_err(|e| GatewayError::Stdio(e.to_string()))?
                    .run()
                    .await
                    .map_err(|e| GatewayError::Stdio(e.to_string()))?;
                return Ok(());
            }

            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .map_err(|_| {
                    GatewayError::InvalidAddress(format!(
                        "{}:{}",
                        config.server.host, config.server.port
                    ))
                })?;

            let gateway = Gateway::new(&config, registry);
            tracing::info!(
                "Gateway endpoints under {} ({})",
                config.server.root_path,
                gateway.enabled().names().join(", ")
            );
            serve(router(gateway), addr).await?;
        }

        Commands::Tools { json } => {
            let registry = build_registry(&config)?;
            if json {
                let tools: Vec<_> = registry.tools().iter().map(|t| &t.tool).collect();
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                for spec in registry.tools() {
                    println!(
                        "{} - {}",
                        spec.tool.name,
                        spec.tool.description.as_deref().unwrap_or_default()
                    );
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", render_config(&config)?);
            }
            ConfigCommands::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                write_config_file(&GatewayConfig::default(), &path)?;
                if !cli.quiet {
                    eprintln!("Wrote default configuration to {}", path.display());
                }
            }
        },

        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "mcp-gateway", &mut std::io::stdout());
        }
    }

    Ok(())
}
