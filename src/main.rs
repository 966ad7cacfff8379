mod cli;

use gatehouse::{
    config,
    server::{self, auth},
};
use gatehouse_av::ToolRegistry;
use gatehouse_db::models::SubscriptionStatus;
use gatehouse_db::pool::{init_pool, DbPool};
use gatehouse_db::queries::users;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting Gatehouse server");
    tracing::info!(
        "Data directory: {}, database: {}",
        config.server.data_dir.display(),
        config.db_path().display()
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "gatehouse=trace,gatehouse_av=debug,gatehouse_media=debug,gatehouse_db=debug,tower_http=debug".to_string()
        } else {
            "gatehouse=info,gatehouse_av=info,gatehouse_db=warn,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("gatehouse {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::HashPassword { password } => hash_password(&password),
        Commands::GenerateSecret => generate_secret(),
        Commands::AddUser {
            username,
            password,
            admin,
        } => add_user(cli.config.as_deref(), &username, &password, admin),
        Commands::SetSubscription {
            username,
            status,
            expires,
        } => set_subscription(cli.config.as_deref(), &username, &status, expires.as_deref()),
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    println!("Raster chain: {}", config.raster.methods.join(" -> "));
    if all_ok {
        println!("All tools are available!");
    } else {
        println!("Some tools are missing. Page images fall back to placeholders and videos to passthrough packages.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Data directory: {}", config.server.data_dir.display());
            println!(
                "  Token secret: {}",
                if config.server.token_secret.is_some() { "configured" } else { "ephemeral" }
            );
            println!("  Lockout threshold: {}", config.access.lockout_threshold);
            println!("  Raster methods: {}", config.raster.methods.join(", "));
            println!("  Video workers: {}", config.video.workers);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

fn hash_password(password: &str) -> Result<()> {
    let hash = auth::hash_password(password)?;
    println!("{}", hash);
    Ok(())
}

fn generate_secret() -> Result<()> {
    let secret = auth::generate_secret();
    println!("{}", secret);
    Ok(())
}

fn open_db(config_path: Option<&Path>) -> Result<DbPool> {
    let config = config::load_config_or_default(config_path)?;
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!("Failed to create data directory {:?}", config.server.data_dir)
    })?;
    let db_path = config.db_path();
    init_pool(&db_path.to_string_lossy())
        .with_context(|| format!("Failed to open database {:?}", db_path))
}

fn add_user(config_path: Option<&Path>, username: &str, password: &str, admin: bool) -> Result<()> {
    let pool = open_db(config_path)?;
    let hash = auth::hash_password(password)?;
    let conn = pool.get()?;
    let user = users::create_user(&conn, username, &hash, admin)?;
    println!("Created user {} ({})", user.username, user.id);
    Ok(())
}

fn set_subscription(
    config_path: Option<&Path>,
    username: &str,
    status: &str,
    expires: Option<&str>,
) -> Result<()> {
    let status: SubscriptionStatus = status.parse().map_err(anyhow::Error::msg)?;
    let expires: Option<DateTime<Utc>> = expires
        .map(|s| DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc)))
        .transpose()
        .context("Invalid --expires timestamp")?;

    let pool = open_db(config_path)?;
    let conn = pool.get()?;
    let user = users::get_user_by_username(&conn, username)?
        .with_context(|| format!("No such user: {}", username))?;
    users::set_subscription(&conn, user.id, status, expires)?;
    println!("{}: subscription {}", user.username, status);
    Ok(())
}
