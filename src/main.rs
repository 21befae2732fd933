mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod schema;
mod services;

use anyhow::Result;
use axum::Router;

use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::DbPool;
use crate::services::campaign_overlay::ResolutionEngine;
use crate::services::campaigns::{self, CampaignSource};
use crate::services::decision_cache::DecisionCache;

const DEFAULT_CONFIG_PATH: &str = "scheduler-config.toml";

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub cache: Arc<DecisionCache>,
    pub engine: Arc<ResolutionEngine>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, campaigns: Arc<dyn CampaignSource>) -> Self {
        let cache = Arc::new(DecisionCache::new(config.resolution.cache_bucket_secs));
        let engine = Arc::new(ResolutionEngine::new(
            db.clone(),
            cache.clone(),
            campaigns,
            Duration::from_millis(config.campaigns.timeout_ms),
            config.resolution.overnight_windows,
        ));

        AppState {
            db,
            config: Arc::new(config),
            cache,
            engine,
        }
    }
}

use clap::Parser;

#[derive(Parser)]
#[command(version, author = "SIGNAGE SCHEDULER AUTHORS", about = "Signage Scheduler\nLicensed under AGPLv3", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Generate a default configuration template to stdout
    #[arg(long)]
    generate_config: bool,
}

fn run_onboarding() -> Result<Config> {
    use dialoguer::{theme::ColorfulTheme, Input};

    println!("Welcome to Signage Scheduler!");
    println!("It looks like you don't have a configuration file yet.");
    println!("Let's get you set up.\n");

    let host: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Server Host")
        .default("0.0.0.0".to_string())
        .interact_text()?;

    let port: u16 = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Server Port")
        .default(8080)
        .interact_text()?;

    let db_url: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Database URL")
        .default("sqlite://scheduler.db".to_string())
        .interact_text()?;

    let jwt_secret: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Identity provider JWT secret")
        .default(uuid::Uuid::new_v4().to_string())
        .interact_text()?;

    let config_content = Config::default_template()
        .replace("host = \"0.0.0.0\"", &format!("host = \"{}\"", host))
        .replace("port = 8080", &format!("port = {}", port))
        .replace(
            "url = \"sqlite://scheduler.db\"",
            &format!("url = \"{}\"", db_url),
        )
        .replace(
            "secret = \"change-me-in-production\"",
            &format!("secret = \"{}\"", jwt_secret),
        );

    println!("\nGenerating configuration file: {}", DEFAULT_CONFIG_PATH);
    std::fs::write(DEFAULT_CONFIG_PATH, &config_content)?;
    println!("Configuration saved successfully!");
    println!("----------------------------------------\n");

    let config: Config = toml::from_str(&config_content)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default_template());
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Onboarding only runs for the default path on an attended terminal.
    if std::fs::metadata(&config_path).is_err() && cli.config.is_none() && console::user_attended()
    {
        if let Err(e) = run_onboarding() {
            eprintln!("Onboarding failed: {}", e);
            std::process::exit(1);
        }
    }

    if std::fs::metadata(&config_path).is_err() {
        eprintln!("Error: Configuration file '{}' not found.", config_path);
        eprintln!("Run with --generate-config to see a template.");
        std::process::exit(1);
    }

    let config = Config::load(&config_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("signage_scheduler={},tower_http=debug", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Loaded configuration from {}", config_path);

    let db_pool = db::create_pool(&config.database.url)?;
    db::migrate(&db_pool)?;
    tracing::info!("Database initialized");

    let campaign_source = campaigns::build_source(&config.campaigns, db_pool.clone())?;
    tracing::info!(
        "Campaign lookups via {:?} source, {}ms timeout",
        config.campaigns.source,
        config.campaigns.timeout_ms
    );

    let state = AppState::new(config, db_pool, campaign_source);
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);

    let app = Router::new()
        .nest("/api", api::routes(state.clone()))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
