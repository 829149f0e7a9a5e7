// Ensemble Forecast API v0.1
use anyhow::{bail, Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use services::forecast::{EngineSettings, ForecastEngine};
use services::geocode::PostcodeClient;
use services::open_meteo::{OpenMeteoClient, WeatherModel};
use services::risk_grid::{GridOptions, DEFAULT_DAYS, DEFAULT_RESOLUTION};
use services::scheduler::{SchedulerSettings, SchedulerState, SharedSchedulerState};

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// OpenAPI document for the Ensemble Forecast API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ensemble Forecast API",
        version = "0.1.0",
        description = "Site weather risk for rope access work. Combines hourly forecasts \
            from four numerical weather models (UKV, ECMWF, ICON-EU, ARPEGE) into a \
            lead-time weighted ensemble, scores every hour against per-site thresholds \
            and publishes GO / CAUTION / CANCEL recommendations, site maps and a UK \
            risk grid.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Sites", description = "Site registry, thresholds and manual forecast runs"),
        (name = "Forecasts", description = "Ensemble forecast runs and chart data"),
        (name = "Map", description = "Map feeds: site markers, UK risk map and risk grid"),
        (name = "Scheduler", description = "Background forecast scheduler status"),
    ),
    paths(
        routes::health::health_check,
        routes::sites::list_sites,
        routes::sites::get_site,
        routes::sites::get_threshold_history,
        routes::sites::trigger_forecast,
        routes::forecasts::get_site_forecast,
        routes::forecasts::get_forecast_run,
        routes::map::map_sites,
        routes::map::map_sites_hourly,
        routes::map::map_risk_grid,
        routes::map::map_uk_risk,
        routes::scheduler::get_scheduler_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::sites::SiteResponse,
            routes::sites::RunSummaryResponse,
            routes::sites::SiteListItem,
            routes::sites::SiteListResponse,
            routes::sites::SiteDetailResponse,
            routes::sites::ThresholdVersionResponse,
            routes::sites::ChangeLogResponse,
            routes::sites::ThresholdHistoryResponse,
            routes::sites::TriggerResponse,
            routes::forecasts::ChartSite,
            routes::forecasts::ChartHour,
            routes::forecasts::ChartDebug,
            routes::forecasts::ChartDataResponse,
            routes::forecasts::HourlyResponse,
            routes::forecasts::RunDetailResponse,
            routes::map::MapSite,
            routes::map::MapHour,
            routes::map::MapSiteHourly,
            routes::map::GridRunInfo,
            routes::map::GridPointResponse,
            routes::map::RiskGridResponse,
            routes::map::UkRiskMapResponse,
            services::risk::Thresholds,
            services::risk_map::RiskMapPoint,
            services::scheduler::SchedulerState,
            services::forecast::BatchSummary,
            services::risk_grid::GridSummary,
            db::queries::RetentionCounts,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

/// Multi-model ensemble weather risk forecasting for work sites.
#[derive(Parser)]
#[command(name = "ensemble-forecast", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the background scheduler (default)
    Serve,

    /// Generate forecasts for all active sites, or a single site
    RunForecasts {
        /// Forecast only this site
        #[arg(long)]
        site: Option<Uuid>,
    },

    /// Delete forecast data older than N days
    CleanupForecasts {
        /// Retention window in days (default: RETENTION_DAYS)
        #[arg(long)]
        days: Option<i64>,

        /// Only count what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate the UK-wide risk grid for the map heatmap
    GenerateRiskGrid {
        /// Grid spacing in degrees (0.5 ≈ 55 km)
        #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
        resolution: f64,

        /// Number of forecast days
        #[arg(long, default_value_t = DEFAULT_DAYS)]
        days: u32,

        /// Single model to use: ukv, ecmwf, icon_eu or arpege
        #[arg(long, default_value = "ecmwf")]
        model: WeatherModel,
    },

    /// Upsert sites and thresholds from DATA_DIR/sites.json
    SeedSites,

    /// Build the UK risk map for a date (default: every forecast date from today)
    BuildRiskMap {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ensemble_forecast=debug,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn connect_database(config: &AppConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");
    Ok(pool)
}

/// Print a command result as pretty JSON on stdout.
fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.json_logs);
    config.log_config();

    let pool = connect_database(&config).await?;

    let engine = ForecastEngine {
        pool: pool.clone(),
        client: OpenMeteoClient::new(&config.openmeteo_base_url, config.openmeteo_api_key.clone())?,
        settings: EngineSettings::from_config(&config),
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, engine).await,

        Command::RunForecasts { site: Some(site_id) } => {
            let outcomes = services::forecast::run_forecast_for_site_id(&engine, site_id).await?;
            print_json(&outcomes)
        }
        Command::RunForecasts { site: None } => {
            let summary = services::forecast::run_forecasts_all_active(&engine).await?;
            let dates =
                services::forecast::forecast_dates(Utc::now().date_naive(), config.forecast_days);
            services::risk_map::build_uk_risk_maps(&pool, &dates).await;
            print_json(&summary)
        }

        Command::CleanupForecasts { days, dry_run } => {
            let days = days.unwrap_or(config.retention_days);
            let counts = services::cleanup::cleanup_forecasts(&pool, days, dry_run).await?;
            print_json(&counts)
        }

        Command::GenerateRiskGrid {
            resolution,
            days,
            model,
        } => {
            let options = GridOptions {
                resolution,
                days,
                model,
            };
            let summary =
                services::risk_grid::generate_risk_grid(&pool, &engine.client, options).await?;
            print_json(&summary)?;
            if summary.status != "success" {
                bail!("Risk grid generation failed: no grid point returned data");
            }
            Ok(())
        }

        Command::SeedSites => {
            let geocoder = PostcodeClient::new(&config.postcodes_base_url)?;
            let records = services::sites::load_sites_file(std::path::Path::new(&config.data_dir))?;
            // Background forecasts would not outlive this process.
            let summary = services::sites::seed_sites(&engine, &geocoder, &records, false).await;
            print_json(&summary)
        }

        Command::BuildRiskMap { date } => {
            let dates = match date {
                Some(d) => vec![d],
                None => services::forecast::forecast_dates(
                    Utc::now().date_naive(),
                    config.forecast_days,
                ),
            };
            let built = services::risk_map::build_uk_risk_maps(&pool, &dates).await;
            if built < dates.len() {
                bail!("{} of {} risk maps failed", dates.len() - built, dates.len());
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, engine: ForecastEngine) -> Result<()> {
    let pool = engine.pool.clone();

    // Seed the site registry
    let geocoder = PostcodeClient::new(&config.postcodes_base_url)?;
    let data_dir = std::path::Path::new(&config.data_dir);
    match services::sites::load_sites_file(data_dir) {
        Ok(records) => {
            if records.is_empty() {
                tracing::warn!("No sites to seed from {}", data_dir.display());
            } else {
                services::sites::seed_sites(&engine, &geocoder, &records, true).await;
            }
        }
        Err(e) => {
            tracing::error!(
                "Failed to load site registry from {}: {}",
                data_dir.display(),
                e
            );
        }
    }

    // Create shared scheduler state and spawn the background scheduler
    let scheduler_state: SharedSchedulerState =
        Arc::new(RwLock::new(SchedulerState::new(config.schedule_hours.clone())));
    tokio::spawn(services::scheduler::run_scheduler(
        engine.clone(),
        SchedulerSettings::from_config(&config),
        scheduler_state.clone(),
    ));

    // CORS: GET for the read feeds, POST for manual forecast triggers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Read routes use PgPool state directly; the trigger needs the engine.
    let site_routes = Router::new()
        .route("/api/v1/sites", get(routes::sites::list_sites))
        .route("/api/v1/sites/:id", get(routes::sites::get_site))
        .route(
            "/api/v1/sites/:id/thresholds",
            get(routes::sites::get_threshold_history),
        )
        .route(
            "/api/v1/sites/:id/forecast",
            get(routes::forecasts::get_site_forecast),
        )
        .with_state(pool.clone());

    let trigger_routes = Router::new()
        .route(
            "/api/v1/sites/:id/forecast",
            post(routes::sites::trigger_forecast),
        )
        .with_state(engine);

    let forecast_routes = Router::new()
        .route(
            "/api/v1/forecasts/runs/:run_id",
            get(routes::forecasts::get_forecast_run),
        )
        .with_state(pool.clone());

    let map_routes = Router::new()
        .route("/api/v1/map/sites", get(routes::map::map_sites))
        .route("/api/v1/map/sites-hourly", get(routes::map::map_sites_hourly))
        .route("/api/v1/map/risk-grid", get(routes::map::map_risk_grid))
        .route("/api/v1/map/uk-risk", get(routes::map::map_uk_risk))
        .with_state(pool.clone());

    // Health check uses PgPool to verify DB connectivity
    let health_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(pool);

    let scheduler_routes = Router::new()
        .route(
            "/api/v1/scheduler/status",
            get(routes::scheduler::get_scheduler_status),
        )
        .with_state(scheduler_state);

    let app = Router::new()
        .merge(health_routes)
        .merge(site_routes)
        .merge(trigger_routes)
        .merge(forecast_routes)
        .merge(map_routes)
        .merge(scheduler_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind TCP listener")?;
    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}
