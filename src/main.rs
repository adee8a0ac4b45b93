use axum::{routing::get, Router};
use bourse::config::Config;
use bourse::market::clock;
use bourse::types::{Symbol, SymbolKind, VolatilityClass};
use bourse::{api, tasks, ws, AppState};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bourse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Starting bourse server on {}:{}", config.host, config.port);

    let state = AppState::new(config);

    // List the default board
    for symbol in default_symbols() {
        state.store.register_symbol(symbol);
    }

    // Load today's price paths (no-op on weekends) and catch up to the
    // current slot so a mid-day restart resumes where the clock is.
    let now = chrono::Local::now().naive_local();
    if clock::is_trading_day(now.date()) {
        tasks::push_tick(&state, now).await;
    }

    // Start background loops: market push, settlement sweep, housekeeping,
    // leaderboard refresh.
    tasks::spawn_all(&state);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start the server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("bourse server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// The default board: a spread of industries and volatility classes plus one
/// around-the-clock crypto pair.
fn default_symbols() -> Vec<Symbol> {
    let stock = |id: u64, code: &str, name: &str, industry: &str, vol, sigma| Symbol {
        id,
        code: code.to_string(),
        name: name.to_string(),
        kind: SymbolKind::Stock,
        industry: Some(industry.to_string()),
        volatility: vol,
        daily_sigma: sigma,
    };

    vec![
        stock(1, "BLUE", "Bluechip Utilities", "utilities", VolatilityClass::Stable, 0.010),
        stock(2, "NOVA", "Nova Semiconductors", "tech", VolatilityClass::Volatile, 0.030),
        stock(3, "HEAL", "Healgen Pharma", "pharma", VolatilityClass::Volatile, 0.028),
        stock(4, "GRID", "Gridline Energy", "energy", VolatilityClass::Stable, 0.014),
        stock(5, "MINT", "Mint Financial", "finance", VolatilityClass::Stable, 0.012),
        stock(6, "ORBT", "Orbit Aerospace", "aerospace", VolatilityClass::Volatile, 0.032),
        stock(7, "CART", "Cartwheel Retail", "retail", VolatilityClass::Stable, 0.015),
        stock(8, "FLUX", "Fluxware Software", "tech", VolatilityClass::Volatile, 0.026),
        Symbol {
            id: 9,
            code: "BTCUSDT".to_string(),
            name: "Bitcoin / USDT".to_string(),
            kind: SymbolKind::Crypto,
            industry: None,
            volatility: VolatilityClass::Volatile,
            daily_sigma: 0.040,
        },
    ]
}
