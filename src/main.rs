mod admin;
mod app;
mod auth;
mod config;
mod error;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "agromate=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (state, db) = AppState::init().await?;

    if let Some(db) = &db {
        sqlx::migrate!("./migrations").run(db).await?;
    }

    if let Some(seed) = state.config.super_admin.clone() {
        admin::services::seed_super_admin(&state, &seed).await?;
    }

    let app = app::build_app(state);
    app::serve(app).await
}
