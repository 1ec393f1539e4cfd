use axum::http::{self, HeaderValue, Method};
use dotenvy::dotenv;
use env_logger::Builder;
use log::LevelFilter;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use werewolf_server::{app, models::config::GameConfig, services::deadline_sweeper, state::AppState};

// ログ設定
fn init_logger() {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Debug)
        .filter_module("tower_http", LevelFilter::Info)
        .filter_module("axum", LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .format_target(true);
    // RUST_LOG が設定されていればそちらを優先する
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 環境変数をロード
    if let Err(e) = dotenv() {
        eprintln!("Warning: .envファイルの読み込みに失敗しました: {}", e);
    }

    init_logger();

    let config = GameConfig::from_env();
    let addr: SocketAddr = config.bind_addr.parse()?;
    let state = AppState::from_config(config).await?;

    // 期限切れフェーズの定期処理
    let sweeper = deadline_sweeper::spawn(state.clone());

    // CORSレイヤーの設定
    let origins = ["http://localhost:3000".parse::<HeaderValue>()?];
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]);

    let app = app::create_app_with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &http::Request<_>| {
                tracing::info_span!(
                    "HTTP request",
                    method = %request.method(),
                    uri = %request.uri(),
                    headers = ?request.headers()
                )
            }),
        );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("サーバーを起動しました: http://{}", addr);
    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
