// src/main.rs
mod api;
mod catalog;
mod classifier;
mod combinations;
mod config;
mod grouping;
mod model;
mod signature;

use config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("⚠️ Konnte .env nicht laden: {}", err);
        }
    }

    let app_config = AppConfig::from_env();

    println!("🚀 Box classification service startet...");
    api::start_api_server(
        app_config.api,
        app_config.catalog,
        app_config.classifier,
        app_config.grouping,
    )
    .await;
}
