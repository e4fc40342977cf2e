use actix_web::{App, HttpServer, web};
use tracing::info;

use alert_execution_rs::api;
use alert_execution_rs::config::Settings;
use alert_execution_rs::pipeline::ExecutionPipeline;
use alert_execution_rs::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables
    dotenv::dotenv().ok();
    telemetry::init_tracing(false);

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║               ALERT EXECUTION RS                              ║");
    info!("║               Webhook → Coinbase Advanced Trade               ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");

    let settings = Settings::new()?;
    let pipeline = web::Data::new(ExecutionPipeline::from_settings(&settings)?);
    info!("✅ Core components initialized");

    let host = settings.execution.host().to_string();
    let port = settings.execution.port();
    info!("🚀 Starting webhook server on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(pipeline.clone())
            .configure(api::config)
    })
    .bind((host, port))?
    .run()
    .await?;

    Ok(())
}
