use resilient_http::{config::ResilienceConfig, observability::init_tracing, server::init_server};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/resilience.yaml".to_string());

    // Load configuration
    let config = match ResilienceConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: resilient-http [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    if let Err(e) = init_server(config).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
