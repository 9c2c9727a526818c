pub mod assistant;
pub mod cli;
pub mod code;
pub mod config;
pub mod context;
pub mod history;
pub mod llm;
pub mod models;
pub mod router;
pub mod server;

use assistant::Assistant;
use cli::Args;
use config::{ prompt, Settings };
use history::initialize_conversation_store;
use log::info;
use router::ProviderRouter;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let settings = Settings::from_args(&args)?;

    info!("--- Core Configuration ---");
    info!("WebSocket Address: {}", args.server_addr);
    info!("HTTP Port: {}", args.http_port);
    info!("Default Model: {}", settings.default_selection);
    let order: Vec<&str> = settings.fallback_order
        .iter()
        .map(|p| p.as_str())
        .collect();
    info!("Fallback Order: {}", order.join(" -> "));
    info!("Request Timeout: {}s", settings.request_timeout.as_secs());
    info!("Max History: {}", settings.max_history);
    info!("Prompts Path: {}", settings.prompts_path.as_deref().unwrap_or("built-in"));
    info!("Auth Enabled: {}", args.server_api_key.as_deref().is_some_and(|k| !k.trim().is_empty()));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let prompts = prompt::load_prompts(settings.prompts_path.as_deref())?;
    let router = Arc::new(ProviderRouter::from_settings(&settings));
    let store = initialize_conversation_store(settings.max_history);
    let assistant = Arc::new(Assistant::new(router, store, prompts, &settings));

    let server = Server::new(&args, &settings, assistant)?;
    server.run().await?;

    Ok(())
}
