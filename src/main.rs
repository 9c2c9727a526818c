use assistant_backend::cli::Args;
use assistant_backend::config::load_config_file;
use clap::Parser;
use dotenv::dotenv;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let mut args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Some(path) = args.config_file.clone() {
        load_config_file(&path)?;
        // values from the file only apply where no flag or variable was set
        args = Args::parse();
    }

    assistant_backend::run(args).await
}
