use anyhow::Result;
use clap::Parser;
use lokiunimore::bootstrap::Launcher;
use lokiunimore::infrastructure::logger;
use lokiunimore::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cfg = AppConfig::parse();
    logger::init(cfg.log_format, "info");
    cfg.validate()?;

    Launcher::with_config(cfg).launch().await
}
