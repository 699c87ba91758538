use std::sync::Arc;

use ftb_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), ftb_core::Error> {
    ftb_core::logging::init("ftb")?;

    let cfg = Arc::new(Config::load()?);

    ftb_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| ftb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
