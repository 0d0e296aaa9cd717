use cxr_app::{config, start_app, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration().expect("failed to load config");
    telemetry::init_telemetry(config.log_level.as_str());

    start_app(config).await?;

    Ok(())
}
