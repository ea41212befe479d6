mod cadence;
mod cli;
mod config;
mod hub;
mod morse;
mod sensor;
mod signal;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::{debug, error, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::Config;
use crate::hub::Session;
use crate::sensor::SimulatedSensor;
use crate::signal::{LogLed, StatusLed};

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("reqwest=warn".parse().unwrap())
                    .add_directive("rumqttc=warn".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let cli = cli::parse();
    let config = Config::from(cli);
    info!("starting up the {} device", config.identity.device_id);
    debug!("{:#?}", config);

    // UTC is captured once at startup; both token expiries derive from it
    let epoch = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    info!("resolving hub assignment through the provisioning service");
    let hub_host = match hub::resolve(&config.identity, &config.provisioning, epoch).await {
        Ok(host) => host,
        Err(err) => {
            // a misconfigured identity cannot recover without operator action
            error!("provisioning failed: {err}");
            std::process::exit(2);
        }
    };
    info!("hub hostname: {hub_host}");

    let led: Arc<dyn StatusLed> = Arc::new(LogLed);
    let (session, eventloop) =
        Session::open(&config.identity, &hub_host, epoch, config.session.clone())?;

    session
        .run(eventloop, Box::new(SimulatedSensor), led, &config.cadence)
        .await?;

    Ok(())
}
