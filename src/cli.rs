use clap::Parser;
use std::num::ParseIntError;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Provisioning scope this device belongs to
    #[arg(env = "DEWPOINT_SCOPE_ID", long = "scope-id", value_name = "id")]
    pub scope_id: String,

    /// Unique identifier for this device
    #[arg(env = "DEWPOINT_DEVICE_ID", long = "device-id", value_name = "id")]
    pub device_id: String,

    /// Base64 shared access key for the device
    #[arg(env = "DEWPOINT_DEVICE_KEY", long = "device-key", value_name = "key")]
    pub device_key: String,

    /// Provisioning service endpoint
    #[arg(
        env = "DEWPOINT_PROVISIONING_ENDPOINT",
        long = "provisioning-endpoint",
        value_name = "uri"
    )]
    pub provisioning_endpoint: Option<String>,

    /// Provisioning status poll interval in milliseconds
    #[arg(
        env = "DEWPOINT_PROVISIONING_POLL_INTERVAL_MS",
        long = "provisioning-poll-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub provisioning_poll_interval: Option<Duration>,

    /// Maximum provisioning status polls before giving up
    #[arg(
        env = "DEWPOINT_PROVISIONING_MAX_POLLS",
        long = "provisioning-max-polls",
        value_name = "int"
    )]
    pub provisioning_max_polls: Option<u32>,

    /// Timeout for provisioning requests in milliseconds
    #[arg(
        env = "DEWPOINT_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub request_timeout: Option<Duration>,

    /// Maximum broker connect attempts before giving up
    #[arg(
        env = "DEWPOINT_CONNECT_ATTEMPTS",
        long = "connect-attempts",
        value_name = "int"
    )]
    pub connect_attempts: Option<u32>,

    /// Delay between broker connect attempts in milliseconds
    #[arg(
        env = "DEWPOINT_CONNECT_RETRY_DELAY_MS",
        long = "connect-retry-delay-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub connect_retry_delay: Option<Duration>,

    /// Sensor read interval in milliseconds
    #[arg(
        env = "DEWPOINT_SAMPLE_INTERVAL_MS",
        long = "sample-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub sample_interval: Option<Duration>,

    /// Telemetry publish interval in milliseconds
    #[arg(
        env = "DEWPOINT_TELEMETRY_INTERVAL_MS",
        long = "telemetry-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub telemetry_interval: Option<Duration>,

    /// Reported property publish interval in milliseconds
    #[arg(
        env = "DEWPOINT_PROPERTY_INTERVAL_MS",
        long = "property-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub property_interval: Option<Duration>,
}

pub fn parse() -> Cli {
    Parser::parse()
}
