use crate::cadence::CadenceConfig;
use crate::cli::Cli;
use crate::hub::{ProvisioningConfig, SessionConfig};

/// Immutable device identity, provided at startup and owned by the whole
/// process for its lifetime.
#[derive(Clone, Debug)]
pub struct DeviceIdentity {
    pub scope_id: String,
    pub device_id: String,
    /// Base64 shared access key.
    pub shared_key: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub identity: DeviceIdentity,
    pub provisioning: ProvisioningConfig,
    pub session: SessionConfig,
    pub cadence: CadenceConfig,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let provisioning_defaults = ProvisioningConfig::default();
        let session_defaults = SessionConfig::default();
        let cadence_defaults = CadenceConfig::default();

        Self {
            identity: DeviceIdentity {
                scope_id: cli.scope_id,
                device_id: cli.device_id,
                shared_key: cli.device_key,
            },
            provisioning: ProvisioningConfig {
                endpoint: cli
                    .provisioning_endpoint
                    .unwrap_or(provisioning_defaults.endpoint),
                poll_interval: cli
                    .provisioning_poll_interval
                    .unwrap_or(provisioning_defaults.poll_interval),
                max_polls: cli
                    .provisioning_max_polls
                    .unwrap_or(provisioning_defaults.max_polls),
                request_timeout: cli
                    .request_timeout
                    .unwrap_or(provisioning_defaults.request_timeout),
                token_ttl: provisioning_defaults.token_ttl,
            },
            session: SessionConfig {
                connect_attempts: cli
                    .connect_attempts
                    .unwrap_or(session_defaults.connect_attempts),
                connect_retry_delay: cli
                    .connect_retry_delay
                    .unwrap_or(session_defaults.connect_retry_delay),
                ..session_defaults
            },
            cadence: CadenceConfig {
                sample_interval: cli
                    .sample_interval
                    .unwrap_or(cadence_defaults.sample_interval),
                telemetry_interval: cli
                    .telemetry_interval
                    .unwrap_or(cadence_defaults.telemetry_interval),
                property_interval: cli
                    .property_interval
                    .unwrap_or(cadence_defaults.property_interval),
            },
        }
    }
}
