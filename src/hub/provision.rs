use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DeviceIdentity;

use super::token::{self, TokenError};

const API_VERSION: &str = "2018-11-01";

/// Well-known endpoint of the device provisioning service.
pub const GLOBAL_ENDPOINT: &str = "https://global.azure-devices-provisioning.net";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("token synthesis failed: {0}")]
    Token(#[from] TokenError),

    #[error("provisioning request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provisioning service returned error: ({0}) {1}")]
    Status(StatusCode, String),

    #[error("provisioning service reported registration as {0}")]
    Terminal(String),

    #[error("registration still pending after {0} status polls")]
    RetriesExhausted(u32),

    #[error("assigned registration is missing the hub hostname")]
    MissingHub,
}

#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    pub endpoint: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub request_timeout: Duration,
    pub token_ttl: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            endpoint: GLOBAL_ENDPOINT.to_owned(),
            poll_interval: Duration::from_millis(2_000),
            max_polls: 10,
            request_timeout: Duration::from_millis(30_000),
            token_ttl: Duration::from_secs(3_600),
        }
    }
}

/// Registration progress as reported by the provisioning service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    Unassigned,
    Assigning,
    Assigned(String),
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    operation_id: String,
    // status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    registration_state: Option<RegistrationState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationState {
    assigned_hub: Option<String>,
}

impl OperationStatus {
    fn registration(self) -> Result<Registration, ProvisionError> {
        if self.status.eq_ignore_ascii_case("assigned") {
            let hub = self
                .registration_state
                .and_then(|state| state.assigned_hub)
                .ok_or(ProvisionError::MissingHub)?;
            Ok(Registration::Assigned(hub))
        } else if self.status.eq_ignore_ascii_case("failed")
            || self.status.eq_ignore_ascii_case("disabled")
        {
            Ok(Registration::Failed)
        } else {
            Ok(Registration::Assigning)
        }
    }
}

/// Resolve the device's assigned hub hostname.
///
/// Registers the device with the provisioning service and polls the
/// operation status at a fixed interval until the service reports a terminal
/// state or the bounded retry budget runs out. The result is cached by the
/// caller for the process lifetime; a restart is required to re-resolve.
pub async fn resolve(
    identity: &DeviceIdentity,
    config: &ProvisioningConfig,
    now_epoch: u64,
) -> Result<String, ProvisionError> {
    let resource = format!(
        "{}%2fregistrations%2f{}",
        identity.scope_id, identity.device_id
    );
    let expiry = now_epoch + config.token_ttl.as_secs();
    // provisioning requires the registration policy name on the token
    let authorization = format!(
        "{}&skn=registration",
        token::sign(&identity.shared_key, &resource, expiry)?
    );

    let client = Client::new();
    let register_url = format!(
        "{}/{}/registrations/{}/register?api-version={API_VERSION}",
        config.endpoint, identity.scope_id, identity.device_id
    );

    let mut registration = Registration::Unassigned;
    debug!(state = ?registration, "registering with the provisioning service");
    let response = client
        .put(&register_url)
        .header("Authorization", &authorization)
        .timeout(config.request_timeout)
        .json(&json!({ "registrationId": identity.device_id }))
        .send()
        .await?;

    if !response.status().is_success() {
        let code = response.status();
        let message = response.text().await.unwrap_or_default();
        return Err(ProvisionError::Status(code, message));
    }

    let submitted: RegisterResponse = response.json().await?;
    registration = Registration::Assigning;
    debug!(
        operation = %submitted.operation_id,
        state = ?registration,
        "registration submitted, polling for assignment"
    );

    let status_url = format!(
        "{}/{}/registrations/{}/operations/{}?api-version={API_VERSION}",
        config.endpoint, identity.scope_id, identity.device_id, submitted.operation_id
    );

    for attempt in 1..=config.max_polls {
        tokio::time::sleep(config.poll_interval).await;

        let response = client
            .get(&status_url)
            .header("Authorization", &authorization)
            .timeout(config.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let code = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Status(code, message));
        }

        let status: OperationStatus = response.json().await?;
        let reported = status.status.clone();
        registration = status.registration()?;
        match registration {
            Registration::Assigned(hub) => {
                info!(attempts = attempt, "assigned to hub {hub}");
                return Ok(hub);
            }
            Registration::Failed => {
                warn!(attempts = attempt, "registration terminated as {reported}");
                return Err(ProvisionError::Terminal(reported));
            }
            _ => debug!(attempt, "registration still {reported}"),
        }
    }

    Err(ProvisionError::RetriesExhausted(config.max_polls))
}

#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            scope_id: "0ne0TEST".to_owned(),
            device_id: "dev1".to_owned(),
            shared_key: "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=".to_owned(),
        }
    }

    fn test_config(endpoint: String) -> ProvisioningConfig {
        ProvisioningConfig {
            endpoint,
            poll_interval: Duration::from_millis(10),
            max_polls: 10,
            request_timeout: Duration::from_secs(5),
            token_ttl: Duration::from_secs(3_600),
        }
    }

    const REGISTER_PATH: &str =
        "/0ne0TEST/registrations/dev1/register?api-version=2018-11-01";
    const OPERATION_PATH: &str =
        "/0ne0TEST/registrations/dev1/operations/op-1?api-version=2018-11-01";

    #[tokio::test]
    async fn resolves_after_five_polls() {
        let mut server = Server::new_async().await;

        let register = server
            .mock("PUT", REGISTER_PATH)
            .match_header("authorization", mockito::Matcher::Regex(
                "^SharedAccessSignature sr=0ne0test%2fregistrations%2fdev1&sig=.*&skn=registration$".to_owned(),
            ))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"operationId": "op-1", "status": "assigning"}"#)
            .create_async()
            .await;

        let assigning = server
            .mock("GET", OPERATION_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "assigning"}"#)
            .expect(4)
            .create_async()
            .await;

        let assigned = server
            .mock("GET", OPERATION_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status": "assigned", "registrationState": {"assignedHub": "h1.example.net"}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let host = resolve(&identity(), &test_config(server.url()), 1_300_000_000)
            .await
            .unwrap();

        assert_eq!(host, "h1.example.net");
        register.assert_async().await;
        assigning.assert_async().await;
        assigned.assert_async().await;
    }

    #[tokio::test]
    async fn gives_up_after_the_retry_budget() {
        let mut server = Server::new_async().await;

        server
            .mock("PUT", REGISTER_PATH)
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"operationId": "op-1", "status": "assigning"}"#)
            .create_async()
            .await;

        let assigning = server
            .mock("GET", OPERATION_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "assigning"}"#)
            .expect(10)
            .create_async()
            .await;

        let result = resolve(&identity(), &test_config(server.url()), 1_300_000_000).await;

        assert!(matches!(result, Err(ProvisionError::RetriesExhausted(10))));
        assigning.assert_async().await;
    }

    #[tokio::test]
    async fn failed_registration_is_terminal() {
        let mut server = Server::new_async().await;

        server
            .mock("PUT", REGISTER_PATH)
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"operationId": "op-1", "status": "assigning"}"#)
            .create_async()
            .await;

        let failed = server
            .mock("GET", OPERATION_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "failed"}"#)
            .expect(1)
            .create_async()
            .await;

        let result = resolve(&identity(), &test_config(server.url()), 1_300_000_000).await;

        assert!(matches!(result, Err(ProvisionError::Terminal(status)) if status == "failed"));
        failed.assert_async().await;
    }

    #[tokio::test]
    async fn register_error_fails_without_polling() {
        let mut server = Server::new_async().await;

        let register = server
            .mock("PUT", REGISTER_PATH)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let result = resolve(&identity(), &test_config(server.url()), 1_300_000_000).await;

        assert!(matches!(
            result,
            Err(ProvisionError::Status(StatusCode::UNAUTHORIZED, _))
        ));
        register.assert_async().await;
    }
}
