use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cadence::{Cadence, CadenceConfig};
use crate::config::DeviceIdentity;
use crate::morse;
use crate::sensor::{Sample, Sensor};
use crate::signal::{self, StatusLed};

use super::engine::{Effect, Engine, Publication};
use super::token::{self, TokenError};
use super::topics;

const BROKER_PORT: u16 = 8883;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("token synthesis failed: {0}")]
    Token(#[from] TokenError),

    #[error("broker request queue closed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("broker connection failed after {0} attempts")]
    RetriesExhausted(u32),
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub keep_alive: Duration,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub token_ttl: Duration,
    /// Period of the cooperative tick that drives the cadence timers.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            connect_attempts: 10,
            connect_retry_delay: Duration::from_millis(2_000),
            token_ttl: Duration::from_secs(864_000),
            tick: Duration::from_millis(250),
        }
    }
}

/// Credentials for the broker session: the username encodes the hub API
/// version, the password is a freshly signed shared-access token.
pub fn credentials(
    identity: &DeviceIdentity,
    hub_host: &str,
    now_epoch: u64,
    token_ttl: Duration,
) -> Result<(String, String), TokenError> {
    let resource = format!(
        "{hub_host}{}",
        utf8_percent_encode(&format!("/devices/{}", identity.device_id), NON_ALPHANUMERIC)
    );
    let password = token::sign(&identity.shared_key, &resource, now_epoch + token_ttl.as_secs())?;
    let username = format!("{hub_host}/{}/api-version=2016-11-14", identity.device_id);
    Ok((username, password))
}

/// One long-lived broker session.
///
/// The session owns the protocol [`Engine`] and the connection flag the
/// cadence activities are gated on. All of its state is confined to the
/// single task that runs [`Session::run`].
pub struct Session {
    client: AsyncClient,
    engine: Engine,
    config: SessionConfig,
    device_id: String,
    connected: bool,
}

impl Session {
    /// Build the broker session. The connection itself is established by the
    /// event loop on the first poll inside [`Session::run`].
    pub fn open(
        identity: &DeviceIdentity,
        hub_host: &str,
        now_epoch: u64,
        config: SessionConfig,
    ) -> Result<(Self, EventLoop), SessionError> {
        let (username, password) = credentials(identity, hub_host, now_epoch, config.token_ttl)?;

        let mut options = MqttOptions::new(&identity.device_id, hub_host, BROKER_PORT);
        options.set_transport(Transport::tls_with_default_config());
        options.set_credentials(username, password);
        options.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(options, 16);

        Ok((
            Self {
                client,
                engine: Engine::new(&identity.device_id),
                config,
                device_id: identity.device_id.clone(),
                connected: false,
            },
            eventloop,
        ))
    }

    /// Drive the session until a fatal error.
    ///
    /// Each pass of the loop either services the broker connection (inbound
    /// classification, connection state changes) or runs the cadence tick.
    /// Inbound handling and the tick both complete promptly; the only awaits
    /// besides the poll itself are the bounded reconnect delays.
    pub async fn run(
        mut self,
        mut eventloop: EventLoop,
        mut sensor: Box<dyn Sensor>,
        led: Arc<dyn StatusLed>,
        cadence_config: &CadenceConfig,
    ) -> Result<(), SessionError> {
        let started = Instant::now();
        let mut cadence = Cadence::new(cadence_config);
        let mut sample = Sample::default();
        let mut twin_requested = false;
        let mut failures = 0u32;

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(
                            session_present = ack.session_present,
                            "connected to hub"
                        );
                        self.connected = true;
                        failures = 0;
                        self.subscribe().await?;
                        if !twin_requested {
                            // request a full twin once, right after the first connect
                            let fetch = self.engine.request_twin();
                            self.publish(fetch).await?;
                            twin_requested = true;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let effects = self.engine.handle(&publish.topic, &publish.payload);
                        self.apply(effects, &led).await?;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("hub closed the session");
                        self.connected = false;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.connected = false;
                        failures += 1;
                        if failures >= self.config.connect_attempts {
                            return Err(SessionError::RetriesExhausted(failures));
                        }
                        warn!(
                            attempt = failures,
                            "connection failed: {err} ... retrying in {:?}",
                            self.config.connect_retry_delay
                        );
                        tokio::time::sleep(self.config.connect_retry_delay).await;
                    }
                },
                _ = tick.tick() => {
                    // timers are deliberately not reset while disconnected, so
                    // overdue activities catch up right after a reconnect
                    if !self.connected {
                        continue;
                    }
                    let now_ms = started.elapsed().as_millis() as u64;

                    if cadence.sample.due(now_ms) {
                        cadence.sample.fire(now_ms);
                        sample = sensor.sample();
                        debug!(
                            temperature = sample.temperature,
                            humidity = sample.humidity,
                            die = sample.die_number,
                            "sensors read"
                        );
                        let led = Arc::clone(&led);
                        tokio::spawn(async move { signal::pulse(led.as_ref()).await });
                    }

                    if cadence.telemetry.due(now_ms) {
                        cadence.telemetry.fire(now_ms);
                        let publication = self.engine.telemetry(&sample);
                        info!("sending telemetry: {}", publication.payload);
                        self.publish(publication).await?;
                    }

                    if cadence.properties.due(now_ms) {
                        cadence.properties.fire(now_ms);
                        let publication = self.engine.report_die(sample.die_number);
                        info!("sending reported property: {}", publication.payload);
                        self.publish(publication).await?;
                    }
                }
            }
        }
    }

    async fn subscribe(&self) -> Result<(), SessionError> {
        for filter in topics::subscriptions(&self.device_id) {
            self.client.subscribe(filter, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    async fn publish(&self, publication: Publication) -> Result<(), SessionError> {
        // fire-and-forget at this protocol layer
        self.client
            .publish(
                publication.topic,
                QoS::AtMostOnce,
                false,
                publication.payload.into_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn apply(
        &mut self,
        effects: Vec<Effect>,
        led: &Arc<dyn StatusLed>,
    ) -> Result<(), SessionError> {
        for effect in effects {
            match effect {
                Effect::Publish(publication) => self.publish(publication).await?,
                Effect::Flash(text) => {
                    // flashing takes seconds; keep it off the protocol loop
                    let led = Arc::clone(led);
                    tokio::spawn(async move { morse::flash(led.as_ref(), &text).await });
                }
            }
        }
        Ok(())
    }
}
