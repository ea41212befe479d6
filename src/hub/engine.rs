//! Protocol engine for the twin/method/telemetry sub-protocols.
//!
//! The engine owns the outbound request-id sequence and the single pending
//! twin-fetch slot, classifies every inbound publish and decides what goes
//! back out. It performs no I/O itself: handlers return [`Effect`]s for the
//! session loop to carry out, which keeps the whole state machine testable
//! without a broker.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::sensor::Sample;

use super::topics::{self, Inbound};

/// Desired-property keys the device acknowledges. One is present per patch.
const SETTING_KEYS: [&str; 4] = ["fanSpeed", "setVoltage", "setCurrent", "activateIR"];

/// An outbound MQTT publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

/// Side effect requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Publish(Publication),
    /// Flash the text on the status LED as morse code.
    Flash(String),
}

// Serialized in declaration order; the hub expects these fields byte-for-byte.
#[derive(Serialize)]
struct SettingAck<'a> {
    value: &'a Value,
    #[serde(rename = "statusCode")]
    status_code: u16,
    status: &'static str,
    #[serde(rename = "desiredVersion")]
    desired_version: i64,
}

pub struct Engine {
    device_id: String,
    next_request_id: u32,
    pending_twin: Option<u32>,
}

impl Engine {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            next_request_id: 0,
            pending_twin: None,
        }
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = id.wrapping_add(1);
        id
    }

    /// Issue a full-twin fetch. At most one fetch is tracked at a time; a
    /// later response carrying this id clears the slot.
    pub fn request_twin(&mut self) -> Publication {
        let id = self.next_request_id();
        self.pending_twin = Some(id);
        Publication {
            topic: topics::twin_get(id),
            payload: String::new(),
        }
    }

    pub fn telemetry(&self, sample: &Sample) -> Publication {
        Publication {
            topic: topics::events(&self.device_id),
            payload: format!(
                "{{\"temp\": {:.2}, \"humidity\": {:.2}}}",
                sample.temperature, sample.humidity
            ),
        }
    }

    pub fn report_die(&mut self, die_number: u8) -> Publication {
        Publication {
            topic: topics::twin_reported(self.next_request_id()),
            payload: format!("{{\"dieNumber\": {die_number}}}"),
        }
    }

    /// Classify and handle one inbound publish.
    pub fn handle(&mut self, topic: &str, payload: &[u8]) -> Vec<Effect> {
        let payload = String::from_utf8_lossy(payload);
        match topics::classify(topic) {
            Inbound::Method { name, request_id } => self.on_method(&name, &request_id, &payload),
            Inbound::CloudToDevice => {
                info!("cloud to device message: {payload}");
                Vec::new()
            }
            Inbound::DesiredPatch => self.on_desired_patch(&payload),
            Inbound::TwinResult { code, request_id } => {
                self.on_twin_result(code, request_id, &payload);
                Vec::new()
            }
            Inbound::Unknown => {
                warn!(topic, "unknown message: {payload}");
                Vec::new()
            }
        }
    }

    fn on_method(&mut self, name: &str, request_id: &str, arguments: &str) -> Vec<Effect> {
        info!("direct method call: {name}({arguments})");
        if !name.eq_ignore_ascii_case("ECHO") {
            return Vec::new();
        }

        vec![
            Effect::Publish(Publication {
                topic: topics::method_response(200, request_id),
                payload: String::new(),
            }),
            Effect::Flash(arguments.to_owned()),
        ]
    }

    fn on_desired_patch(&mut self, payload: &str) -> Vec<Effect> {
        let patch: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!("desired property payload is not valid JSON ({err}): {payload}");
                return Vec::new();
            }
        };
        let version = patch.get("$version").and_then(Value::as_i64).unwrap_or(0);

        for key in SETTING_KEYS {
            if let Some(value) = patch.get(key) {
                return vec![Effect::Publish(self.acknowledge_setting(key, value, version))];
            }
        }

        warn!("desired property change with no recognized setting: {payload}");
        Vec::new()
    }

    fn acknowledge_setting(&mut self, key: &str, value: &Value, version: i64) -> Publication {
        let ack = SettingAck {
            value,
            status_code: 200,
            status: "completed",
            desired_version: version,
        };
        let body = serde_json::to_string(&ack).expect("setting ack serialization failed");
        let payload = format!("{{\"{key}\":{body}}}");
        info!("sending acknowledgement: {payload}");

        Publication {
            topic: topics::twin_reported(self.next_request_id()),
            payload,
        }
    }

    fn on_twin_result(&mut self, code: u16, request_id: u32, payload: &str) {
        if self.pending_twin == Some(request_id) {
            self.pending_twin = None;
            // may be truncated by the transport's message-size limit
            info!("current state of device twin: {payload}");
        } else if (200..300).contains(&code) {
            info!("hub acknowledged receipt of reported property {request_id}");
        } else {
            warn!("hub could not process reported property {request_id}, error {code}");
        }
    }

    #[cfg(test)]
    fn pending_twin(&self) -> Option<u32> {
        self.pending_twin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publications(effects: &[Effect]) -> Vec<&Publication> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Publish(publication) => Some(publication),
                Effect::Flash(_) => None,
            })
            .collect()
    }

    #[test]
    fn numeric_setting_produces_one_acknowledgement() {
        let mut engine = Engine::new("dev1");
        let effects = engine.handle(
            "$iothub/twin/PATCH/properties/desired/?$version=3",
            br#"{"fanSpeed": 42, "$version": 3}"#,
        );

        let sent = publications(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].payload,
            r#"{"fanSpeed":{"value":42,"statusCode":200,"status":"completed","desiredVersion":3}}"#
        );
        assert_eq!(sent[0].topic, "$iothub/twin/PATCH/properties/reported/?$rid=0");
    }

    #[test]
    fn boolean_setting_renders_the_literal() {
        let mut engine = Engine::new("dev1");
        let effects = engine.handle(
            "$iothub/twin/PATCH/properties/desired/?$version=1",
            br#"{"activateIR": true, "$version": 1}"#,
        );

        let sent = publications(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].payload,
            r#"{"activateIR":{"value":true,"statusCode":200,"status":"completed","desiredVersion":1}}"#
        );
    }

    #[test]
    fn unrecognized_setting_is_dropped() {
        let mut engine = Engine::new("dev1");
        let effects = engine.handle(
            "$iothub/twin/PATCH/properties/desired/?$version=2",
            br#"{"brightness": 10, "$version": 2}"#,
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn malformed_patch_is_dropped() {
        let mut engine = Engine::new("dev1");
        let effects = engine.handle(
            "$iothub/twin/PATCH/properties/desired/?$version=2",
            b"{not json",
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn twin_fetch_response_clears_the_pending_slot() {
        let mut engine = Engine::new("dev1");
        let fetch = engine.request_twin();
        assert_eq!(fetch.topic, "$iothub/twin/GET/?$rid=0");
        assert_eq!(engine.pending_twin(), Some(0));

        engine.handle("$iothub/twin/res/200/?$rid=0", br#"{"desired":{}}"#);
        assert_eq!(engine.pending_twin(), None);
    }

    #[test]
    fn unrelated_twin_results_leave_the_pending_slot_alone() {
        let mut engine = Engine::new("dev1");
        engine.request_twin();

        // success acknowledgement for some other request
        engine.handle("$iothub/twin/res/204/?$rid=7", b"");
        assert_eq!(engine.pending_twin(), Some(0));

        // failure acknowledgement for some other request
        engine.handle("$iothub/twin/res/400/?$rid=9", b"");
        assert_eq!(engine.pending_twin(), Some(0));
    }

    #[test]
    fn echo_method_is_acknowledged_and_flashed() {
        let mut engine = Engine::new("dev1");
        let effects = engine.handle("$iothub/methods/POST/echo/?$rid=21", b"hello");

        assert_eq!(
            effects,
            vec![
                Effect::Publish(Publication {
                    topic: "$iothub/methods/res/200/?$rid=21".to_owned(),
                    payload: String::new(),
                }),
                Effect::Flash("hello".to_owned()),
            ]
        );
    }

    #[test]
    fn other_methods_are_ignored() {
        let mut engine = Engine::new("dev1");
        let effects = engine.handle("$iothub/methods/POST/reboot/?$rid=3", b"{}");
        assert!(effects.is_empty());
    }

    #[test]
    fn request_ids_are_unique_across_operations() {
        let mut engine = Engine::new("dev1");
        let fetch = engine.request_twin();
        let report = engine.report_die(4);
        let ack = engine.handle(
            "$iothub/twin/PATCH/properties/desired/?$version=1",
            br#"{"setVoltage": 5, "$version": 1}"#,
        );

        assert!(fetch.topic.ends_with("$rid=0"));
        assert!(report.topic.ends_with("$rid=1"));
        assert!(publications(&ack)[0].topic.ends_with("$rid=2"));
    }

    #[test]
    fn telemetry_renders_two_decimals() {
        let engine = Engine::new("dev1");
        let publication = engine.telemetry(&Sample {
            temperature: 23.456,
            humidity: 45.0,
            die_number: 2,
        });

        assert_eq!(publication.topic, "devices/dev1/messages/events/");
        assert_eq!(publication.payload, r#"{"temp": 23.46, "humidity": 45.00}"#);
    }

    #[test]
    fn die_report_targets_the_reported_property_topic() {
        let mut engine = Engine::new("dev1");
        let publication = engine.report_die(6);
        assert_eq!(
            publication.topic,
            "$iothub/twin/PATCH/properties/reported/?$rid=0"
        );
        assert_eq!(publication.payload, r#"{"dieNumber": 6}"#);
    }
}
