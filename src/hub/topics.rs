//! Topic templates for the hub's twin/method/telemetry sub-protocols, and
//! classification of inbound topics into the message classes the session
//! engine handles. Matching is case-insensitive, as delivered topics vary in
//! case between hub deployments.

const METHOD_PREFIX: &str = "$IOTHUB/METHODS/POST/";
const C2D_INFIX: &str = "/MESSAGES/DEVICEBOUND/";
const DESIRED_PREFIX: &str = "$IOTHUB/TWIN/PATCH/PROPERTIES/DESIRED";
const RESULT_PREFIX: &str = "$IOTHUB/TWIN/RES";

pub fn events(device_id: &str) -> String {
    format!("devices/{device_id}/messages/events/")
}

pub fn twin_reported(request_id: u32) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={request_id}")
}

pub fn twin_get(request_id: u32) -> String {
    format!("$iothub/twin/GET/?$rid={request_id}")
}

pub fn method_response(status: u16, request_id: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={request_id}")
}

/// The four fixed subscription filters registered right after connecting.
pub fn subscriptions(device_id: &str) -> [String; 4] {
    [
        "$iothub/twin/res/#".to_owned(),
        "$iothub/twin/PATCH/properties/desired/#".to_owned(),
        format!("devices/{device_id}/messages/devicebound/#"),
        "$iothub/methods/POST/#".to_owned(),
    ]
}

/// Message class of an inbound publish, determined from its topic alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Direct method invocation; carries the method name and the opaque
    /// request id to echo back on the response topic.
    Method { name: String, request_id: String },
    /// Cloud-to-device message; has no acknowledgement topic.
    CloudToDevice,
    /// Twin desired-property patch; the interesting part is the payload.
    DesiredPatch,
    /// Twin result: either the response to a twin fetch or the
    /// acknowledgement of a reported-property update.
    TwinResult { code: u16, request_id: u32 },
    Unknown,
}

/// Classify `topic`, evaluating the four known shapes in precedence order.
/// A topic matching none of them is `Unknown`, never an error.
pub fn classify(topic: &str) -> Inbound {
    let upper = topic.to_ascii_uppercase();

    if let Some(rest) = upper.strip_prefix(METHOD_PREFIX) {
        let name = rest.split("/?$").next().unwrap_or(rest).to_owned();
        let request_id = after(&upper, "$RID=").unwrap_or("").to_owned();
        return Inbound::Method { name, request_id };
    }

    if upper.contains(C2D_INFIX) {
        return Inbound::CloudToDevice;
    }

    if upper.starts_with(DESIRED_PREFIX) {
        return Inbound::DesiredPatch;
    }

    if upper.starts_with(RESULT_PREFIX) {
        // shape: $iothub/twin/res/{code}/?$rid={id}[&$version={v}]
        let code = after(&upper, "/RES/")
            .and_then(|rest| rest.split("/?$").next())
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);
        let request_id = after(&upper, "$RID=")
            .map(leading_digits)
            .and_then(|digits| digits.parse().ok())
            .unwrap_or(0);
        return Inbound::TwinResult { code, request_id };
    }

    Inbound::Unknown
}

fn after<'a>(haystack: &'a str, needle: &str) -> Option<&'a str> {
    haystack
        .find(needle)
        .map(|at| &haystack[at + needle.len()..])
}

fn leading_digits(s: &str) -> &str {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    &s[..end]
}
