use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("shared access key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),
}

/// Synthesize a time-limited shared-access token for `resource`.
///
/// The token is an HMAC-SHA-256 signature over the lower-cased resource URL
/// and the expiry timestamp, keyed with the base64-decoded device key. The
/// same construction authenticates both the provisioning handshake and the
/// broker session, with different resource/expiry pairs.
pub fn sign(key_base64: &str, resource: &str, expiry_epoch: u64) -> Result<String, TokenError> {
    let resource = resource.to_lowercase();
    let string_to_sign = format!("{resource}\n{expiry_epoch}");

    let key = BASE64.decode(key_base64)?;
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts keys of any length");
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={resource}&sig={sig}&se={expiry_epoch}",
        sig = utf8_percent_encode(&signature, NON_ALPHANUMERIC),
    ))
}
