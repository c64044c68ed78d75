//! Callback signature scheme: `t=<unix ts>,v1=<hex hmac-sha256("{t}.{body}")>`

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Hex signature for `payload` signed at `timestamp`
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Full header value, as the gateway would send it
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> AppResult<String> {
    Ok(format!("t={},v1={}", timestamp, sign(secret, timestamp, payload)?))
}

/// Check `header` against `payload`; returns the signed timestamp.
///
/// Any of several `v1` values may match. The timestamp must be within
/// `tolerance_secs` of `now` in either direction.
pub fn verify(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> AppResult<i64> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let (key, value) = match part.trim().split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(AppError::InvalidSignature("missing v1 signature".to_string()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(AppError::InvalidSignature(format!(
            "timestamp {} outside tolerance of {}s",
            timestamp, tolerance_secs
        )));
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        // verify_slice compares in constant time
        if mac.verify_slice(&expected).is_ok() {
            return Ok(timestamp);
        }
    }

    Err(AppError::InvalidSignature("no matching signature".to_string()))
}
