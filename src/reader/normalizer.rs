//! Scan payload normalization.
//!
//! Every payload the shell posts flows through here exactly once; nothing
//! downstream ever touches raw JSON. The shell contract is loose: the payload
//! may be a JSON object, a JSON-encoded string containing one, or a bare
//! identifier string, and field names vary by shell version. `normalize`
//! flattens all of that into one [`ScanResult`].

use serde::Serialize;
use serde_json::Value;

use crate::bridge::ReadChannel;

/// Field names shells have used for the NFC card identifier, in priority order.
const NFC_IDENTIFIER_KEYS: &[&str] = &["cardNo", "card_no", "rfUid", "rf_uid", "uid", "nfcUid"];

/// Field names shells have used for the QR decoded text, in priority order.
const QR_CONTENT_KEYS: &[&str] = &["content", "qrCode", "payload", "data", "text", "code"];

const ERROR_KEYS: &[&str] = &["error", "message", "errorMessage"];

const CANCELLED_KEYS: &[&str] = &["cancelled", "canceled", "userCancelled"];

// ---------------------------------------------------------------------------
// ScanResult
// ---------------------------------------------------------------------------

/// Normalized outcome of one scan payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub channel: ReadChannel,
    pub success: bool,
    /// NFC card UID / serial, as posted.
    pub raw_identifier: Option<String>,
    /// QR decoded text.
    pub content: Option<String>,
    pub error: Option<String>,
    /// Operator backed out. Not an error.
    pub cancelled: bool,
}

impl ScanResult {
    pub fn cancelled(channel: ReadChannel) -> Self {
        Self {
            channel,
            success: false,
            raw_identifier: None,
            content: None,
            error: None,
            cancelled: true,
        }
    }

    pub fn failure(channel: ReadChannel, error: impl Into<String>) -> Self {
        Self {
            channel,
            success: false,
            raw_identifier: None,
            content: None,
            error: Some(error.into()),
            cancelled: false,
        }
    }

    fn success_with(channel: ReadChannel, captured: String) -> Self {
        let (raw_identifier, content) = match channel {
            ReadChannel::Nfc => (Some(captured), None),
            ReadChannel::Qr => (None, Some(captured)),
        };
        Self {
            channel,
            success: true,
            raw_identifier,
            content,
            error: None,
            cancelled: false,
        }
    }

    /// The channel-appropriate captured value: UID for NFC, text for QR.
    pub fn identifier(&self) -> Option<&str> {
        match self.channel {
            ReadChannel::Nfc => self.raw_identifier.as_deref(),
            ReadChannel::Qr => self.content.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a raw shell payload for `channel` into a [`ScanResult`].
///
/// Never fails: unusable payloads come back as a failure result whose error
/// text says why.
pub fn normalize(channel: ReadChannel, payload: &Value) -> ScanResult {
    match payload {
        Value::Object(_) => normalize_object(channel, payload),
        Value::String(s) => {
            // Shells double-encode: the payload is often a JSON string whose
            // text is itself a JSON object.
            if let Ok(inner) = serde_json::from_str::<Value>(s) {
                if inner.is_object() {
                    return normalize_object(channel, &inner);
                }
            }
            let trimmed = s.trim();
            if trimmed.is_empty() {
                ScanResult::failure(channel, "empty scan payload")
            } else {
                // A bare string is the identifier itself.
                ScanResult::success_with(channel, trimmed.to_string())
            }
        }
        other => ScanResult::failure(
            channel,
            format!("unexpected scan payload type: {}", type_name(other)),
        ),
    }
}

fn normalize_object(channel: ReadChannel, payload: &Value) -> ScanResult {
    // Cancellation wins over everything else in the payload.
    if CANCELLED_KEYS
        .iter()
        .any(|key| payload.get(*key).and_then(value_to_bool).unwrap_or(false))
    {
        return ScanResult::cancelled(channel);
    }

    let keys = match channel {
        ReadChannel::Nfc => NFC_IDENTIFIER_KEYS,
        ReadChannel::Qr => QR_CONTENT_KEYS,
    };
    let captured = payload_string(payload, keys);

    // Absent success flag: infer from what the payload carries.
    let success = payload
        .get("success")
        .and_then(value_to_bool)
        .unwrap_or_else(|| captured.is_some());

    if success {
        match captured {
            Some(value) => ScanResult::success_with(channel, value),
            None => ScanResult::failure(channel, "successful scan carried no identifier"),
        }
    } else {
        let error =
            payload_string(payload, ERROR_KEYS).unwrap_or_else(|| "scan failed".to_string());
        ScanResult::failure(channel, error)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn payload_string(payload: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = payload.get(*key).and_then(value_to_string) {
            return Some(value);
        }
    }
    None
}
