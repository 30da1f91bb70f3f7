//! Stratum v1 message types and parameter parsing

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_SUBSCRIBE: &str = "mining.subscribe";
pub const METHOD_AUTHORIZE: &str = "mining.authorize";
pub const METHOD_SUBMIT: &str = "mining.submit";
pub const METHOD_NOTIFY: &str = "mining.notify";
pub const METHOD_SET_DIFFICULTY: &str = "mining.set_difficulty";

/// Largest extranonce2 size accepted from a pool, in bytes
pub const MAX_EXTRANONCE2_SIZE: usize = 16;

/// Stratum request or server-pushed notification (`id` is null for notifications)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumRequest {
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Stratum response message.
///
/// Pools disagree on the error shape: most send `[code, "message", data]`, some an object
/// with `code`/`message`, a few a bare string. The value is kept raw and read through
/// [`error_message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Any line received from a pool
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StratumMessage {
    Request(StratumRequest),
    Response(StratumResponse),
}

impl StratumRequest {
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self { id: Some(id), method: method.to_string(), params }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl StratumResponse {
    /// Splits the response into the result value or the pool's error text.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) if !error.is_null() => Err(error_message(&error)),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Human readable text of a stratum error value
pub fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Array(items) => match (items.first(), items.get(1)) {
            (Some(code), Some(Value::String(message))) => format!("{} (code {})", message, code),
            _ => error.to_string(),
        },
        Value::Object(map) => match (map.get("message").and_then(Value::as_str), map.get("code")) {
            (Some(message), Some(code)) => format!("{} (code {})", message, code),
            (Some(message), None) => message.to_string(),
            _ => error.to_string(),
        },
        other => other.to_string(),
    }
}

/// Parse one line received from a pool
pub fn parse_message(data: &[u8]) -> Result<StratumMessage, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Result of `mining.subscribe`: `[subscriptions, extranonce1, extranonce2_size]`
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResult {
    /// Subscription list exactly as sent by the pool
    pub subscriptions: Value,
    pub extra_nonce_1: String,
    pub extra_nonce_2_size: usize,
}

impl SubscribeResult {
    /// Session id announced in the subscription list.
    ///
    /// Accepts the usual `[[method, id], ...]` shape and the flat `[method, id]` shape some pools send.
    /// Returns `None` when the list has neither shape.
    pub fn session_id(&self) -> Option<String> {
        let list = self.subscriptions.as_array()?;
        match list.first()? {
            Value::Array(first) => first.get(1).and_then(Value::as_str).map(str::to_string),
            Value::String(_) if list.len() == 2 => list.get(1).and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    /// The pool returned a subscription list of the expected shape (an array of two elements).
    pub fn has_well_formed_subscriptions(&self) -> bool {
        self.subscriptions.as_array().is_some_and(|list| list.len() == 2)
    }
}

impl TryFrom<&Value> for SubscribeResult {
    type Error = String;

    fn try_from(result: &Value) -> Result<Self, Self::Error> {
        let items = result.as_array().ok_or_else(|| format!("Subscribe result is not an array: {}", result))?;
        if items.len() < 3 {
            return Err(format!("Subscribe result has {} elements, expected 3", items.len()));
        }

        let extra_nonce_1 = items[1].as_str().ok_or_else(|| "Missing extranonce1".to_string())?.to_string();
        if hex_digits(&extra_nonce_1).is_none() {
            return Err(format!("Extranonce1 is not hex: {}", extra_nonce_1));
        }
        let extra_nonce_2_size = items[2]
            .as_u64()
            .and_then(|size| usize::try_from(size).ok())
            .filter(|size| *size <= MAX_EXTRANONCE2_SIZE)
            .ok_or_else(|| format!("Invalid extranonce2 size: {} (at most {} bytes)", items[2], MAX_EXTRANONCE2_SIZE))?;

        Ok(SubscribeResult { subscriptions: items[0].clone(), extra_nonce_1, extra_nonce_2_size })
    }
}

/// Mining submit request parameters: `[username, job_id, extranonce2, ntime, nonce, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct MiningSubmitParams {
    pub username: String,
    pub job_id: String,
    pub extra_nonce_2: String,
    pub ntime: String,
    pub nonce: String,
}

impl TryFrom<&[Value]> for MiningSubmitParams {
    type Error = String;

    fn try_from(params: &[Value]) -> Result<Self, Self::Error> {
        let field = |index: usize, name: &str| -> Result<String, String> {
            params.get(index).and_then(Value::as_str).map(str::to_string).ok_or_else(|| format!("Missing {} parameter", name))
        };

        let username = field(0, "username")?;
        let job_id = field(1, "job_id")?;
        let extra_nonce_2 = field(2, "extranonce2")?;
        let ntime = field(3, "ntime")?;
        let nonce = field(4, "nonce")?;
        if hex_digits(&extra_nonce_2).is_none() {
            return Err(format!("Extranonce2 is not hex: {}", extra_nonce_2));
        }

        Ok(MiningSubmitParams { username, job_id, extra_nonce_2, ntime, nonce })
    }
}

impl MiningSubmitParams {
    pub fn to_params(&self) -> Vec<Value> {
        vec![
            Value::from(self.username.as_str()),
            Value::from(self.job_id.as_str()),
            Value::from(self.extra_nonce_2.as_str()),
            Value::from(self.ntime.as_str()),
            Value::from(self.nonce.as_str()),
        ]
    }
}

/// Number of bytes encoded by an even-length hex string, `None` if it is not one
pub fn hex_digits(value: &str) -> Option<usize> {
    (value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit())).then_some(value.len() / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_notification_and_response() {
        let msg = parse_message(br#"{"id":null,"method":"mining.set_difficulty","params":[65536]}"#).unwrap();
        let StratumMessage::Request(req) = msg else { panic!("expected a notification") };
        assert!(req.is_notification());
        assert_eq!(req.method, METHOD_SET_DIFFICULTY);
        assert_eq!(req.params, vec![json!(65536)]);

        let msg = parse_message(br#"{"id":7,"result":true,"error":null}"#).unwrap();
        let StratumMessage::Response(resp) = msg else { panic!("expected a response") };
        assert_eq!(resp.id, Some(7));
        assert_eq!(resp.into_result(), Ok(json!(true)));
    }

    #[test]
    fn test_error_shapes() {
        assert_eq!(error_message(&json!([23, "Low difficulty share", null])), "Low difficulty share (code 23)");
        assert_eq!(error_message(&json!({"code": 21, "message": "Job not found"})), "Job not found (code 21)");
        assert_eq!(error_message(&json!("Stale")), "Stale");

        let resp = StratumResponse { id: Some(3), result: None, error: Some(json!([21, "Job not found", null])) };
        assert_eq!(resp.into_result(), Err("Job not found (code 21)".to_string()));
    }

    #[test]
    fn test_subscribe_result() {
        let value = json!([[["mining.set_difficulty", "s1"], ["mining.notify", "s1"]], "ab", 4]);
        let result = SubscribeResult::try_from(&value).unwrap();
        assert_eq!(result.extra_nonce_1, "ab");
        assert_eq!(result.extra_nonce_2_size, 4);
        assert_eq!(result.session_id(), Some("s1".to_string()));
        assert!(result.has_well_formed_subscriptions());

        let flat = SubscribeResult::try_from(&json!([["mining.notify", "deadbeef"], "0a0b", 2])).unwrap();
        assert_eq!(flat.session_id(), Some("deadbeef".to_string()));

        let malformed = SubscribeResult::try_from(&json!([null, "ab", 4])).unwrap();
        assert_eq!(malformed.session_id(), None);
        assert!(!malformed.has_well_formed_subscriptions());

        assert!(SubscribeResult::try_from(&json!([null, "ab"])).is_err());
        assert!(SubscribeResult::try_from(&json!([null, "xyz", 4])).is_err());
        assert!(SubscribeResult::try_from(&json!([null, "ab", -1])).is_err());
    }

    #[test]
    fn test_subscribe_result_bounds_extranonce2_size() {
        let largest = SubscribeResult::try_from(&json!([null, "ab", MAX_EXTRANONCE2_SIZE])).unwrap();
        assert_eq!(largest.extra_nonce_2_size, MAX_EXTRANONCE2_SIZE);

        assert!(SubscribeResult::try_from(&json!([null, "ab", MAX_EXTRANONCE2_SIZE + 1])).is_err());
        assert!(SubscribeResult::try_from(&json!([null, "ab", 1u64 << 40])).is_err());
        assert!(SubscribeResult::try_from(&json!([null, "ab", u64::MAX])).is_err());
    }

    #[test]
    fn test_submit_params() {
        let params = vec![json!("worker.1"), json!("j1"), json!("00ff"), json!("5f5e1000"), json!("deadbeef")];
        let submit = MiningSubmitParams::try_from(params.as_slice()).unwrap();
        assert_eq!(submit.job_id, "j1");
        assert_eq!(submit.extra_nonce_2, "00ff");
        assert_eq!(submit.to_params(), params);

        let short = vec![json!("worker.1"), json!("j1")];
        assert_eq!(MiningSubmitParams::try_from(short.as_slice()), Err("Missing extranonce2 parameter".to_string()));

        let odd = vec![json!("w"), json!("j1"), json!("abc"), json!("00"), json!("00")];
        assert!(MiningSubmitParams::try_from(odd.as_slice()).is_err());
    }

    #[test]
    fn test_hex_digits() {
        assert_eq!(hex_digits(""), Some(0));
        assert_eq!(hex_digits("00ff"), Some(2));
        assert_eq!(hex_digits("0g"), None);
        assert_eq!(hex_digits("abc"), None);
    }
}
