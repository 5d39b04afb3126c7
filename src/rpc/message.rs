use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::serde_helpers::{as_base64, from_base64};

pub const LIST_SWITCHES: &str = "list_switches";
pub const WRITE_DPID: &str = "write_dpid";

/// Methods the bridge subscribes to.
pub const METHODS: [&str; 2] = [LIST_SWITCHES, WRITE_DPID];

/// Reply envelope. `error` is empty on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: Value,
    pub error: String,
}

impl RpcResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: String::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: Value::String(String::new()),
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteDpidRequest {
    pub dpid: u64,
    #[serde(serialize_with = "as_base64", deserialize_with = "from_base64")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSwitchesResult {
    pub dpids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_shape() {
        let ok = RpcResponse::ok(json!({"dpids": [1, 2]}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"result": {"dpids": [1, 2]}, "error": ""})
        );
        let err = RpcResponse::err("NotFound");
        assert!(!err.is_ok());
        assert_eq!(serde_json::to_value(&err).unwrap()["error"], "NotFound");
    }

    #[test]
    fn write_request_payload_is_base64() {
        let req: WriteDpidRequest =
            serde_json::from_str(r#"{"dpid": 256, "payload": "BAIACAAAAAE="}"#).unwrap();
        assert_eq!(req.dpid, 256);
        assert_eq!(req.payload, vec![4, 2, 0, 8, 0, 0, 0, 1]);
    }
}
