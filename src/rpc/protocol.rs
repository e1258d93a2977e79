//! Wire format between the daemon and its clients.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id":7,"method":"gnss_location"}
//! <- {"id":7,"result":{"method":"gnss_location","success":true,"fix":{...}}}
//! ```

use crate::modem::service::GnssLocation;
use crate::modem::status::NetworkStatusSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    NetworkStatus,
    GnssLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<u64>,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Payload {
    NetworkStatus(NetworkStatusSnapshot),
    GnssLocation(GnssLocation),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Payload,
}

impl Response {
    pub fn error(id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            id,
            result: Payload::Error {
                error: error.into(),
            },
        }
    }
}

// Encode one message as a single newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
