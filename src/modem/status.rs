use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cellular registration and signal state, captured fresh per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatusSnapshot {
    pub connected: bool,
    /// Raw `+CSQ` RSSI index (0-31); `None` when the modem reports 99.
    pub signal_strength: Option<u8>,
    pub signal_dbm: Option<i32>,
    pub operator: Option<String>,
    pub access_technology: Option<String>,
    pub registration: Option<u8>,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NetworkStatusSnapshot {
    pub fn unavailable(reason: String) -> Self {
        Self {
            connected: false,
            signal_strength: None,
            signal_dbm: None,
            operator: None,
            access_technology: None,
            registration: None,
            captured_at: Utc::now(),
            error: Some(reason),
        }
    }
}

/// `+CSQ: <rssi>,<ber>` -> (rssi index, dBm). 99 means "not detectable".
pub fn parse_csq(payload: &str) -> Option<(u8, i32)> {
    let rssi = payload.split(',').next()?.trim().parse::<u8>().ok()?;
    if rssi > 31 {
        return None;
    }
    Some((rssi, -113 + 2 * i32::from(rssi)))
}

/// `+COPS: <mode>[,<format>,"<oper>"[,<act>]]` -> (operator, access technology).
pub fn parse_cops(payload: &str) -> (Option<String>, Option<String>) {
    let mut fields = payload.splitn(3, ',');
    let _mode = fields.next();
    let _format = fields.next();
    let Some(rest) = fields.next() else {
        return (None, None);
    };

    // The operator name is quoted and may itself contain commas.
    let (operator, tail) = match rest.trim().strip_prefix('"') {
        Some(quoted) => match quoted.split_once('"') {
            Some((name, tail)) => (name.to_string(), tail),
            None => return (None, None),
        },
        None => match rest.split_once(',') {
            Some((name, tail)) => (name.trim().to_string(), tail),
            None => (rest.trim().to_string(), ""),
        },
    };

    let act = tail
        .trim_start_matches(',')
        .trim()
        .parse::<u8>()
        .ok()
        .map(|code| access_technology_name(code).to_string());
    let operator = Some(operator).filter(|name| !name.is_empty());
    (operator, act)
}

/// `+CREG: <n>,<stat>[,...]` -> registration status code.
pub fn parse_creg(payload: &str) -> Option<u8> {
    let mut fields = payload.split(',').map(str::trim);
    let first = fields.next()?;
    // Unsolicited form carries only <stat>; the query form is <n>,<stat>.
    let stat = fields.next().unwrap_or(first);
    stat.parse::<u8>().ok()
}

// Home (1) and roaming (5) are the registered states.
pub fn is_registered(code: u8) -> bool {
    matches!(code, 1 | 5)
}

fn access_technology_name(code: u8) -> &'static str {
    match code {
        0 | 1 | 3 => "2G",
        2 | 4 | 5 | 6 => "3G",
        7 => "LTE",
        11 | 12 => "5G-SA",
        13 => "5G-NSA",
        _ => "Unknown",
    }
}
