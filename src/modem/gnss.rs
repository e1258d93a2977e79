//! Parser for the modem's `+CGNSSINFO` reply.
//!
//! ```text
//! +CGNSSINFO: <mode>,<gps>,<glonass>,[<galileo>,]<beidou>,<lat>,<N|S>,<lon>,<E|W>,
//!             <ddmmyy>,<hhmmss.s>,<alt>,<speed kn>,<course>,<pdop>,<hdop>,<vdop>
//! ```
//!
//! Firmware without Galileo support sends 16 fields, newer firmware 17.
//! Parsing never fails: garbage yields a fix marked `invalid`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

const REPLY_PREFIX: &str = "+CGNSSINFO:";
const KNOTS_TO_KMH: f64 = 1.852;
pub const FIX_SOURCE: &str = "modem-gnss";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixType {
    #[serde(rename = "2D")]
    TwoD,
    #[serde(rename = "3D")]
    ThreeD,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Valid,
    NoFix,
    Invalid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteCounts {
    pub gps: u32,
    pub glonass: u32,
    pub galileo: u32,
    pub beidou: u32,
    pub total: u32,
}

/// One location record, produced fresh per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnssFix {
    pub fix_type: FixType,
    pub satellites: SatelliteCounts,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_m: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub course_deg: Option<f64>,
    pub pdop: Option<f64>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
    pub utc: Option<DateTime<Utc>>,
    pub fix_status: FixStatus,
    pub source: String,
}

impl GnssFix {
    fn empty(fix_status: FixStatus) -> Self {
        Self {
            fix_type: FixType::Unknown,
            satellites: SatelliteCounts::default(),
            latitude: None,
            longitude: None,
            altitude_m: None,
            speed_kmh: None,
            course_deg: None,
            pdop: None,
            hdop: None,
            vdop: None,
            utc: None,
            fix_status,
            source: FIX_SOURCE.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fix_status == FixStatus::Valid
    }
}

// Find the `+CGNSSINFO:` line in a reply (possibly surrounded by other lines) and parse it.
pub fn parse_gnss_reply(reply: &str) -> GnssFix {
    let Some(payload) = reply
        .lines()
        .find_map(|line| line.trim().strip_prefix(REPLY_PREFIX))
    else {
        return GnssFix::empty(FixStatus::Invalid);
    };
    parse_payload(payload.trim())
}

fn parse_payload(payload: &str) -> GnssFix {
    let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
    if fields.iter().all(|field| field.is_empty()) {
        return GnssFix::empty(FixStatus::NoFix);
    }

    // Position of the latitude field depends on whether a Galileo count is present.
    let (constellations, rest) = match fields.len() {
        16 => (&fields[1..4], &fields[4..]),
        17 => (&fields[1..5], &fields[5..]),
        _ => return GnssFix::empty(FixStatus::Invalid),
    };

    let fix_type = match fields[0] {
        "2" => FixType::TwoD,
        "3" => FixType::ThreeD,
        "" | "0" | "1" => return GnssFix::empty(FixStatus::NoFix),
        _ => return GnssFix::empty(FixStatus::Invalid),
    };

    let mut fix = GnssFix::empty(FixStatus::Invalid);
    fix.fix_type = fix_type;

    let counts: Option<Vec<u32>> = constellations.iter().map(|raw| parse_count(raw)).collect();
    let Some(counts) = counts else {
        return fix;
    };
    fix.satellites = match counts.as_slice() {
        [gps, glonass, beidou] => SatelliteCounts {
            gps: *gps,
            glonass: *glonass,
            galileo: 0,
            beidou: *beidou,
            total: gps + glonass + beidou,
        },
        [gps, glonass, galileo, beidou] => SatelliteCounts {
            gps: *gps,
            glonass: *glonass,
            galileo: *galileo,
            beidou: *beidou,
            total: gps + glonass + galileo + beidou,
        },
        _ => return fix,
    };

    fix.latitude = parse_coord(rest[0], rest[1], 2, ('N', 'S')).map(round6);
    fix.longitude = parse_coord(rest[2], rest[3], 3, ('E', 'W')).map(round6);
    fix.utc = parse_timestamp(rest[4], rest[5]);
    fix.altitude_m = parse_f64(rest[6]);
    fix.speed_kmh = parse_f64(rest[7]).map(|knots| round2(knots * KNOTS_TO_KMH));
    fix.course_deg = parse_f64(rest[8]);
    fix.pdop = parse_f64(rest[9]);
    fix.hdop = parse_f64(rest[10]);
    fix.vdop = parse_f64(rest[11]);

    let required_present = fix.latitude.is_some()
        && fix.longitude.is_some()
        && fix.altitude_m.is_some()
        && fix.speed_kmh.is_some()
        && fix.course_deg.is_some()
        && fix.pdop.is_some()
        && fix.hdop.is_some()
        && fix.vdop.is_some();
    if required_present {
        fix.fix_status = FixStatus::Valid;
    }
    fix
}

// Per-constellation counts fit in a byte; anything larger is line noise.
fn parse_count(raw: &str) -> Option<u32> {
    if raw.is_empty() {
        return Some(0);
    }
    raw.parse::<u8>().ok().map(u32::from)
}

fn parse_f64(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

// ddmm.mmmm / dddmm.mmmm plus hemisphere letter into signed decimal degrees.
fn parse_coord(value: &str, hemi: &str, degree_digits: usize, hemis: (char, char)) -> Option<f64> {
    if value.len() <= degree_digits || !value.is_char_boundary(degree_digits) {
        return None;
    }
    let (deg_str, min_str) = value.split_at(degree_digits);
    let degrees = deg_str.parse::<u32>().ok()?;
    let minutes = min_str.parse::<f64>().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    let decimal = f64::from(degrees) + minutes / 60.0;
    let limit = if degree_digits == 2 { 90.0 } else { 180.0 };
    if decimal > limit {
        return None;
    }

    let mut letters = hemi.chars();
    match (letters.next(), letters.next()) {
        (Some(letter), None) if letter == hemis.0 => Some(decimal),
        (Some(letter), None) if letter == hemis.1 => Some(-decimal),
        _ => None,
    }
}

fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%d%m%y").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S%.f").ok()?;
    Some(date.and_time(time).and_utc())
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::testing::SAMPLE_FIX_LINE;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_three_d_fix_with_two_constellations() {
        let fix = parse_gnss_reply(&format!("{SAMPLE_FIX_LINE}\r\n\r\nOK"));
        assert_eq!(fix.fix_type, FixType::ThreeD);
        assert_eq!(fix.satellites.gps, 8);
        assert_eq!(fix.satellites.glonass, 4);
        assert_eq!(fix.satellites.beidou, 0);
        assert_eq!(fix.satellites.total, 12);
        assert_eq!(fix.fix_status, FixStatus::Valid);
        assert!((fix.latitude.unwrap() - 51.8369).abs() < 1e-6);
        assert!((fix.longitude.unwrap() - (-1.32)).abs() < 1e-6);
        assert_eq!(fix.altitude_m, Some(92.4));
        assert_eq!(fix.speed_kmh, Some(18.52));
        assert_eq!(fix.hdop, Some(0.9));
        assert_eq!(fix.source, FIX_SOURCE);

        let utc = fix.utc.unwrap();
        assert_eq!((utc.year(), utc.month(), utc.day()), (2026, 3, 14));
        assert_eq!((utc.hour(), utc.minute(), utc.second()), (10, 15, 30));
    }

    #[test]
    fn galileo_variant_adds_to_total() {
        let fix = parse_gnss_reply(
            "+CGNSSINFO: 2,06,02,03,01,3150.804403,S,11711.876500,E,161117,022015.0,48.7,0.0,0,1.1,0.8,0.8",
        );
        assert_eq!(fix.fix_type, FixType::TwoD);
        assert_eq!(fix.satellites.galileo, 3);
        assert_eq!(fix.satellites.beidou, 1);
        assert_eq!(fix.satellites.total, 12);
        assert!(fix.latitude.unwrap() < 0.0);
        assert!(fix.is_valid());
    }

    #[test]
    fn empty_fields_mean_no_fix() {
        let fix = parse_gnss_reply("+CGNSSINFO: ,,,,,,,,,,,,,,,");
        assert_eq!(fix.fix_status, FixStatus::NoFix);
        assert_eq!(fix.fix_type, FixType::Unknown);
        assert!(!fix.is_valid());
    }

    #[test]
    fn mode_without_fix_is_not_valid() {
        let fix = parse_gnss_reply(
            "+CGNSSINFO: 1,00,00,00,5150.214000,N,00119.200000,W,140326,101530.0,92.4,0.0,0,9.9,9.9,9.9",
        );
        assert_eq!(fix.fix_status, FixStatus::NoFix);
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let fix = parse_gnss_reply(
            "+CGNSSINFO: 3,08,04,00,5150.214000,N,,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
        );
        assert_eq!(fix.fix_type, FixType::ThreeD);
        assert_eq!(fix.fix_status, FixStatus::Invalid);
        assert!(fix.longitude.is_none());
    }

    #[test]
    fn garbled_and_truncated_input_never_panics() {
        let samples = [
            "",
            "OK",
            "+CGNSSINFO:",
            "+CGNSSINFO: 3,08,04",
            "+CGNSSINFO: 3,xx,04,00,5150.2,N,00119.2,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
            "+CGNSSINFO: 3,08,04,00,5\u{e9}50.2,N,00119.2,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
            "+CGNSSINFO: 3,08,04,00,9999.0,N,00119.2,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
            "+CGNSSINFO: 3,08,04,00,5150.2,Q,00119.2,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
            "+CGNSSINFO: 7,08,04,00,5150.2,N,00119.2,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
            "\u{0}\u{1}garbage,,,,",
            "+CGNSSINFO: 3,4294967295,1,0,5150.214000,N,00119.200000,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
            "+CGNSSINFO: 3,300,04,00,5150.214000,N,00119.200000,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3",
        ];
        for sample in samples {
            let fix = parse_gnss_reply(sample);
            assert!(!fix.is_valid(), "sample should not be valid: {sample:?}");
        }
    }

    #[test]
    fn unparseable_timestamp_does_not_invalidate_position() {
        let fix = parse_gnss_reply(
            "+CGNSSINFO: 3,08,04,00,5150.214000,N,00119.200000,W,,,92.4,10.0,181.3,1.6,0.9,1.3",
        );
        assert!(fix.is_valid());
        assert!(fix.utc.is_none());
    }
}
