//! Records served by the request/response endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /config` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResponse {
    #[serde(alias = "operatorName", alias = "operator_name")]
    pub surgeon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_folder: Option<String>,
}

/// A number the backend may send as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Number(f64),
    Text(String),
    Other(Value),
}

impl LooseNumber {
    /// Non-negative finite value, or 0 when the field can't be read as one.
    pub fn as_f64(&self) -> f64 {
        let value = match self {
            LooseNumber::Number(n) => *n,
            LooseNumber::Text(text) => text.trim().parse::<f64>().unwrap_or(0.0),
            LooseNumber::Other(_) => 0.0,
        };
        if value.is_finite() && value > 0.0 {
            value
        } else {
            0.0
        }
    }

    /// Whole-number view, truncating any fraction.
    pub fn as_u32(&self) -> u32 {
        let value = self.as_f64().trunc();
        if value >= u32::MAX as f64 {
            u32::MAX
        } else {
            value as u32
        }
    }
}

impl From<f64> for LooseNumber {
    fn from(value: f64) -> Self {
        LooseNumber::Number(value)
    }
}

/// `is_live` column: SQLite hands it out as 1/0, some producers as a bool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveFlag {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl LiveFlag {
    pub fn is_live(&self) -> bool {
        match self {
            LiveFlag::Bool(b) => *b,
            LiveFlag::Int(n) => *n != 0,
            LiveFlag::Text(text) => matches!(text.trim(), "1" | "true" | "TRUE" | "True"),
        }
    }
}

/// One row of `GET /surgeries`, list fields still comma-joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSurgeryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub procedure_name: String,
    pub date: String,
    pub time: String,
    pub duration: Option<LooseNumber>,
    pub surgeon_name: String,
    pub surgeon_image: Option<String>,
    pub instruments_names: Option<String>,
    pub instruments_images: Option<String>,
    pub instruments_durations: Option<String>,
    pub clutch_names: Option<String>,
    pub clutch_counts: Option<String>,
    pub clutch_count: Option<LooseNumber>,
    pub is_live: Option<LiveFlag>,
    pub patient_info: Option<String>,
    pub created_at: Option<String>,
}

impl RawSurgeryRecord {
    pub fn is_live(&self) -> bool {
        self.is_live.as_ref().is_some_and(LiveFlag::is_live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_backend_row() {
        let json = r#"{
            "id": 12,
            "procedure_name": "Cholecystectomy",
            "date": "2026-02-11",
            "time": "14:05",
            "duration": "45",
            "surgeon_name": "Dr.Meril M",
            "patient_info": null,
            "instruments_names": "SynchroSeal,Cobra_Grasper",
            "instruments_durations": "12.5,3",
            "clutch_count": 4,
            "created_at": "2026-02-11 14:50:02",
            "is_live": 0
        }"#;

        let record: RawSurgeryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Some(12));
        assert_eq!(record.duration.as_ref().map(LooseNumber::as_f64), Some(45.0));
        assert_eq!(record.clutch_count.as_ref().map(LooseNumber::as_u32), Some(4));
        assert!(!record.is_live());
        assert!(record.instruments_images.is_none());
        assert!(record.patient_info.is_none());
    }

    #[test]
    fn live_flag_variants() {
        assert!(LiveFlag::Int(1).is_live());
        assert!(!LiveFlag::Int(0).is_live());
        assert!(LiveFlag::Bool(true).is_live());
        assert!(LiveFlag::Text("1".to_string()).is_live());
        assert!(!LiveFlag::Text("no".to_string()).is_live());
    }

    #[test]
    fn loose_number_degrades_to_zero() {
        assert_eq!(LooseNumber::Text("abc".to_string()).as_f64(), 0.0);
        assert_eq!(LooseNumber::Text(" 7 ".to_string()).as_f64(), 7.0);
        assert_eq!(LooseNumber::Number(-3.0).as_f64(), 0.0);
        assert_eq!(LooseNumber::Number(f64::NAN).as_f64(), 0.0);
        assert_eq!(LooseNumber::Other(Value::Bool(true)).as_f64(), 0.0);
        assert_eq!(LooseNumber::Number(9.9).as_u32(), 9);
    }

    #[test]
    fn config_accepts_both_spellings() {
        let a: ConfigResponse = serde_json::from_str(r#"{"surgeon_name":"Dr.Raj"}"#).unwrap();
        let b: ConfigResponse = serde_json::from_str(r#"{"operatorName":"Dr.Raj"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.surgeon_name, "Dr.Raj");
    }
}
