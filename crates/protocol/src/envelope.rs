//! Envelopes pushed over the streaming socket

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::records::LooseNumber;

/// Messages pushed by the backend.
///
/// Unknown `type` tags decode to [`StreamEnvelope::Unknown`] so newer
/// producers don't break older consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEnvelope {
    SurgeryUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        surgeon_name: Option<String>,
        surgery: LiveSurgery,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_live: Option<bool>,
    },
    SurgeryComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        surgeon_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        surgery: Option<LiveSurgery>,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEnvelope {
    /// Operator this envelope is addressed to.
    ///
    /// The top-level `surgeon_name` wins; older backends only put it inside
    /// the surgery payload.
    pub fn operator_name(&self) -> Option<&str> {
        let (top, surgery) = match self {
            StreamEnvelope::SurgeryUpdate {
                surgeon_name,
                surgery,
                ..
            } => (surgeon_name.as_deref(), Some(surgery)),
            StreamEnvelope::SurgeryComplete {
                surgeon_name,
                surgery,
            } => (surgeon_name.as_deref(), surgery.as_ref()),
            StreamEnvelope::Unknown => return None,
        };
        non_empty(top).or_else(|| surgery.and_then(|s| non_empty(Some(s.surgeon_name.as_str()))))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// In-progress surgery as assembled by the backend's event parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSurgery {
    pub procedure_name: String,
    pub date: String,
    pub time: String,
    pub duration: Option<LooseNumber>,
    pub surgeon_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surgeon_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_info: Option<String>,
    /// Instrument name → usage object, in the order the producer wrote them.
    pub instruments: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clutch_count: Option<LooseNumber>,
}

/// Per-instrument usage inside a live payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentUsage {
    pub duration: Option<LooseNumber>,
    pub count: Option<LooseNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl LiveSurgery {
    /// Decoded instrument usage in source order. A bare number is read as the
    /// duration; anything unreadable yields an empty usage.
    pub fn instrument_usage(&self) -> Vec<(String, InstrumentUsage)> {
        self.instruments
            .iter()
            .map(|(name, value)| {
                let usage = match value {
                    Value::Object(_) => {
                        serde_json::from_value(value.clone()).unwrap_or_default()
                    }
                    Value::Number(n) => InstrumentUsage {
                        duration: n.as_f64().map(LooseNumber::Number),
                        ..Default::default()
                    },
                    Value::String(s) => InstrumentUsage {
                        duration: Some(LooseNumber::Text(s.clone())),
                        ..Default::default()
                    },
                    _ => InstrumentUsage::default(),
                };
                (name.clone(), usage)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_envelope_decodes_with_ordered_instruments() {
        let json = r#"{
            "type": "surgery_update",
            "surgeon_name": "Dr.Raj",
            "is_live": true,
            "surgery": {
                "procedure_name": "Hernia Repair",
                "date": "2026-02-11",
                "time": "09:15",
                "duration": 0,
                "surgeon_name": "Dr.Raj",
                "instruments": {
                    "Vessel Sealer Extend": {"duration": 2.5, "count": 1},
                    "Cobra_Grasper": {"duration": "1.25"},
                    "Small_Graptor": 4
                },
                "clutch_count": 3
            }
        }"#;

        let envelope: StreamEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.operator_name(), Some("Dr.Raj"));

        let StreamEnvelope::SurgeryUpdate { surgery, .. } = envelope else {
            panic!("expected update");
        };
        let usage = surgery.instrument_usage();
        let names: Vec<_> = usage.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Vessel Sealer Extend", "Cobra_Grasper", "Small_Graptor"]);
        assert_eq!(usage[1].1.duration.as_ref().map(LooseNumber::as_f64), Some(1.25));
        assert_eq!(usage[2].1.duration.as_ref().map(LooseNumber::as_f64), Some(4.0));
    }

    #[test]
    fn complete_falls_back_to_payload_operator() {
        let json = r#"{"type":"surgery_complete","surgery":{"surgeon_name":"Dr.Meril M"}}"#;
        let envelope: StreamEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(envelope, StreamEnvelope::SurgeryComplete { .. }));
        assert_eq!(envelope.operator_name(), Some("Dr.Meril M"));
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let envelope: StreamEnvelope =
            serde_json::from_str(r#"{"type":"heartbeat","at":1}"#).unwrap();
        assert!(matches!(envelope, StreamEnvelope::Unknown));
        assert_eq!(envelope.operator_name(), None);
    }

    #[test]
    fn update_without_surgery_is_malformed() {
        let result = serde_json::from_str::<StreamEnvelope>(r#"{"type":"surgery_update"}"#);
        assert!(result.is_err());
    }
}
