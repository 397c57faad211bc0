//! Decoding of raw backend records into [`Session`]s.
//!
//! Every path here degrades instead of failing: missing or malformed numbers
//! read as 0, missing list elements read as empty, and an unparsable start
//! date/time leaves `started_at` unset.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use misso_protocol::{
    ClutchEntry, LiveSurgery, LooseNumber, RawSurgeryRecord, Session, UsageEntry,
};

/// Accessory name used when the backend only reports a scalar press count.
pub const CLUTCH_PEDAL: &str = "Clutch Pedal";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Normalize one `GET /surgeries` row.
pub fn normalize_record(raw: &RawSurgeryRecord) -> Session {
    let usage_entries = usage_from_lists(
        raw.instruments_names.as_deref(),
        raw.instruments_durations.as_deref(),
        raw.instruments_images.as_deref(),
    );

    let mut clutch_entries =
        clutches_from_lists(raw.clutch_names.as_deref(), raw.clutch_counts.as_deref());
    if clutch_entries.is_empty() {
        clutch_entries.extend(scalar_clutch(raw.clutch_count.as_ref()));
    }

    Session {
        id: raw.id,
        procedure_name: raw.procedure_name.trim().to_string(),
        operator_name: raw.surgeon_name.trim().to_string(),
        operator_image: non_empty(raw.surgeon_image.as_deref()),
        start_date: raw.date.trim().to_string(),
        start_time: raw.time.trim().to_string(),
        started_at: combine_timestamp(&raw.date, &raw.time),
        duration_minutes: raw.duration.as_ref().map_or(0.0, LooseNumber::as_f64),
        usage_entries,
        clutch_entries,
        is_live: raw.is_live(),
        patient_info: non_empty(raw.patient_info.as_deref()),
        created_at: non_empty(raw.created_at.as_deref()),
    }
}

/// Normalize a pushed in-progress surgery. The result is always live and has
/// no id; `operator` is the name the envelope was addressed to.
pub fn normalize_live(surgery: &LiveSurgery, operator: &str) -> Session {
    let usage_entries = surgery
        .instrument_usage()
        .into_iter()
        .map(|(name, usage)| UsageEntry {
            name: name.trim().to_string(),
            duration_minutes: usage.duration.as_ref().map_or(0.0, LooseNumber::as_f64),
            image_ref: non_empty(usage.image.as_deref()),
        })
        .collect();

    Session {
        id: None,
        procedure_name: surgery.procedure_name.trim().to_string(),
        operator_name: operator.to_string(),
        operator_image: non_empty(surgery.surgeon_image.as_deref()),
        start_date: surgery.date.trim().to_string(),
        start_time: surgery.time.trim().to_string(),
        started_at: combine_timestamp(&surgery.date, &surgery.time),
        duration_minutes: surgery.duration.as_ref().map_or(0.0, LooseNumber::as_f64),
        usage_entries,
        clutch_entries: scalar_clutch(surgery.clutch_count.as_ref()).into_iter().collect(),
        is_live: true,
        patient_info: non_empty(surgery.patient_info.as_deref()),
        created_at: None,
    }
}

/// Pair comma-joined names with durations and images by index.
pub fn usage_from_lists(
    names: Option<&str>,
    durations: Option<&str>,
    images: Option<&str>,
) -> Vec<UsageEntry> {
    let durations = split_list(durations);
    let images = split_list(images);

    split_list(names)
        .into_iter()
        .enumerate()
        .map(|(i, name)| UsageEntry {
            name: name.to_string(),
            duration_minutes: durations.get(i).map_or(0.0, |d| parse_minutes(d)),
            image_ref: images
                .get(i)
                .filter(|img| !img.is_empty())
                .map(|img| img.to_string()),
        })
        .collect()
}

/// Pair comma-joined accessory names with counts by index.
pub fn clutches_from_lists(names: Option<&str>, counts: Option<&str>) -> Vec<ClutchEntry> {
    let counts = split_list(counts);

    split_list(names)
        .into_iter()
        .enumerate()
        .map(|(i, name)| ClutchEntry {
            name: name.to_string(),
            count: counts.get(i).map_or(0, |c| parse_count(c)),
        })
        .collect()
}

/// Split on `,` and trim each element. An absent or blank field is an empty list.
pub fn split_list(value: Option<&str>) -> Vec<&str> {
    match value {
        Some(v) if !v.trim().is_empty() => v.split(',').map(str::trim).collect(),
        _ => Vec::new(),
    }
}

/// Combine `YYYY-MM-DD` with `HH:MM[:SS]` into one orderable instant.
pub fn combine_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?;
    let time = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time.trim(), fmt).ok())?;
    Some(date.and_time(time))
}

fn parse_minutes(value: &str) -> f64 {
    LooseNumber::Text(value.to_string()).as_f64()
}

fn parse_count(value: &str) -> u32 {
    LooseNumber::Text(value.to_string()).as_u32()
}

fn scalar_clutch(count: Option<&LooseNumber>) -> Option<ClutchEntry> {
    count.map(|c| ClutchEntry {
        name: CLUTCH_PEDAL.to_string(),
        count: c.as_u32(),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
