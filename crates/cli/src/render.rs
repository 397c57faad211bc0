//! Terminal rendering for views and session lists.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use misso_protocol::{Session, SyncPhase};
use misso_sync::SyncView;

pub fn format_minutes(minutes: f64) -> String {
    if minutes <= 0.0 {
        return "-".to_string();
    }
    let total_seconds = (minutes * 60.0).round() as u64;
    let (h, m, s) = (total_seconds / 3600, total_seconds / 60 % 60, total_seconds % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if s > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{m}m")
    }
}

fn started(session: &Session) -> String {
    match session.started_at {
        Some(at) => at.format("%Y-%m-%d %H:%M").to_string(),
        None => format!("{} {}", session.start_date, session.start_time)
            .trim()
            .to_string(),
    }
}

pub fn session_table(sessions: &[Session]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "ID",
            "Started",
            "Procedure",
            "Duration",
            "Instruments",
            "Clutch",
        ]);

    for session in sessions {
        let id = match session.id {
            Some(id) => id.to_string(),
            None => "live".to_string(),
        };
        table.add_row(vec![
            id,
            started(session),
            session.procedure_name.clone(),
            format_minutes(session.duration_minutes),
            session.usage_entries.len().to_string(),
            session.total_clutch_count().to_string(),
        ]);
    }
    table
}

fn status_line(view: &SyncView) -> String {
    let phase = match view.phase {
        SyncPhase::Live => style("LIVE").green().bold(),
        SyncPhase::Loading => style("LOADING").yellow(),
        SyncPhase::Idle => style("IDLE").dim(),
        SyncPhase::Uninitialized => style("STARTING").dim(),
    };
    let link = if view.connected {
        style("stream connected").green()
    } else {
        style("stream offline").red()
    };
    let operator = view.operator.as_deref().unwrap_or("-");
    format!("{phase}  {}  {link}", style(operator).bold())
}

/// Full-screen rendering used by `watch`.
pub fn view_block(view: &SyncView) -> String {
    let mut out = String::new();
    out.push_str(&status_line(view));
    out.push('\n');
    if let Some(error) = &view.last_error {
        out.push_str(&format!("{} {error}\n", style("last fetch failed:").red()));
    }
    out.push('\n');

    let Some(session) = &view.current_display else {
        out.push_str(&format!("{}\n", style("No sessions yet").dim()));
        return out;
    };

    let marker = if session.is_live {
        style("● in progress").green().to_string()
    } else {
        style("recorded").dim().to_string()
    };
    out.push_str(&format!(
        "{}  {marker}\n",
        style(&session.procedure_name).bold()
    ));
    out.push_str(&format!(
        "Started {}   Duration {}\n",
        started(session),
        format_minutes(session.duration_minutes)
    ));
    if let Some(info) = &session.patient_info {
        out.push_str(&format!("Patient {info}\n"));
    }

    if !session.usage_entries.is_empty() {
        let mut usage = Table::new();
        usage
            .load_preset(UTF8_FULL)
            .set_header(vec!["Instrument", "Time"]);
        for entry in &session.usage_entries {
            usage.add_row(vec![
                entry.name.clone(),
                format_minutes(entry.duration_minutes),
            ]);
        }
        out.push('\n');
        out.push_str(&usage.to_string());
        out.push('\n');
    }

    for clutch in &session.clutch_entries {
        out.push_str(&format!("{}: {}\n", clutch.name, clutch.count));
    }

    out.push_str(&format!(
        "\n{} earlier sessions\n",
        style(view.history.len()).bold()
    ));
    out
}
