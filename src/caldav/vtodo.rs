//! VTODO rendering, parsing and ETags.

use crate::types::Task;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use icalendar::{Calendar, CalendarComponent, Component};
use md5::{Digest, Md5};
use thiserror::Error;

pub const PRODID: &str = "-//Task Wizard//Task Wizard//EN";
/// iCalendar UTC date-time form (`20240401T090000Z`).
pub const ICAL_UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";
/// Longest content line in octets, excluding the CRLF.
const MAX_LINE_OCTETS: usize = 75;

#[derive(Debug, Error)]
pub enum VtodoError {
    #[error("invalid calendar data: {0}")]
    Parse(String),
    #[error("calendar data has no VTODO component")]
    NoTodo,
}

/// Fields a client may change through PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtodoUpdate {
    pub summary: Option<String>,
    pub due: Option<DateTime<Utc>>,
}

pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format(ICAL_UTC_FORMAT).to_string()
}

/// Escape a TEXT value: line breaks are dropped, then `\`, `;` and `,` are escaped.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\r' | '\n' => {}
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape_text`]. Unknown sequences are left as they are.
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next @ ('\\' | ';' | ',')) => {
                out.push(next);
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Quoted MD5 of `<modified_at as unix ms>;<sorted label ids joined by ';'>`.
///
/// Milliseconds rather than the `YYYYMMDDTHHMMSSZ` stamp, so two writes inside
/// the same second still yield different tags.
pub fn etag(task: &Task) -> String {
    let mut ids = task.label_ids();
    ids.sort_unstable();
    let mut base = task.modified_at().timestamp_millis().to_string();
    base.push(';');
    base.push_str(
        &ids.iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(";"),
    );
    format!("\"{:x}\"", Md5::digest(base.as_bytes()))
}

/// Render the task as a complete VCALENDAR holding one VTODO.
pub fn render(task: &Task) -> String {
    let stamp = format_utc(task.modified_at());
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "BEGIN:VTODO".to_string(),
        format!("CREATED:{}", stamp),
        format!("LAST-MODIFIED:{}", stamp),
        format!("DTSTAMP:{}", stamp),
        format!("UID:{}", task.id),
        format!("SUMMARY:{}", escape_text(&task.title)),
    ];
    if let Some(due) = task.next_due_date {
        lines.push(format!("DUE:{}", format_utc(due)));
    }
    if !task.labels.is_empty() {
        let names: Vec<String> = task.labels.iter().map(|l| escape_text(&l.name)).collect();
        lines.push(format!("CATEGORIES:{}", names.join(",")));
    }
    lines.push("PERCENT-COMPLETE:0".to_string());
    lines.push("END:VTODO".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        fold_line(line, &mut out);
    }
    out
}

/// Append `line` folded to 75-octet content lines, continuations starting
/// with a single space. Splits never land inside a UTF-8 sequence.
fn fold_line(line: &str, out: &mut String) {
    let mut budget = MAX_LINE_OCTETS;
    let mut used = 0;
    for c in line.chars() {
        let width = c.len_utf8();
        if used + width > budget {
            out.push_str("\r\n ");
            // the leading space counts against the continuation line
            budget = MAX_LINE_OCTETS - 1;
            used = 0;
        }
        out.push(c);
        used += width;
    }
    out.push_str("\r\n");
}

/// `YYYYMMDD` (midnight UTC) or `YYYYMMDDTHHMMSSZ`; anything else is no date.
pub fn parse_due(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
    }
    NaiveDateTime::parse_from_str(value, ICAL_UTC_FORMAT)
        .ok()
        .map(|d| d.and_utc())
}

/// Pull SUMMARY and DUE out of the first VTODO in `body`.
pub fn parse(body: &str) -> Result<VtodoUpdate, VtodoError> {
    let calendar: Calendar = body
        .parse()
        .map_err(|e| VtodoError::Parse(format!("{}", e)))?;
    let todo = calendar
        .components
        .iter()
        .find_map(|c| match c {
            CalendarComponent::Todo(t) => Some(t),
            _ => None,
        })
        .ok_or(VtodoError::NoTodo)?;

    let props = todo.properties();
    let summary = props.get("SUMMARY").map(|p| unescape_text(p.value()));
    let due = props.get("DUE").and_then(|p| parse_due(p.value()));
    Ok(VtodoUpdate { summary, due })
}
