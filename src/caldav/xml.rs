//! WebDAV multistatus rendering and multiget request parsing.

use chrono::{DateTime, Utc};
use http::StatusCode;
use regex_lite::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

pub const COLLECTION_HREF: &str = "/dav/tasks/";
pub const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
pub const CTAG_PREFIX: &str = "http://sabre.io/ns/sync/";

const NAMESPACES: &str = concat!(
    r#"xmlns:d="DAV:" "#,
    r#"xmlns:cal="urn:ietf:params:xml:ns:caldav" "#,
    r#"xmlns:cs="http://calendarserver.org/ns/" "#,
    r#"xmlns:s="http://sabredav.org/ns" "#,
    r#"xmlns:x1="http://apple.com/ns/ical/""#,
);

pub fn item_href(task_id: i64) -> String {
    format!("{}{}.ics", COLLECTION_HREF, task_id)
}

/// Collection tag: changes whenever any task, label or deletion watermark moves.
pub fn ctag(last_modified: Option<DateTime<Utc>>) -> String {
    let ms = last_modified.map(|dt| dt.timestamp_millis()).unwrap_or(0);
    format!("{}{}", CTAG_PREFIX, ms)
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Incremental `<d:multistatus>` document.
#[derive(Debug)]
pub struct Multistatus {
    body: String,
}

impl Default for Multistatus {
    fn default() -> Self {
        Self::new()
    }
}

impl Multistatus {
    pub fn new() -> Self {
        let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        body.push('\n');
        let _ = write!(body, "<d:multistatus {}>", NAMESPACES);
        Self { body }
    }

    fn response(&mut self, href: &str, props: &str) {
        let _ = write!(
            self.body,
            "<d:response><d:href>{}</d:href><d:propstat><d:prop>{}</d:prop>\
             <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            escape(href),
            props
        );
    }

    /// The task collection itself.
    pub fn collection(&mut self, display_name: &str, ctag: &str) -> &mut Self {
        let props = format!(
            "<d:resourcetype><d:collection/><cal:calendar/><cs:shared-owner/></d:resourcetype>\
             <d:displayname>{}</d:displayname>\
             <cs:getctag>{}</cs:getctag>\
             <s:sync-token>{}</s:sync-token>\
             <cal:supported-calendar-component-set><cal:comp name=\"VTODO\"/></cal:supported-calendar-component-set>\
             <x1:calendar-order>1</x1:calendar-order>",
            escape(display_name),
            escape(ctag),
            escape(ctag),
        );
        self.response(COLLECTION_HREF, &props);
        self
    }

    /// One task's metadata.
    pub fn item(&mut self, href: &str, etag: &str, content_length: usize) -> &mut Self {
        let props = format!(
            "<d:resourcetype/>\
             <d:getcontenttype>{}; component=vtodo</d:getcontenttype>\
             <d:getetag>{}</d:getetag>\
             <d:getcontentlength>{}</d:getcontentlength>",
            ICS_CONTENT_TYPE,
            escape(etag),
            content_length
        );
        self.response(href, &props);
        self
    }

    /// One task with its calendar body (REPORT answers).
    pub fn calendar_data(&mut self, href: &str, etag: &str, ics: &str) -> &mut Self {
        let props = format!(
            "<d:getetag>{}</d:getetag><cal:calendar-data>{}</cal:calendar-data>",
            escape(etag),
            escape(ics)
        );
        self.response(href, &props);
        self
    }

    /// A member that could not be served.
    pub fn status(&mut self, href: &str, status: StatusCode) -> &mut Self {
        let _ = write!(
            self.body,
            "<d:response><d:href>{}</d:href><d:status>HTTP/1.1 {}</d:status></d:response>",
            escape(href),
            status
        );
        self
    }

    pub fn finish(mut self) -> String {
        self.body.push_str("</d:multistatus>");
        self.body
    }
}

fn href_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(?:[A-Za-z][\w.-]*:)?href\s*>\s*(.*?)\s*</(?:[A-Za-z][\w.-]*:)?href\s*>").ok()
    })
    .as_ref()
}

fn id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|/)(\d+)\.ics$").ok())
        .as_ref()
}

/// True for a `calendar-multiget` REPORT body (anything else lists the whole collection).
pub fn is_multiget(body: &str) -> bool {
    body.contains("calendar-multiget")
}

/// The `<href>` values of a REPORT body, in document order.
pub fn hrefs(body: &str) -> Vec<String> {
    let Some(re) = href_regex() else {
        return Vec::new();
    };
    re.captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Task id named by a `/dav/tasks/{id}.ics` href (absolute URLs and percent-encoding allowed).
pub fn task_id_from_href(href: &str) -> Option<i64> {
    let decoded = urlencoding::decode(href.trim()).ok()?;
    let path = decoded.split(['?', '#']).next().unwrap_or_default();
    id_regex()?
        .captures(path)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse the `{id}.ics` path segment.
pub fn task_id_from_file(file: &str) -> Option<i64> {
    file.strip_suffix(".ics")?.parse().ok()
}
