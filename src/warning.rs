//! Warning records and their wire rendering.
//!
//! A [`WarningRecord`] is the rendered text of one deprecation event. Rendering
//! happens at emission time, so records never hold deferred arguments.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// HTTP warn-code for "Miscellaneous persistent warning" (RFC 7234 5.5).
pub const WARN_CODE_PERSISTENT: u16 = 299;

/// One deprecation event, already rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarningRecord {
    text: String,
}

impl WarningRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Render this record as a header value in the given format.
    ///
    /// Control characters are escaped, so one record is always one header line.
    pub fn header_value(&self, format: WarningFormat, agent: &str) -> String {
        let text = escape_controls(&self.text);
        match format {
            WarningFormat::Plain => text,
            WarningFormat::Rfc7234 => format!(
                "{} {} \"{}\" \"{}\"",
                WARN_CODE_PERSISTENT,
                agent,
                escape_quoted(&text),
                format_http_date(&Utc::now())
            ),
        }
    }
}

impl fmt::Display for WarningRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How a record is laid out in a `Warning` header value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningFormat {
    /// The header value is the rendered text as-is.
    #[default]
    Plain,
    /// `299 <agent> "<text>" "<HTTP-date>"`
    Rfc7234,
}

/// Substitute each `{}` in `template` with the next argument.
///
/// Placeholders without a matching argument are kept verbatim and surplus
/// arguments are ignored. `\{}` produces a literal `{}`.
pub fn render_template(template: &str, args: &[&dyn fmt::Display]) -> String {
    let mut out = String::with_capacity(template.len() + args.len() * 8);
    let mut args = args.iter();
    let mut rest = template;

    while let Some(pos) = rest.find("{}") {
        let (before, after) = rest.split_at(pos);
        if let Some(stripped) = before.strip_suffix('\\') {
            out.push_str(stripped);
            out.push_str("{}");
        } else {
            out.push_str(before);
            match args.next() {
                Some(arg) => out.push_str(&arg.to_string()),
                None => out.push_str("{}"),
            }
        }
        rest = &after[2..];
    }
    out.push_str(rest);
    out
}

/// Recover the message text from a `Warning` header value in either format.
pub fn parse_warning_value(value: &str) -> String {
    static RFC7234: OnceLock<Regex> = OnceLock::new();
    let re = RFC7234.get_or_init(|| {
        Regex::new(r#"^\d{3} \S+ "((?:[^"\\]|\\.)*)"(?: "[^"]*")?$"#)
            .unwrap_or_else(|e| panic!("static warning pattern is invalid: {e}"))
    });

    match re.captures(value).and_then(|c| c.get(1)) {
        Some(m) => unescape_quoted(m.as_str()),
        None => value.to_string(),
    }
}

fn escape_controls(text: &str) -> String {
    if !text.chars().any(char::is_control) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Format a datetime as an HTTP date (RFC 7231).
/// Example: Sun, 06 Nov 1994 08:49:37 GMT
pub(crate) fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
