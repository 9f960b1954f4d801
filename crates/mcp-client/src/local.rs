//! In-process local tools provider.
//!
//! Answers a few clock/date queries without any network call, behind the
//! same [`ToolClient`] seam as a remote MCP server. The manager treats
//! it uniformly, except that reconciliation never removes it.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use crate::client::{ConnectionState, McpError, ToolClient};
use crate::protocol::{McpToolDef, ToolCallContent, ToolCallResult};

/// Identity key of the local provider (a non-routable scheme, so it can
/// never collide with a configured server URL).
pub const LOCAL_TOOLS_KEY: &str = "local://datetime";

/// Local clock/date tools. Always connected; `disconnect` is a no-op.
pub struct LocalToolsClient {
    tools: Vec<McpToolDef>,
}

impl Default for LocalToolsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalToolsClient {
    pub fn new() -> Self {
        let tools = vec![
            McpToolDef {
                name: "get_current_time_only".into(),
                description: "Get ONLY the current time (e.g., '2:30 PM'). \
                              Use when the user asks 'What time is it?'."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "timezone": timezone_property() }
                }),
            },
            McpToolDef {
                name: "get_current_date_only".into(),
                description: "Get ONLY the current date (e.g., 'Monday, January 1, 2024'). \
                              Use when the user asks 'What day is it?'."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "timezone": timezone_property() }
                }),
            },
            McpToolDef {
                name: "get_current_datetime".into(),
                description: "Get the full current date and time. \
                              Use for 'What is the date and time?'."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "timezone": timezone_property() }
                }),
            },
            McpToolDef {
                name: "get_relative_time".into(),
                description: "Calculate the relative time from now to a specific date \
                              (e.g. 'in 2 days', '5 minutes ago')."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "date": {
                            "type": "string",
                            "description": "Target date (RFC 3339 or YYYY-MM-DD)"
                        }
                    },
                    "required": ["date"]
                }),
            },
        ];
        Self { tools }
    }

    fn execute(&self, name: &str, args: &Value) -> Result<ToolCallResult, McpError> {
        match name {
            "get_current_time_only" | "get_current_date_only" | "get_current_datetime" => {
                let tz = match resolve_timezone(args) {
                    Ok(tz) => tz,
                    Err(message) => return Ok(error_result(&message)),
                };
                let now = Utc::now().with_timezone(&tz);
                let (kind, formatted) = match name {
                    "get_current_time_only" => ("time_only", now.format("%-I:%M:%S %p %Z")),
                    "get_current_date_only" => ("date_only", now.format("%A, %B %-d, %Y")),
                    _ => ("datetime", now.format("%A, %B %-d, %Y, %-I:%M:%S %p %Z")),
                };
                let mut payload = serde_json::Map::new();
                payload.insert(kind.into(), Value::String(formatted.to_string()));
                payload.insert("timezone".into(), Value::String(tz.name().into()));
                Ok(text_result(&Value::Object(payload)))
            }
            "get_relative_time" => {
                let raw = match args.get("date").and_then(Value::as_str) {
                    Some(raw) => raw,
                    None => return Ok(error_result("missing required argument: date")),
                };
                let target = match parse_date(raw) {
                    Some(target) => target,
                    None => return Ok(error_result(&format!("invalid date format: {raw}"))),
                };
                let now = Utc::now();
                let diff = target.signed_duration_since(now);
                Ok(text_result(&json!({
                    "target": target.to_rfc3339(),
                    "relative": humanize(diff),
                    "diff_milliseconds": diff.num_milliseconds(),
                })))
            }
            other => Err(McpError::ToolNotFound(other.to_string())),
        }
    }
}

#[async_trait]
impl ToolClient for LocalToolsClient {
    fn key(&self) -> &str {
        LOCAL_TOOLS_KEY
    }

    async fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    async fn tools(&self) -> Vec<McpToolDef> {
        self.tools.clone()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        tracing::debug!(tool = name, "executing local tool");
        self.execute(name, &arguments)
    }

    async fn disconnect(&self) {}
}

fn timezone_property() -> Value {
    json!({
        "type": "string",
        "description": "IANA timezone identifier. Defaults to UTC."
    })
}

fn resolve_timezone(args: &Value) -> Result<Tz, String> {
    match args.get("timezone").and_then(Value::as_str) {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| format!("unknown timezone: {name}")),
        None => Ok(chrono_tz::UTC),
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(DateTime::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0)?,
            Utc,
        ));
    }
    None
}

/// Render a signed duration the way a person would say it, rounding to
/// the coarsest non-zero unit.
fn humanize(diff: chrono::Duration) -> String {
    let seconds = (diff.num_milliseconds() as f64 / 1000.0).round() as i64;
    let minutes = (seconds as f64 / 60.0).round() as i64;
    let hours = (minutes as f64 / 60.0).round() as i64;
    let days = (hours as f64 / 24.0).round() as i64;

    let (value, unit) = if days != 0 {
        (days, "day")
    } else if hours != 0 {
        (hours, "hour")
    } else if minutes != 0 {
        (minutes, "minute")
    } else if seconds != 0 {
        (seconds, "second")
    } else {
        return "now".into();
    };

    let magnitude = value.unsigned_abs();
    let plural = if magnitude == 1 { "" } else { "s" };
    if value > 0 {
        format!("in {magnitude} {unit}{plural}")
    } else {
        format!("{magnitude} {unit}{plural} ago")
    }
}

fn text_result(payload: &Value) -> ToolCallResult {
    ToolCallResult {
        content: vec![ToolCallContent::text(payload.to_string())],
        is_error: false,
    }
}

fn error_result(message: &str) -> ToolCallResult {
    ToolCallResult {
        content: vec![ToolCallContent::text(
            json!({ "error": message }).to_string(),
        )],
        is_error: true,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
