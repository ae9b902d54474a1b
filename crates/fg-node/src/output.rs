//! Output formatting for CLI results
//!
//! Three output formats:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use fg_proto::v1::{AdvertisementV1, MessageV1};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for scripting
    Json,
    /// Minimal output - exit codes only
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }

    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            ..Self::success(data)
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

/// What `generate` and `whoami` report about the local identity
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub fingerprint: String,
    pub public_key: String,
    pub keys_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Format an inbox listing
    pub fn format_messages(&self, messages: &[MessageV1], command: &str) -> String {
        match self.format {
            OutputFormat::Table => self.messages_table(messages),
            OutputFormat::Json => {
                let output: Vec<MessageJson> = messages.iter().map(MessageJson::from).collect();
                self.to_json_response(&output, command)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format a single message with its full body
    pub fn format_message(&self, message: &MessageV1) -> String {
        match self.format {
            OutputFormat::Table => self.message_table(message),
            OutputFormat::Json => self.to_json_response(&MessageJson::from(message), "inbox --id"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_identity(&self, identity: &IdentitySummary, command: &str) -> String {
        match self.format {
            OutputFormat::Table => self.identity_table(identity),
            OutputFormat::Json => self.to_json_response(identity, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_advert(&self, advert: &AdvertisementV1) -> String {
        match self.format {
            OutputFormat::Table => self.advert_table(advert),
            OutputFormat::Json => self.to_json_response(advert, "lookup"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format a generic success result; tables report through [`success`](Self::success)
    pub fn format_success<T: Serialize>(&self, data: &T, command: &str) -> String {
        match self.format {
            OutputFormat::Json => self.to_json_response(data, command),
            OutputFormat::Table | OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (only shown in verbose mode)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("✗ {message}"),
            OutputFormat::Json => self.to_json(&JsonResponse::<()>::error(message)),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Report a failed command: tables to stderr, JSON to stdout
    pub fn error(&self, message: &str) {
        let output = self.format_error(message);
        match self.format {
            OutputFormat::Table => eprintln!("{output}"),
            OutputFormat::Json => println!("{output}"),
            OutputFormat::Quiet => {}
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        self.to_json(&JsonResponse::success_with_command(value, command))
    }

    fn messages_table(&self, messages: &[MessageV1]) -> String {
        if messages.is_empty() {
            return "No messages.".to_string();
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["ID", "From", "To", "Received", "Message"]);
        for m in messages {
            table.add_row(vec![
                m.id.to_string(),
                short(m.sender.as_str()),
                m.receiver
                    .as_ref()
                    .map(|r| short(r.as_str()))
                    .unwrap_or_else(|| "*".to_string()),
                format_time(m.received_at),
                preview(&m.payload),
            ]);
        }
        table.to_string()
    }

    fn message_table(&self, message: &MessageV1) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Property", "Value"]);
        table.add_row(vec!["ID", &message.id.to_string()]);
        table.add_row(vec!["From", message.sender.as_str()]);
        table.add_row(vec![
            "To",
            message.receiver.as_ref().map(|r| r.as_str()).unwrap_or("broadcast"),
        ]);
        table.add_row(vec!["Received", &format_time(message.received_at)]);
        table.add_row(vec!["Message", &String::from_utf8_lossy(&message.payload)]);
        table.to_string()
    }

    fn identity_table(&self, identity: &IdentitySummary) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Property", "Value"]);
        table.add_row(vec!["Fingerprint", &identity.fingerprint]);
        table.add_row(vec!["Public Key", &identity.public_key]);
        table.add_row(vec!["Keys", &identity.keys_path]);
        if let Some(url) = &identity.profile_url {
            table.add_row(vec!["Profile", url]);
        }
        table.to_string()
    }

    fn advert_table(&self, advert: &AdvertisementV1) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Property", "Value"]);
        table.add_row(vec!["Fingerprint", advert.fingerprint.as_str()]);
        table.add_row(vec!["Advertised", &format_time(advert.timestamp)]);
        table.add_row(vec!["Received", &format_time(advert.received_at)]);
        for (key, value) in &advert.capabilities {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            table.add_row(vec![key.as_str(), &value]);
        }
        table.to_string()
    }
}

fn short(fingerprint: &str) -> String {
    fingerprint.chars().take(16).collect()
}

fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_end();
    let mut line: String = text.lines().next().unwrap_or("").chars().take(60).collect();
    if line.len() < text.len() {
        line.push('…');
    }
    line
}

fn format_time(unix_secs: u64) -> String {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}

fn format_time_iso(unix_secs: u64) -> Option<String> {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
}

// JSON output structures

#[derive(Serialize)]
struct MessageJson {
    id: u64,
    sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver: Option<String>,
    /// Body as text; non-UTF-8 bytes are replaced
    message: String,
    received_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    received_at_iso: Option<String>,
}

impl From<&MessageV1> for MessageJson {
    fn from(m: &MessageV1) -> Self {
        Self {
            id: m.id,
            sender: m.sender.to_string(),
            receiver: m.receiver.as_ref().map(|r| r.to_string()),
            message: String::from_utf8_lossy(&m.payload).into_owned(),
            received_at: m.received_at,
            received_at_iso: format_time_iso(m.received_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_proto::v1::Fingerprint;

    fn message(id: u64, receiver: Option<u8>, payload: &[u8]) -> MessageV1 {
        MessageV1 {
            id,
            sender: Fingerprint::from([1u8; 32]),
            receiver: receiver.map(|b| Fingerprint::from([b; 32])),
            payload: payload.to_vec(),
            received_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("quiet").unwrap(), OutputFormat::Quiet);
        assert!(OutputFormat::from_str("yaml").is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_json_response_shape() {
        let response = JsonResponse::success_with_command(42u64, "send");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], 42);
        assert_eq!(value["command"], "send");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_output() {
        let json = OutputFormatter::new(OutputFormat::Json, false).format_error("boom");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "boom");
        assert!(value.get("data").is_none());

        let table = OutputFormatter::new(OutputFormat::Table, false).format_error("boom");
        assert_eq!(table, "✗ boom");
        assert_eq!(OutputFormatter::new(OutputFormat::Quiet, false).format_error("boom"), "");
    }

    #[test]
    fn test_preview_marks_only_cut_text() {
        assert_eq!(preview(b"abc\n"), "abc");
        assert_eq!(preview(b"abc\r\n\n"), "abc");
        assert_eq!(preview(b"abc\ndef"), "abc…");
        let long = "x".repeat(61);
        assert_eq!(preview(long.as_bytes()), format!("{}…", "x".repeat(60)));
        assert_eq!(preview("é".repeat(10).as_bytes()), "é".repeat(10));
    }

    #[test]
    fn test_messages_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let output = formatter.format_messages(&[message(3, None, b"hello"), message(4, Some(2), b"hi")], "inbox");
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        let data = value["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["id"], 3);
        assert_eq!(data[0]["message"], "hello");
        assert!(data[0].get("receiver").is_none());
        assert_eq!(data[1]["receiver"], Fingerprint::from([2u8; 32]).to_string());
        assert_eq!(data[1]["received_at_iso"], "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_messages_table() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        assert_eq!(formatter.format_messages(&[], "inbox"), "No messages.");

        let output = formatter.format_messages(&[message(7, None, b"line one\nline two")], "inbox");
        assert!(output.contains("line one…"));
        assert!(!output.contains("line two"));
        assert!(output.contains("2023-11-14 22:13:20 UTC"));
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, true);
        assert_eq!(formatter.format_messages(&[message(1, None, b"x")], "inbox"), "");
        assert_eq!(formatter.format_message(&message(1, None, b"x")), "");
        assert_eq!(formatter.format_success(&1u64, "send"), "");
    }

    #[test]
    fn test_identity_table_has_profile() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let summary = IdentitySummary {
            fingerprint: "ab".repeat(32),
            public_key: "cd".repeat(32),
            keys_path: "/etc/fieldgrid/".to_string(),
            profile_url: Some("http://127.0.0.1:8666/v1/units/abab".to_string()),
        };
        let output = formatter.format_identity(&summary, "whoami");
        assert!(output.contains(&"ab".repeat(32)));
        assert!(output.contains("/v1/units/abab"));
    }
}
