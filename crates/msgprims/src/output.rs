use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What kind of traffic a printed record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Application data.
    Message,
    /// A callback reply to something we sent.
    Reply,
    /// The opening payload of a streaming request.
    Request,
    /// One packet of a response stream.
    Packet,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::Reply => "reply",
            RecordKind::Request => "request",
            RecordKind::Packet => "packet",
        }
    }
}

#[derive(Serialize)]
struct RecordOutput<'a> {
    kind: RecordKind,
    peer: &'a str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    type_name: Option<&'a str>,
    data: &'a Value,
    timestamp: String,
}

pub fn print_record(
    kind: RecordKind,
    peer: &str,
    type_name: Option<&str>,
    data: &Value,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = RecordOutput {
                kind,
                peer,
                type_name,
                data,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "PEER", "TYPE", "DATA"])
                .add_row(vec![
                    kind.as_str().to_string(),
                    peer.to_string(),
                    type_name.unwrap_or("-").to_string(),
                    data.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "kind={} peer={} type={} data={}",
                kind.as_str(),
                peer,
                type_name.unwrap_or("-"),
                data
            );
        }
        OutputFormat::Raw => print_raw(data),
    }
}

/// Strings print as their content, anything else as compact JSON.
pub fn print_raw(data: &Value) {
    let mut out = std::io::stdout();
    let _ = match data {
        Value::String(text) => writeln!(out, "{text}"),
        other => writeln!(out, "{other}"),
    };
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
