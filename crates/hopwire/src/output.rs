use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hopwire_route::{JsonCodec, Message, MessageCodec};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Serialize)]
struct MessageOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    fields: &'a BTreeMap<String, String>,
    received_on: Option<String>,
    timestamp: String,
}

/// Print one message that reached this node.
pub fn print_message(message: &Message, format: OutputFormat) {
    let received_on = message.meta.received_on.map(|code| code.encode());
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                msg_type: &message.msg_type,
                fields: &message.fields,
                received_on,
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
                .set_header(vec!["TYPE", "FROM", "FIELD", "VALUE"]);
            let from = received_on.unwrap_or_else(|| "-".to_string());
            if message.fields.is_empty() {
                table.add_row(vec![message.msg_type.as_str(), from.as_str(), "", ""]);
            }
            for (index, (name, value)) in message.fields.iter().enumerate() {
                let (msg_type, from) = if index == 0 {
                    (message.msg_type.as_str(), from.as_str())
                } else {
                    ("", "")
                };
                table.add_row(vec![msg_type, from, name.as_str(), value.as_str()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let fields: Vec<String> = message
                .fields
                .iter()
                .map(|(name, value)| format!("{name}={value:?}"))
                .collect();
            println!(
                "type={} from={} {}",
                message.msg_type,
                received_on.as_deref().unwrap_or("-"),
                fields.join(" ")
            );
        }
        OutputFormat::Raw => match JsonCodec.encode(message) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                print_raw(&bytes);
            }
            Err(err) => tracing::warn!(error = %err, "message could not be encoded for output"),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
