use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tonelink::sim::AmpActivity;
use tonelink_control::ControlEvent;
use tonelink_registry::{Parameter, Registry};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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
struct ParamOutput<'a> {
    key: &'a str,
    label: &'a str,
    address: Option<String>,
    min: u8,
    max: u8,
    default: u8,
    #[serde(skip_serializing_if = "no_labels")]
    labels: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
}

fn no_labels(labels: &&[String]) -> bool {
    labels.is_empty()
}

fn mode_text(param: &Parameter) -> Option<String> {
    param
        .mode()
        .map(|gate| format!("{}={}", gate.selector, gate.value))
}

pub fn print_params(registry: &Registry, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = registry
                .iter()
                .map(|p| ParamOutput {
                    key: p.key(),
                    label: p.label(),
                    address: p.address().map(|a| a.to_string()),
                    min: p.range().min,
                    max: p.range().max,
                    default: p.default_value(),
                    labels: p.labels(),
                    mode: mode_text(p),
                })
                .collect();
            print_json(&rows);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "LABEL", "ADDRESS", "RANGE", "DEFAULT", "MODE"]);
            for p in registry.iter() {
                table.add_row(vec![
                    p.key().to_string(),
                    p.label().to_string(),
                    p.address()
                        .map_or_else(|| "virtual".to_string(), |a| a.to_string()),
                    format!("{}..={}", p.range().min, p.range().max),
                    display_value(p, p.default_value()),
                    mode_text(p).unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for p in registry.iter() {
                let address = p
                    .address()
                    .map_or_else(|| "virtual".to_string(), |a| a.to_string());
                println!(
                    "{} [{}] {}..={} default={}",
                    p.key(),
                    address,
                    p.range().min,
                    p.range().max,
                    display_value(p, p.default_value())
                );
            }
        }
    }
}

/// One parameter value as reported by the amp.
#[derive(Serialize)]
pub struct ValueRow {
    pub key: String,
    pub value: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ValueRow {
    pub fn new(param: &Parameter, value: u8) -> Self {
        Self {
            key: param.key().to_string(),
            value,
            label: param.label_for(value).map(str::to_string),
        }
    }
}

pub fn print_values(rows: &[ValueRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "VALUE"]);
            for row in rows {
                table.add_row(vec![row.key.clone(), row_value(row)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!("{}={}", row.key, row_value(row));
            }
        }
    }
}

/// Events stream one per line; tables would need the whole set up front.
pub fn print_event(event: &ControlEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table | OutputFormat::Pretty => println!("{}", event_line(event)),
    }
}

fn event_line(event: &ControlEvent) -> String {
    match event {
        ControlEvent::ValueUpdate {
            key,
            value,
            spontaneous,
        } => {
            let source = if *spontaneous { "amp" } else { "tonelink" };
            format!("{:<10}{key}={value} ({source})", "value")
        }
        ControlEvent::PedalPosition { key, value } => format!("{:<10}{key} at {value}", "pedal"),
        ControlEvent::SelectionChanged { key } => format!("{:<10}{key}", "selected"),
        ControlEvent::ConnectionState { link, connected } => {
            let state = if *connected { "connected" } else { "disconnected" };
            format!("{:<10}{link} {state}", "link")
        }
        ControlEvent::Log { message, severity } => {
            format!("{:<10}{message}", format!("{severity:?}").to_lowercase())
        }
    }
}

#[derive(Serialize)]
struct ActivityOutput<'a> {
    op: &'a str,
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u8>,
}

pub fn print_activity(activity: &AmpActivity, format: OutputFormat) {
    let out = match activity {
        AmpActivity::Read {
            address,
            key,
            value,
        } => ActivityOutput {
            op: "read",
            address: address.to_string(),
            key: key.as_deref(),
            value: *value,
        },
        AmpActivity::Write {
            address,
            key,
            value,
        } => ActivityOutput {
            op: "write",
            address: address.to_string(),
            key: key.as_deref(),
            value: Some(*value),
        },
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "{:<6}{} {}{}",
            out.op,
            out.address,
            out.key.unwrap_or("?"),
            out.value.map(|v| format!("={v}")).unwrap_or_default()
        ),
    }
}

fn display_value(param: &Parameter, value: u8) -> String {
    match param.label_for(value) {
        Some(label) => format!("{value} ({label})"),
        None => value.to_string(),
    }
}

fn row_value(row: &ValueRow) -> String {
    match &row.label {
        Some(label) => format!("{} ({label})", row.value),
        None => row.value.to_string(),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
