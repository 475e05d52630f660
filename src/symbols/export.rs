//! Symbol table export formats

use super::Symbol;
use crate::core::types::{MemoryError, MemoryResult};
use serde::Serialize;
use std::fmt::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ExportFormat::Text),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(MemoryError::InvalidArgument(format!(
                "unsupported export format: {}",
                other
            ))),
        }
    }
}

/// Renders `symbols` (already ordered by address)
pub fn render<'a>(symbols: impl IntoIterator<Item = &'a Symbol>, format: ExportFormat) -> MemoryResult<String> {
    match format {
        ExportFormat::Text => Ok(text(symbols)),
        ExportFormat::Csv => Ok(csv(symbols)),
        ExportFormat::Json => json(symbols),
    }
}

fn text<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Symbol Table:");
    let _ = writeln!(out, "{}", "=".repeat(72));
    let _ = writeln!(out, "{:<18} {:<30} {:<20} Type", "Address", "Name", "Module");
    let _ = writeln!(out, "{}", "-".repeat(72));
    for symbol in symbols {
        let _ = writeln!(
            out,
            "0x{:016X} {:<30} {:<20} {}",
            symbol.address.as_usize(),
            symbol.name,
            symbol.module,
            symbol.kind
        );
    }
    out
}

fn csv<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> String {
    let mut out = String::from("Address,Name,Module,Type,Size,File,Line\n");
    for symbol in symbols {
        let _ = writeln!(
            out,
            "0x{:X},{},{},{},{},{},{}",
            symbol.address.as_usize(),
            csv_field(&symbol.name),
            csv_field(&symbol.module),
            symbol.kind,
            symbol.size.map(|s| s.to_string()).unwrap_or_default(),
            symbol.file.as_deref().map(csv_field).unwrap_or_default(),
            symbol.line.map(|l| l.to_string()).unwrap_or_default(),
        );
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[derive(Serialize)]
struct JsonSymbol<'a> {
    address: String,
    name: &'a str,
    module: &'a str,
    #[serde(rename = "type")]
    kind: String,
    size: Option<usize>,
    file: Option<&'a str>,
    line: Option<u32>,
}

fn json<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> MemoryResult<String> {
    let rows: Vec<JsonSymbol<'_>> = symbols
        .into_iter()
        .map(|s| JsonSymbol {
            address: format!("0x{:X}", s.address.as_usize()),
            name: &s.name,
            module: &s.module,
            kind: s.kind.to_string(),
            size: s.size,
            file: s.file.as_deref(),
            line: s.line,
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Address;
    use crate::symbols::SymbolKind;

    fn sample() -> Vec<Symbol> {
        vec![
            Symbol::new("Init", Address::new(0x401000), SymbolKind::Function, "game.exe").with_size(0x20),
            Symbol::new("g_state,main", Address::new(0x402000), SymbolKind::Global, "game.exe"),
        ]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_csv_quotes_commas() {
        let out = render(&sample(), ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Address,Name,Module,Type,Size,File,Line");
        assert_eq!(lines[1], "0x401000,Init,game.exe,function,32,,");
        assert_eq!(lines[2], "0x402000,\"g_state,main\",game.exe,global,,,");
    }

    #[test]
    fn test_json_rows() {
        let out = render(&sample(), ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["name"], "Init");
        assert_eq!(parsed[0]["address"], "0x401000");
        assert_eq!(parsed[1]["type"], "global");
        assert!(parsed[1]["size"].is_null());
    }

    #[test]
    fn test_text_lists_every_symbol() {
        let out = render(&sample(), ExportFormat::Text).unwrap();
        assert!(out.starts_with("Symbol Table:"));
        assert!(out.contains("Init"));
        assert_eq!(out.lines().count(), 4 + 2);
    }
}
