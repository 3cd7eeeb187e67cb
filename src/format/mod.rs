//! Result tables and the answer payload.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::FormatSettings;
use crate::credential::Credential;
use crate::metadata::DatasourceInfo;
use crate::schema::Query;
use crate::service::Row;

/// Emitted instead of a table when there is nothing to show.
pub const NO_DATA: &str = "No data returned for this query.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Strict mode and the input held no records.
    #[error("query returned no data")]
    NoData,
}

/// How empty input is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatOptions {
    pub strict: bool,
    pub no_data_marker: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            strict: false,
            no_data_marker: NO_DATA.to_string(),
        }
    }
}

impl From<&FormatSettings> for FormatOptions {
    fn from(settings: &FormatSettings) -> Self {
        Self {
            strict: settings.strict,
            no_data_marker: settings.no_data_marker.clone(),
        }
    }
}

impl FormatOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    fn empty(&self) -> Result<String, FormatError> {
        if self.strict {
            Err(FormatError::NoData)
        } else {
            Ok(self.no_data_marker.clone())
        }
    }
}

/// Render rows as a markdown table.
///
/// The header comes from the first record's keys, in order. Later records
/// are read by those keys; a missing key renders as an empty cell.
pub fn format_rows(rows: &[Row], options: &FormatOptions) -> Result<String, FormatError> {
    let Some(first) = rows.first() else {
        return options.empty();
    };
    let columns: Vec<&String> = first.keys().collect();
    if columns.is_empty() {
        return options.empty();
    }

    let mut out = String::new();
    write_line(&mut out, columns.iter().map(|c| escape(c)));
    write_line(&mut out, columns.iter().map(|_| "---".to_string()));
    for row in rows {
        write_line(
            &mut out,
            columns
                .iter()
                .map(|c| row.get(*c).map(cell).unwrap_or_default()),
        );
    }
    Ok(out.trim_end().to_string())
}

/// Render any JSON value; only an array of objects yields a table.
pub fn format_value(value: &Value, options: &FormatOptions) -> Result<String, FormatError> {
    let Some(items) = value.as_array() else {
        return options.empty();
    };
    let rows: Option<Vec<Row>> = items.iter().map(|v| v.as_object().cloned()).collect();
    match rows {
        Some(rows) => format_rows(&rows, options),
        None => options.empty(),
    }
}

fn write_line<I>(out: &mut String, cells: I)
where
    I: Iterator<Item = String>,
{
    out.push('|');
    for c in cells {
        let _ = write!(out, " {} |", c);
    }
    out.push('\n');
}

/// Stringify one scalar for a cell.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => escape(&other.to_string()),
    }
}

/// Escape table syntax so [`table_header`] can read the text back.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Column names of a table rendered by [`format_rows`].
pub fn table_header(table: &str) -> Vec<String> {
    let Some(line) = table.lines().next() else {
        return Vec::new();
    };
    let line = line.trim();
    let Some(inner) = line.strip_prefix('|') else {
        return Vec::new();
    };
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    let mut columns = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            '|' => columns.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    columns.push(current);

    // Cells are padded with one space on each side.
    columns
        .into_iter()
        .map(|c| {
            let c = c.strip_prefix(' ').unwrap_or(&c);
            c.strip_suffix(' ').unwrap_or(c).to_string()
        })
        .collect()
}

/// Everything the answer layer needs to phrase a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerPayload {
    /// Query plan from the compiler.
    pub rationale: String,
    pub dataset_id: String,
    pub executed_query: Query,
    pub formatted_table: String,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DatasourceInfo>,
    /// Attempts used to reach this answer.
    pub attempts: usize,
    /// Replacement for the caller's credential when it was refreshed.
    #[serde(skip)]
    pub refreshed_credential: Option<Credential>,
}

impl AnswerPayload {
    /// Prompt for the downstream model that writes the final answer.
    pub fn synthesis_prompt(&self, task: &str) -> String {
        let mut out = String::new();
        if let Some(info) = &self.datasource {
            let _ = writeln!(out, "Data source: {}", info.name);
            if let Some(description) = &info.description {
                let _ = writeln!(out, "Description: {}", description);
            }
            if let Some(owner) = &info.owner {
                let _ = writeln!(out, "Owner: {}", owner);
            }
            out.push('\n');
        }

        let _ = write!(
            out,
            "Question:\n{}\n\nQuery plan:\n{}\n\nQuery executed:\n{}\n\nData ({} row{}):\n{}\n\n",
            task.trim(),
            self.rationale,
            self.executed_query.to_json(),
            self.row_count,
            if self.row_count == 1 { "" } else { "s" },
            self.formatted_table,
        );

        out.push_str(
            "Answer the question using only the data above. If the data is empty, say that \
             no matching data was found instead of guessing. Mention the filters that shaped \
             the result when they matter to the answer.",
        );
        out
    }
}
