//! Result serialisation.
//!
//! Exporters are registered per [`ExportFormat`]. The registry ships with
//! JSON, CSV, YAML, Markdown, HTML and plain-text exporters; PDF, Excel and
//! XML need an exporter registered by the embedding application.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DatasetResult, ExportFormat, ReportResult, Row};
use crate::error::{CoreResult, ReportError};

/// Serialised report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub mime: String,
    pub bytes: Bytes,
}

impl ExportArtifact {
    pub fn new(format: ExportFormat, mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            format,
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// File name for this artifact, e.g. `Sales-20240102T090000Z.csv`.
    #[must_use]
    pub fn file_name(&self, stem: &str) -> String {
        let safe: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{safe}.{}", self.format.extension())
    }
}

/// Exporter options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Pretty-print structured formats.
    #[serde(default)]
    pub pretty: bool,
    /// Title override for document formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Export only these datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<String>>,
}

impl ExportOptions {
    fn includes(&self, dataset: &str) -> bool {
        self.datasets
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == dataset))
    }

    fn selected<'a>(&self, result: &'a ReportResult) -> impl Iterator<Item = (&'a String, &'a DatasetResult)> {
        let options = self.clone();
        result
            .datasets
            .iter()
            .filter(move |(name, _)| options.includes(name))
    }
}

/// Turns a result into bytes of one format.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(
        &self,
        result: &ReportResult,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportArtifact>;
}

/// Exporters keyed by format.
#[derive(Clone, Default)]
pub struct ExporterRegistry {
    exporters: Arc<RwLock<HashMap<ExportFormat, Arc<dyn Exporter>>>>,
}

impl std::fmt::Debug for ExporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

impl ExporterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in text formats.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let text = Arc::new(TextExporter);
        for format in [
            ExportFormat::Json,
            ExportFormat::Csv,
            ExportFormat::Yaml,
            ExportFormat::Markdown,
            ExportFormat::Html,
            ExportFormat::Text,
        ] {
            registry.register(format, Arc::clone(&text) as Arc<dyn Exporter>);
        }
        registry
    }

    /// Register (or replace) the exporter for a format.
    pub fn register(&self, format: ExportFormat, exporter: Arc<dyn Exporter>) {
        self.exporters.write().insert(format, exporter);
    }

    #[must_use]
    pub fn supports(&self, format: ExportFormat) -> bool {
        self.exporters.read().contains_key(&format)
    }

    #[must_use]
    pub fn formats(&self) -> Vec<ExportFormat> {
        let mut formats: Vec<_> = self.exporters.read().keys().copied().collect();
        formats.sort();
        formats
    }

    /// Export through the registered exporter. Missing exporters and exporter
    /// failures surface as `Execution` errors.
    pub async fn export(
        &self,
        result: &ReportResult,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> CoreResult<ExportArtifact> {
        let exporter = self
            .exporters
            .read()
            .get(&format)
            .cloned()
            .ok_or_else(|| ReportError::execution(format!("no exporter registered for format '{format}'")))?;

        exporter
            .export(result, format, options)
            .await
            .map_err(|e| ReportError::execution(format!("{format} export failed: {e:#}")))
    }
}

/// Built-in exporter for the text-based formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextExporter;

#[async_trait]
impl Exporter for TextExporter {
    async fn export(
        &self,
        result: &ReportResult,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportArtifact> {
        let (mime, body) = match format {
            ExportFormat::Json => ("application/json", render_json(result, options)?),
            ExportFormat::Csv => ("text/csv", render_csv(result, options)),
            ExportFormat::Yaml => ("application/yaml", serde_yaml::to_string(result)?),
            ExportFormat::Markdown => ("text/markdown", render_markdown(result, options)),
            ExportFormat::Html => ("text/html", render_html(result, options)),
            ExportFormat::Text => ("text/plain", render_text(result, options)),
            other => anyhow::bail!("format '{other}' is not a text format"),
        };
        Ok(ExportArtifact::new(format, mime, body))
    }
}

fn render_json(result: &ReportResult, options: &ExportOptions) -> anyhow::Result<String> {
    let body = if options.datasets.is_some() {
        let mut value = serde_json::to_value(result)?;
        if let Some(datasets) = value.get_mut("datasets").and_then(Value::as_object_mut) {
            datasets.retain(|name, _| options.includes(name));
        }
        value
    } else {
        serde_json::to_value(result)?
    };

    Ok(if options.pretty {
        serde_json::to_string_pretty(&body)?
    } else {
        serde_json::to_string(&body)?
    })
}

/// Column names in first-appearance order.
fn columns(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_csv(result: &ReportResult, options: &ExportOptions) -> String {
    let selected: Vec<_> = options.selected(result).collect();
    let sectioned = selected.len() > 1;
    let mut out = String::new();

    for (index, (name, dataset)) in selected.into_iter().enumerate() {
        if sectioned {
            if index > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "# {name}");
        }
        let columns = columns(&dataset.rows);
        let header: Vec<String> = columns.iter().map(|c| csv_escape(c)).collect();
        let _ = writeln!(out, "{}", header.join(","));
        for row in &dataset.rows {
            let line: Vec<String> = columns
                .iter()
                .map(|c| csv_escape(&cell(row.get(c))))
                .collect();
            let _ = writeln!(out, "{}", line.join(","));
        }
    }
    out
}

fn title<'a>(result: &'a ReportResult, options: &'a ExportOptions) -> &'a str {
    options.title.as_deref().unwrap_or(&result.report_name)
}

fn render_markdown(result: &ReportResult, options: &ExportOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", title(result, options));
    let _ = writeln!(
        out,
        "_Generated {} · {} rows_\n",
        result.generated_at.to_rfc3339(),
        result.row_count
    );

    for (name, dataset) in options.selected(result) {
        let _ = writeln!(out, "## {name}\n");
        let columns = columns(&dataset.rows);
        if columns.is_empty() {
            out.push_str("_No rows._\n\n");
            continue;
        }
        let _ = writeln!(out, "| {} |", columns.join(" | "));
        let _ = writeln!(out, "|{}|", vec![" --- "; columns.len()].join("|"));
        for row in &dataset.rows {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| cell(row.get(c)).replace('|', "\\|"))
                .collect();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }
        out.push('\n');
    }
    out
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_html(result: &ReportResult, options: &ExportOptions) -> String {
    let title = html_escape(title(result, options));
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n"
    );

    for (name, dataset) in options.selected(result) {
        let _ = writeln!(out, "<h2>{}</h2>", html_escape(name));
        let columns = columns(&dataset.rows);
        out.push_str("<table>\n<thead><tr>");
        for column in &columns {
            let _ = write!(out, "<th>{}</th>", html_escape(column));
        }
        out.push_str("</tr></thead>\n<tbody>\n");
        for row in &dataset.rows {
            out.push_str("<tr>");
            for column in &columns {
                let _ = write!(out, "<td>{}</td>", html_escape(&cell(row.get(column))));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn render_text(result: &ReportResult, options: &ExportOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", title(result, options));
    let _ = writeln!(out, "Generated: {}", result.generated_at.to_rfc3339());
    let _ = writeln!(out, "Rows: {}", result.row_count);

    for (name, dataset) in options.selected(result) {
        let _ = writeln!(out, "\n[{name}] {} rows", dataset.row_count);
        let columns = columns(&dataset.rows);
        let widths: Vec<usize> = columns
            .iter()
            .map(|c| {
                dataset
                    .rows
                    .iter()
                    .map(|r| cell(r.get(c)).chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();
        let _ = writeln!(out, "{}", header.join("  ").trim_end());
        for row in &dataset.rows {
            let line: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<w$}", cell(row.get(c))))
                .collect();
            let _ = writeln!(out, "{}", line.join("  ").trim_end());
        }
        for (key, value) in &dataset.aggregates {
            let _ = writeln!(out, "{key}: {}", cell(Some(value)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Parameters, ResultStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn result() -> ReportResult {
        let rows: Vec<Row> = [
            json!({"name": "Widget, large", "qty": 2}),
            json!({"name": "Gadget \"pro\"", "qty": null}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        let mut datasets = BTreeMap::new();
        datasets.insert("items".to_string(), DatasetResult::from_rows(rows));
        ReportResult {
            id: "res".into(),
            report_id: "rep".into(),
            report_name: "Inventory <Q1>".into(),
            execution_id: Some("exec".into()),
            generated_at: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
            execution_time_ms: 5,
            parameters: Parameters::new(),
            datasets,
            visualizations: Vec::new(),
            row_count: 2,
            status: ResultStatus::Success,
        }
    }

    #[tokio::test]
    async fn test_csv_escapes_fields() {
        let registry = ExporterRegistry::with_defaults();
        let artifact = registry
            .export(&result(), ExportFormat::Csv, &ExportOptions::default())
            .await
            .unwrap();

        let text = String::from_utf8(artifact.bytes.to_vec()).unwrap();
        assert_eq!(artifact.mime, "text/csv");
        assert!(text.contains("\"Widget, large\",2"));
        assert!(text.contains("\"Gadget \"\"pro\"\"\","));
    }

    #[tokio::test]
    async fn test_json_round_trips_result() {
        let registry = ExporterRegistry::with_defaults();
        let artifact = registry
            .export(&result(), ExportFormat::Json, &ExportOptions::default())
            .await
            .unwrap();
        let parsed: ReportResult = serde_json::from_slice(&artifact.bytes).unwrap();
        assert_eq!(parsed, result());
    }

    #[tokio::test]
    async fn test_html_escapes_title() {
        let registry = ExporterRegistry::with_defaults();
        let artifact = registry
            .export(&result(), ExportFormat::Html, &ExportOptions::default())
            .await
            .unwrap();
        let html = String::from_utf8(artifact.bytes.to_vec()).unwrap();
        assert!(html.contains("<h1>Inventory &lt;Q1&gt;</h1>"));
    }

    #[tokio::test]
    async fn test_unregistered_format_is_execution_error() {
        let registry = ExporterRegistry::with_defaults();
        let err = registry
            .export(&result(), ExportFormat::Pdf, &ExportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Execution(_)));
        assert!(!registry.supports(ExportFormat::Excel));
    }

    #[test]
    fn test_file_name_is_sanitised() {
        let artifact = ExportArtifact::new(ExportFormat::Markdown, "text/markdown", "x");
        assert_eq!(artifact.file_name("Q1 sales/2024"), "Q1_sales_2024.md");
    }
}
