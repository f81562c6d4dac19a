use crate::dispatcher::ScanReport;
use crate::state::Workload;
use chrono::{DateTime, Utc};
use prettytable::{Table, format, row};
use serde::Serialize;
use std::io::{self, Write};

pub fn render_table<W: Write>(workloads: &[Workload], out: &mut W) -> io::Result<()> {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row!["Namespace", "Pod", "Container", "Image"]);
    for workload in workloads {
        table.add_row(row![
            workload.namespace(),
            workload.pod(),
            workload.container(),
            workload.image()
        ]);
    }
    table.print(out)?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    scanned_at: DateTime<Utc>,
    complete: bool,
    namespaces_scanned: usize,
    namespaces_failed: usize,
    workloads: &'a [Workload],
    errors: Vec<JsonError<'a>>,
}

#[derive(Serialize)]
struct JsonError<'a> {
    namespace: Option<&'a str>,
    message: String,
}

pub fn render_json<W: Write>(report: &ScanReport, out: &mut W) -> serde_json::Result<()> {
    let json = JsonReport {
        scanned_at: report.started_at,
        complete: report.is_complete(),
        namespaces_scanned: report.namespaces_scanned,
        namespaces_failed: report.namespaces_failed(),
        workloads: &report.workloads,
        errors: report
            .errors
            .iter()
            .map(|e| JsonError {
                namespace: e.namespace(),
                message: e.to_string(),
            })
            .collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &json)?;
    writeln!(out).map_err(serde_json::Error::io)
}

/// Failure summary for the error stream: `N namespaces scanned, M failed` and one line per failure.
pub fn summarize<W: Write>(report: &ScanReport, out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "{} namespaces scanned, {} failed",
        report.namespaces_scanned,
        report.namespaces_failed()
    )?;
    for error in &report.errors {
        writeln!(out, "  {}: {}", error.namespace().unwrap_or("-"), error)?;
    }
    if !report.is_complete() {
        writeln!(out, "Scan was interrupted, results are partial")?;
    }
    Ok(())
}
