//! Publish report presentation
//!
//! A [`PublishReport`] summarizes a successful run, layer by layer. How it
//! is shown is up to a [`ReportPresenter`]: [`TextReport`] writes plain
//! text to any writer, [`HtmlReport`] renders a standalone HTML page from
//! `templates/report.hbs`.

use handlebars::Handlebars;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::publish::PublishResult;

const HTML_TEMPLATE: &str = include_str!("../../templates/report.hbs");

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Report writer is poisoned")]
    Poisoned,

    #[error("Invalid report template: {0}")]
    TemplateSetup(#[from] handlebars::TemplateError),

    #[error("Failed to render report: {0}")]
    Template(#[from] handlebars::RenderError),
}

/// Per-layer outcome of a successful run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReport {
    pub results: PublishResult,
    pub only_symbology: bool,
    pub geodata_server: Option<String>,
    pub metadata_server: Option<String>,
}

impl PublishReport {
    pub fn new(
        results: PublishResult,
        only_symbology: bool,
        geodata_server: Option<String>,
        metadata_server: Option<String>,
    ) -> Self {
        Self {
            results,
            only_symbology,
            geodata_server,
            metadata_server,
        }
    }

    /// Names of layers that finished with at least one error
    pub fn failed_layers(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, report)| report.has_errors())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn warning_count(&self) -> usize {
        self.results.values().map(|r| r.warnings.len()).sum()
    }

    fn target_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match &self.geodata_server {
            Some(server) if self.only_symbology => {
                lines.push(format!("Symbology published to: {server}"))
            }
            Some(server) => lines.push(format!("Data published to: {server}")),
            None => lines.push("Data: not published".to_string()),
        }
        match &self.metadata_server {
            Some(server) => lines.push(format!("Metadata published to: {server}")),
            None => lines.push("Metadata: not published".to_string()),
        }
        lines
    }

    /// Plain text rendering
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Publish report");
        for line in self.target_lines() {
            let _ = writeln!(out, "{line}");
        }
        let _ = writeln!(
            out,
            "Layers: {} ({} with errors, {} warnings)",
            self.results.len(),
            self.failed_layers().len(),
            self.warning_count()
        );

        for (name, report) in &self.results {
            let state = if report.has_errors() { "ERROR" } else { "OK" };
            let _ = writeln!(out, "\n[{state}] {name}");
            for warning in &report.warnings {
                let _ = writeln!(out, "  warning: {warning}");
            }
            for error in &report.errors {
                for (i, line) in error.lines().enumerate() {
                    let prefix = if i == 0 { "  error: " } else { "         " };
                    let _ = writeln!(out, "{prefix}{line}");
                }
            }
        }
        out
    }

    fn page(&self) -> ReportPage<'_> {
        ReportPage {
            targets: self.target_lines(),
            layer_count: self.results.len(),
            failed_count: self.failed_layers().len(),
            warning_count: self.warning_count(),
            layers: self
                .results
                .iter()
                .map(|(name, report)| LayerRow {
                    name: name.as_str(),
                    state: if report.has_errors() { "error" } else { "ok" },
                    warnings: report.warnings.iter().map(String::as_str).collect(),
                    errors: &report.errors,
                })
                .collect(),
        }
    }
}

/// Data handed to the HTML template
#[derive(Serialize)]
struct ReportPage<'a> {
    targets: Vec<String>,
    layer_count: usize,
    failed_count: usize,
    warning_count: usize,
    layers: Vec<LayerRow<'a>>,
}

#[derive(Serialize)]
struct LayerRow<'a> {
    name: &'a str,
    state: &'static str,
    warnings: Vec<&'a str>,
    errors: &'a [String],
}

/// Shows a [`PublishReport`] to the user
pub trait ReportPresenter: Send + Sync {
    fn present(&self, report: &PublishReport) -> Result<(), ReportError>;
}

/// Writes the text rendering to a writer
pub struct TextReport<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> TextReport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, ReportError> {
        self.writer.into_inner().map_err(|_| ReportError::Poisoned)
    }
}

impl TextReport<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ReportPresenter for TextReport<W> {
    fn present(&self, report: &PublishReport) -> Result<(), ReportError> {
        let mut writer = self.writer.lock().map_err(|_| ReportError::Poisoned)?;
        writer
            .write_all(report.to_text().as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|source| ReportError::Io {
                path: "<writer>".to_string(),
                source,
            })
    }
}

/// Writes the HTML rendering to a file
pub struct HtmlReport {
    path: PathBuf,
    templates: Handlebars<'static>,
}

impl HtmlReport {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let mut templates = Handlebars::new();
        templates.register_template_string("report", HTML_TEMPLATE)?;

        Ok(Self {
            path: path.into(),
            templates,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Standalone HTML page; every report string is escaped
    pub fn render(&self, report: &PublishReport) -> Result<String, ReportError> {
        Ok(self.templates.render("report", &report.page())?)
    }
}

impl ReportPresenter for HtmlReport {
    fn present(&self, report: &PublishReport) -> Result<(), ReportError> {
        let html = self.render(report)?;
        let io_err = |source| ReportError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        std::fs::write(&self.path, html).map_err(io_err)?;
        tracing::info!(path = %self.path.display(), "Publish report written");
        Ok(())
    }
}
