use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

use crate::client::Backend;

/// How a single check ended.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    /// Not run because an earlier check failed.
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Passed => "PASS",
            Status::Failed => "FAIL",
            Status::Skipped => "SKIP",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub status: Status,
    pub elapsed_ms: f64,
    pub writes: usize,
    pub reads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckReport {
    pub fn skipped(name: impl Into<String>) -> Self {
        CheckReport {
            name: name.into(),
            status: Status::Skipped,
            elapsed_ms: 0.0,
            writes: 0,
            reads: 0,
            detail: None,
        }
    }
}

/// The result of running one suite against one target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuiteReport {
    pub backend: Backend,
    pub suite: String,
    pub target: String,
    pub checks: Vec<CheckReport>,
}

impl SuiteReport {
    fn count(&self, status: Status) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(Status::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(Status::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(Status::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    /// The first failing check, if any.
    pub fn first_failure(&self) -> Option<&CheckReport> {
        self.checks.iter().find(|c| c.status == Status::Failed)
    }
}

/// Output format of the `cache-smoke` binary.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}

pub fn render<W: Write>(format: Format, reports: &[SuiteReport], out: &mut W) -> io::Result<()> {
    match format {
        Format::Text => render_text(reports, out),
        Format::Json => render_json(reports, out),
    }
}

/// One line per check, then a summary line per suite.
pub fn render_text<W: Write>(reports: &[SuiteReport], out: &mut W) -> io::Result<()> {
    for report in reports {
        writeln!(out, "{} @ {}", report.suite, report.target)?;
        for check in &report.checks {
            write!(
                out,
                "  {} {} ({:.2}ms)",
                check.status, check.name, check.elapsed_ms
            )?;
            match &check.detail {
                Some(detail) => writeln!(out, ": {detail}")?,
                None => writeln!(out)?,
            }
        }
        writeln!(
            out,
            "{}: {} passed, {} failed, {} skipped",
            report.suite,
            report.passed(),
            report.failed(),
            report.skipped()
        )?;
    }
    Ok(())
}

pub fn render_json<W: Write>(reports: &[SuiteReport], out: &mut W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, reports)?;
    writeln!(out)
}
