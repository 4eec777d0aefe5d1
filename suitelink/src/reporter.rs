// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable output for discovery results and runs.

use crate::output::StderrStyles;
use owo_colors::OwoColorize;
use std::{
    collections::HashMap,
    io::{self, Write},
    time::Duration,
};
use suitelink_metadata::{EntityKind, LogLevel, TestId, TestStatus};
use suitelink_runner::{
    reporter::{ReportEvent, ReportEventKind, ReportMessage, ReportSink, RunSummary},
    tree::NodeSnapshot,
};
use swrite::{SWrite, swrite, swriteln};

/// Prints run progress to stderr, one line per finished item.
pub(crate) struct ConsoleReport {
    styles: StderrStyles,
    verbose: bool,
    longnames: HashMap<TestId, String>,
}

impl ConsoleReport {
    /// `longnames` maps node ids to the names printed for them.
    pub(crate) fn new(
        styles: StderrStyles,
        verbose: bool,
        longnames: HashMap<TestId, String>,
    ) -> Self {
        Self {
            styles,
            verbose,
            longnames,
        }
    }

    fn name<'a>(&'a self, id: &'a TestId) -> &'a str {
        self.longnames.get(id).map_or(id.as_str(), String::as_str)
    }

    fn format(&self, event: &ReportEvent) -> Option<String> {
        let mut out = String::new();
        match &event.kind {
            ReportEventKind::Enqueued { .. } => return None,
            ReportEventKind::Started { id } => {
                if !self.verbose {
                    return None;
                }
                swriteln!(
                    out,
                    "{:>12} {}",
                    "START".style(self.styles.bold),
                    self.name(id)
                );
            }
            ReportEventKind::Finished {
                id,
                status,
                messages,
                duration,
            } => {
                let style = match status {
                    TestStatus::Pass => self.styles.pass,
                    TestStatus::Fail | TestStatus::Error => self.styles.fail,
                    TestStatus::Skip | TestStatus::NotRun => self.styles.skip,
                };
                swrite!(out, "{:>12} ", status.as_str().style(style));
                if let Some(duration) = duration {
                    swrite!(out, "[{}] ", DisplayDuration(*duration));
                }
                swriteln!(out, "{}", self.name(id).style(self.styles.bold));
                write_messages(&mut out, messages, &self.styles);
            }
            ReportEventKind::SuiteFailed {
                id,
                status,
                messages,
            } => {
                swriteln!(
                    out,
                    "{:>12} suite {}",
                    status.as_str().style(self.styles.fail),
                    self.name(id).style(self.styles.bold)
                );
                write_messages(&mut out, messages, &self.styles);
            }
            ReportEventKind::Output {
                text, level, item, ..
            } => {
                if !level.is_problem() && !self.verbose {
                    return None;
                }
                let label = match level {
                    LogLevel::Fail | LogLevel::Error => "ERROR".style(self.styles.fail),
                    LogLevel::Warn => "WARN".style(self.styles.warning_text),
                    _ => "OUTPUT".style(self.styles.dimmed),
                };
                swrite!(out, "{label:>12} ");
                if let Some(item) = item {
                    swrite!(out, "{}: ", self.name(item));
                }
                swriteln!(out, "{}", text.trim_end());
            }
            ReportEventKind::RunEnded { summary } => {
                write_summary(&mut out, summary, &self.styles);
            }
        }
        Some(out)
    }
}

impl ReportSink for ConsoleReport {
    fn report(&self, event: ReportEvent) {
        if let Some(text) = self.format(&event) {
            // A closed stderr leaves nowhere to report to.
            let _ = io::stderr().lock().write_all(text.as_bytes());
        }
    }
}

fn write_messages(out: &mut String, messages: &[ReportMessage], styles: &StderrStyles) {
    for message in messages {
        for line in message.text.lines() {
            swriteln!(out, "             {line}");
        }
        if let Some(location) = &message.location {
            match location.line {
                Some(line) => swriteln!(
                    out,
                    "             {}",
                    format_args!("at {}:{line}", location.path).style(styles.dimmed)
                ),
                None => swriteln!(
                    out,
                    "             {}",
                    format_args!("at {}", location.path).style(styles.dimmed)
                ),
            }
        }
    }
}

fn write_summary(out: &mut String, summary: &RunSummary, styles: &StderrStyles) {
    let stats = &summary.stats;
    swriteln!(out, "{}", "------------".style(styles.dimmed));
    let label_style = if stats.has_failures() {
        styles.fail
    } else {
        styles.pass
    };
    swrite!(
        out,
        "{:>12} [{}] {} {} run: {} {}",
        "Summary".style(label_style),
        DisplayDuration(summary.elapsed),
        stats.finished.style(styles.bold),
        if stats.finished == 1 { "test" } else { "tests" },
        stats.passed.style(styles.bold),
        "passed".style(styles.pass),
    );
    if stats.failed > 0 {
        swrite!(out, ", {} {}", stats.failed.style(styles.bold), "failed".style(styles.fail));
    }
    if stats.errored > 0 {
        swrite!(out, ", {} {}", stats.errored.style(styles.bold), "errored".style(styles.fail));
    }
    if stats.skipped > 0 {
        swrite!(out, ", {} {}", stats.skipped.style(styles.bold), "skipped".style(styles.skip));
    }
    if stats.not_run > 0 {
        swrite!(out, ", {} not run", stats.not_run.style(styles.bold));
    }
    if stats.suites_failed > 0 {
        swrite!(
            out,
            ", {} {} {}",
            stats.suites_failed.style(styles.bold),
            if stats.suites_failed == 1 { "suite" } else { "suites" },
            "failed".style(styles.fail),
        );
    }
    out.push('\n');

    for artifacts in &summary.artifacts {
        let exited = &artifacts.exited;
        for (label, path) in [
            ("output", &exited.output_file),
            ("log", &exited.log_file),
            ("report", &exited.report_file),
        ] {
            if let Some(path) = path {
                swriteln!(
                    out,
                    "{:>12} {label}: {path}",
                    format_args!("run {}", artifacts.run_id).style(styles.dimmed)
                );
            }
        }
    }
}

/// Writes a discovered tree as an indented list.
pub(crate) fn write_tree(
    out: &mut impl Write,
    workspace: &str,
    roots: &[NodeSnapshot],
    styles: &StderrStyles,
) -> io::Result<()> {
    writeln!(out, "{}", workspace.style(styles.bold))?;
    for root in roots {
        write_node(out, root, 1, styles)?;
    }
    Ok(())
}

fn write_node(
    out: &mut impl Write,
    node: &NodeSnapshot,
    depth: usize,
    styles: &StderrStyles,
) -> io::Result<()> {
    let indent = "    ".repeat(depth);
    match node.kind {
        EntityKind::Error => writeln!(
            out,
            "{indent}{} {}",
            "error:".style(styles.fail),
            node.error.as_deref().unwrap_or(&node.label)
        )?,
        EntityKind::Workspace | EntityKind::Suite => {
            writeln!(out, "{indent}{}", node.label.style(styles.bold))?
        }
        EntityKind::Test | EntityKind::Task => {
            write!(out, "{indent}{}", node.label)?;
            if !node.tags.is_empty() {
                write!(out, " {}", format_args!("[{}]", node.tags.join(", ")).style(styles.dimmed))?;
            }
            writeln!(out)?;
        }
    }
    for child in &node.children {
        write_node(out, child, depth + 1, styles)?;
    }
    Ok(())
}

/// Displays a duration in seconds with millisecond precision, padded for alignment.
struct DisplayDuration(Duration);

impl std::fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>8.3}s", self.0.as_secs_f64())
    }
}
