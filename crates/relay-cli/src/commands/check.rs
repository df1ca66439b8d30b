//! `relay check`: verify the server and model paths before spawning.

use crate::error::{CliError, CliResult};
use colored::Colorize;
use relay_gateway::RelayConfig;
use serde::Serialize;
use std::path::Path;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    Pass,
    Warn,
    Fail,
    /// The setting is not configured at all.
    Unset,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub id: String,
    pub title: String,
    pub severity: CheckSeverity,
    pub details: String,
    pub recommendation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckSummary {
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub unset: usize,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub summary: CheckSummary,
    pub checks: Vec<CheckResult>,
}

pub fn run(config: &RelayConfig, json: bool) -> CliResult<()> {
    let report = build_report(
        config.backend.server_path.as_deref(),
        config.backend.model_path.as_deref(),
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    outcome(&report)
}

pub fn build_report(server_path: Option<&Path>, model_path: Option<&Path>) -> CheckReport {
    let checks = vec![check_server_path(server_path), check_model_path(model_path)];
    let count = |severity| checks.iter().filter(|c| c.severity == severity).count();
    let summary = CheckSummary {
        passed: count(CheckSeverity::Pass),
        warnings: count(CheckSeverity::Warn),
        failed: count(CheckSeverity::Fail),
        unset: count(CheckSeverity::Unset),
    };
    CheckReport { summary, checks }
}

/// Unset settings win over failed ones.
pub fn outcome(report: &CheckReport) -> CliResult<()> {
    if report.summary.unset > 0 {
        let names = report
            .checks
            .iter()
            .filter(|c| c.severity == CheckSeverity::Unset)
            .map(|c| c.title.as_str())
            .collect::<Vec<_>>()
            .join(" and ");
        return Err(CliError::MissingConfig(format!("Set {names}.")));
    }
    if report.summary.failed > 0 {
        return Err(CliError::CheckFailed(report.summary.failed));
    }
    Ok(())
}

fn result(
    id: &str,
    title: &str,
    severity: CheckSeverity,
    details: String,
    recommendation: Option<&str>,
) -> CheckResult {
    CheckResult {
        id: id.to_string(),
        title: title.to_string(),
        severity,
        details,
        recommendation: recommendation.map(str::to_string),
    }
}

pub fn check_server_path(path: Option<&Path>) -> CheckResult {
    const ID: &str = "server-path";
    const TITLE: &str = "LLAMA_SERVER_PATH";

    let Some(path) = path else {
        return result(
            ID,
            TITLE,
            CheckSeverity::Unset,
            "LLAMA_SERVER_PATH is not set.".to_string(),
            Some("Set it to the path of the llama.cpp server binary, or run `relay download server`."),
        );
    };

    let shown = path.display();
    if !path.exists() {
        result(ID, TITLE, CheckSeverity::Fail, format!("LLAMA_SERVER_PATH does not exist: {shown}"), None)
    } else if !path.is_file() {
        result(ID, TITLE, CheckSeverity::Fail, format!("LLAMA_SERVER_PATH is not a file: {shown}"), None)
    } else if !is_executable(path) {
        result(
            ID,
            TITLE,
            CheckSeverity::Fail,
            format!("LLAMA_SERVER_PATH is not executable: {shown}"),
            Some("chmod +x the binary."),
        )
    } else {
        result(ID, TITLE, CheckSeverity::Pass, format!("LLAMA_SERVER_PATH OK: {shown}"), None)
    }
}

pub fn check_model_path(path: Option<&Path>) -> CheckResult {
    const ID: &str = "model-path";
    const TITLE: &str = "LLAMA_MODEL_PATH";

    let Some(path) = path else {
        return result(
            ID,
            TITLE,
            CheckSeverity::Unset,
            "LLAMA_MODEL_PATH is not set.".to_string(),
            Some("Set it to the path of your GGUF model file, or run `relay download model`."),
        );
    };

    let shown = path.display();
    let is_gguf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gguf"))
        .unwrap_or(false);

    if !path.exists() {
        result(ID, TITLE, CheckSeverity::Fail, format!("LLAMA_MODEL_PATH does not exist: {shown}"), None)
    } else if !path.is_file() {
        result(ID, TITLE, CheckSeverity::Fail, format!("LLAMA_MODEL_PATH is not a file: {shown}"), None)
    } else if !is_gguf {
        result(
            ID,
            TITLE,
            CheckSeverity::Warn,
            format!("LLAMA_MODEL_PATH does not end with .gguf: {shown}"),
            Some("Path is still considered OK."),
        )
    } else {
        result(ID, TITLE, CheckSeverity::Pass, format!("LLAMA_MODEL_PATH OK: {shown}"), None)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn print_report(report: &CheckReport) {
    for check in &report.checks {
        let tag = match check.severity {
            CheckSeverity::Pass => "PASS".green().bold(),
            CheckSeverity::Warn => "WARN".yellow().bold(),
            CheckSeverity::Fail => "FAIL".red().bold(),
            CheckSeverity::Unset => "UNSET".red().bold(),
        };
        match check.severity {
            CheckSeverity::Pass => println!("[{tag}] {}", check.details),
            _ => eprintln!("[{tag}] {}", check.details),
        }
        if let Some(rec) = &check.recommendation {
            eprintln!("       {}", rec.dimmed());
        }
    }

    if report.summary.failed == 0 && report.summary.unset == 0 {
        println!();
        println!("{}", "Setup looks good. Next: relay spawn".green());
    }
}
