use fintrack_core::config::{AppConfig, LoadOptions};
use fintrack_db::migrations::{self, MIGRATOR};
use fintrack_db::{connect_with_config, DbPool};
use serde::Serialize;

use crate::commands::runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn passed(&self) -> bool {
        self.overall_status == CheckStatus::Pass
    }
}

/// Returns the exit code alongside the rendered report.
pub fn run(json_output: bool) -> (u8, String) {
    let report = build_report();
    let exit_code = if report.passed() { 0 } else { 1 };

    if json_output {
        let rendered = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (exit_code, rendered);
    }

    (exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(describe_workflow(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["workflow_policy", "database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn describe_workflow(config: &AppConfig) -> DoctorCheck {
    let workflow = &config.workflow;
    let deadline = match workflow.step_deadline_hours {
        0 => "no step deadline".to_string(),
        hours => format!("{hours}h step deadline"),
    };
    DoctorCheck::pass(
        "workflow_policy",
        format!(
            "one step up to {}, two steps up to {}, three above; {deadline}",
            workflow.single_step_max, workflow.two_step_max
        ),
    )
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime("doctor") {
        Ok(runtime) => runtime,
        Err(_) => {
            return vec![
                DoctorCheck::fail("database_connectivity", "failed to initialize async runtime"),
                DoctorCheck::skipped("schema_migrations", "skipped because the runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped(
                        "schema_migrations",
                        "skipped because the database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let schema = check_migrations(&pool).await;
        pool.close().await;
        vec![connectivity, schema]
    })
}

async fn check_migrations(pool: &DbPool) -> DoctorCheck {
    let known: Vec<i64> = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| migration.version)
        .collect();

    let applied = match migrations::applied_versions(pool).await {
        Ok(applied) => applied,
        Err(_) => {
            return DoctorCheck::fail(
                "schema_migrations",
                "schema is not initialized; run `fintrack migrate`",
            );
        }
    };

    let pending: Vec<i64> =
        known.iter().copied().filter(|version| !applied.contains(version)).collect();
    if pending.is_empty() {
        DoctorCheck::pass("schema_migrations", format!("{} migration(s) applied", applied.len()))
    } else {
        DoctorCheck::fail(
            "schema_migrations",
            format!("pending migrations {pending:?}; run `fintrack migrate`"),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
