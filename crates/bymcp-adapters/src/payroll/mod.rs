//! Payroll skill.
//!
//! Splits a multi-page payslip PDF across the employees of a CSV roster,
//! saves each payslip into the employee's folder and pays the net amount by
//! SEPA transfer through Qonto.  Every transfer goes through the idempotency
//! ledger first, so re-running a month never pays anyone twice.

pub mod payslips;
pub mod roster;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use bymcp_store::TransferStore;
use chrono::Local;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{AdapterError, Result};
use crate::money::format_cents;
use crate::params::{bool_or, optional_str, required_i64, required_str};
use crate::qonto::{QontoClient, TransferRequest};
use crate::report::RunLog;
use crate::traits::{Adapter, AdapterType, AuthRequirement, HealthStatus, ToolDefinition};

pub use payslips::{PayslipRun, extract_amount, match_payslips, name_score, process_payslips};
pub use roster::{Employee, RosterParse, parse_roster};

static PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}$").unwrap_or_else(|e| panic!("invalid period regex: {e}"))
});

/// Payroll adapter: payslip splitting and salary transfers.
pub struct PayrollAdapter {
    /// Unique identifier for this adapter instance.
    id: String,
    /// Whether the adapter has been connected.
    connected: bool,
    /// Idempotency ledger of all transfers ever attempted.
    ledger: TransferStore,
    /// Qonto client, when configured.
    qonto: Option<Arc<QontoClient>>,
    /// Why Qonto is unavailable, reported by `payroll_process`.
    qonto_error: Option<String>,
}

impl PayrollAdapter {
    /// Create a payroll adapter without Qonto access.
    pub fn new(id: &str, ledger: TransferStore) -> Self {
        Self {
            id: id.to_string(),
            connected: false,
            ledger,
            qonto: None,
            qonto_error: Some("Qonto client not configured".into()),
        }
    }

    /// Create a payroll adapter that pays through `qonto`.
    pub fn with_qonto(id: &str, ledger: TransferStore, qonto: Arc<QontoClient>) -> Self {
        let mut adapter = Self::new(id, ledger);
        adapter.qonto = Some(qonto);
        adapter.qonto_error = None;
        adapter
    }

    /// Record why Qonto could not be set up (e.g. missing variables).
    pub fn with_qonto_error(mut self, reason: impl Into<String>) -> Self {
        self.qonto = None;
        self.qonto_error = Some(reason.into());
        self
    }

    /// The client to pay with, or why there is none.
    fn payments_client(&self) -> std::result::Result<&QontoClient, String> {
        match &self.qonto {
            Some(client) if client.has_oauth() => Ok(client),
            Some(client) => Err(match client.config().oauth_client() {
                Err(e) => e.to_string(),
                Ok(_) => "Qonto OAuth token source not configured".into(),
            }),
            None => Err(self
                .qonto_error
                .clone()
                .unwrap_or_else(|| "Qonto client not configured".into())),
        }
    }

    // -----------------------------------------------------------------------
    // Tool implementations
    // -----------------------------------------------------------------------

    /// List the employees of a roster.
    async fn tool_list_employees(&self, params: Value) -> Result<Value> {
        let csv_path = PathBuf::from(required_str(&params, "csv_path", "payroll_list_employees")?);
        let parsed = run_blocking(move || parse_roster(&csv_path)).await?;

        let mut lines = Vec::new();
        if !parsed.errors.is_empty() {
            lines.push("Errors while reading the CSV:".to_string());
            lines.extend(parsed.errors.iter().map(|e| format!("  {e}")));
            lines.push(String::new());
        }
        lines.push(format!("{} employees:", parsed.employees.len()));
        for employee in &parsed.employees {
            lines.push(format!(
                "  {}  |  {}  |  {}",
                employee.name,
                employee.iban_masked,
                employee.target_dir.display()
            ));
        }
        Ok(Value::String(lines.join("\n")))
    }

    /// Report whether one transfer was already executed.
    async fn tool_check_transfer(&self, params: Value) -> Result<Value> {
        let tool = "payroll_check_transfer";
        let name = required_str(&params, "name", tool)?;
        let period = required_str(&params, "period", tool)?;
        let amount_cents = required_i64(&params, "amount_cents", tool)?;

        let key = TransferStore::idempotency_key(name, period, amount_cents);
        let done = self.ledger.is_processed(&key).await?;
        let status = if done {
            "already executed successfully"
        } else {
            "not processed yet"
        };
        Ok(Value::String(format!(
            "{name} / {period} / {} EUR:  {status}",
            format_cents(amount_cents)
        )))
    }

    /// Print the ledger as a table.
    async fn tool_list_transfers(&self, params: Value) -> Result<Value> {
        let period = optional_str(&params, "period");
        let records = self.ledger.list(period).await?;
        Ok(Value::String(transfers_table(period, &records)))
    }

    /// Split the payslip PDF and pay every matched employee.
    async fn tool_process(&self, params: Value) -> Result<Value> {
        let tool = "payroll_process";
        let pdf_path = PathBuf::from(required_str(&params, "pdf_path", tool)?);
        let csv_path = PathBuf::from(required_str(&params, "csv_path", tool)?);
        let skip_transfers = bool_or(&params, "skip_transfers", tool, false)?;
        let period = match optional_str(&params, "period") {
            Some(p) if PERIOD.is_match(p) => p.to_string(),
            Some(p) => {
                return Err(AdapterError::InvalidParams {
                    tool_name: tool.into(),
                    reason: format!("period must have the form YYYY-MM, got `{p}`"),
                });
            }
            None => Local::now().format("%Y-%m").to_string(),
        };
        info!(period = %period, pdf = %pdf_path.display(), skip_transfers, "payroll run started");

        let parsed = run_blocking(move || parse_roster(&csv_path)).await?;
        if !parsed.errors.is_empty() {
            return Ok(Value::String(format!(
                "CSV errors:\n{}",
                parsed.errors.join("\n")
            )));
        }
        if parsed.employees.is_empty() {
            return Ok(Value::String("CSV contains no valid employees.".into()));
        }

        let mut log = RunLog::new();
        log.info(format!("CSV: {} employees loaded.", parsed.employees.len()));
        log.info(format!(
            "Processing PDF: {}",
            pdf_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| pdf_path.display().to_string())
        ));

        let mut employees = parsed.employees;
        let pdf_period = period.clone();
        let (employees, pdf_run) = run_blocking(move || {
            let run = process_payslips(&pdf_path, &mut employees, &pdf_period, &HashSet::new());
            (employees, run)
        })
        .await?;

        for saved in &pdf_run.saved_files {
            log.info(format!("PDF saved: {}", saved.display()));
        }
        for page in &pdf_run.unmatched_pages {
            log.warning(format!("Page {page}: no employee found."));
        }
        for err in &pdf_run.errors {
            log.error(format!("PDF error: {err}"));
        }

        if skip_transfers {
            log.info("Transfers skipped (skip_transfers=true).");
            return Ok(Value::String(log.into_text()));
        }

        let client = match self.payments_client() {
            Ok(client) => client,
            Err(reason) => {
                log.error(format!("Qonto configuration missing: {reason}"));
                return Ok(Value::String(log.into_text()));
            }
        };

        let mut transfers_ok: Vec<String> = Vec::new();
        let mut transfers_failed: Vec<String> = Vec::new();

        for employee in &employees {
            if employee.amount_cents <= 0 {
                log.warning(format!("{}: no amount found, skipped.", employee.name));
                transfers_failed.push(employee.name.clone());
                continue;
            }

            let key =
                TransferStore::idempotency_key(&employee.name, &period, employee.amount_cents);
            if self.ledger.is_processed(&key).await? {
                log.info(format!("{}: already processed, skipped.", employee.name));
                transfers_ok.push(employee.name.clone());
                continue;
            }

            self.ledger
                .record_pending(&key, &employee.name, &period, employee.amount_cents)
                .await?;
            log.info(format!(
                "Transfer: {} | {} | {} EUR",
                employee.name,
                employee.iban_masked,
                format_cents(employee.amount_cents)
            ));

            let request = TransferRequest {
                name: employee.name.clone(),
                iban: employee.iban.clone(),
                amount_cents: employee.amount_cents,
                period: period.clone(),
                idempotency_key: key.clone(),
            };
            let outcome = client
                .create_transfer(&request, &mut |level, msg| log.push(level, msg))
                .await;

            if outcome.success {
                self.ledger
                    .record_success(&key, outcome.transfer_id.as_deref())
                    .await?;
                log.info(format!(
                    "{}: transfer OK (ID: {}).",
                    employee.name,
                    outcome.transfer_id.as_deref().unwrap_or("-")
                ));
                transfers_ok.push(employee.name.clone());
            } else {
                self.ledger.record_failure(&key, &outcome.error).await?;
                log.error(format!("{}: failed: {}", employee.name, outcome.error));
                transfers_failed.push(employee.name.clone());
            }
        }

        log.plain("");
        log.plain(format!("=== Summary {period} ==="));
        log.plain(format!("PDFs saved:        {}", pdf_run.saved_files.len()));
        log.plain(format!("Transfers OK:      {}", transfers_ok.len()));
        log.plain(format!("Transfers failed:  {}", transfers_failed.len()));
        if !transfers_failed.is_empty() {
            log.plain(format!("Failed: {}", transfers_failed.join(", ")));
        }
        info!(
            period = %period,
            ok = transfers_ok.len(),
            failed = transfers_failed.len(),
            "payroll run finished"
        );

        Ok(Value::String(log.into_text()))
    }
}

/// Run file-system heavy work off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AdapterError::Internal(format!("blocking task failed: {e}")))
}

/// Format ledger records as a fixed-width table.
pub fn transfers_table(period: Option<&str>, records: &[bymcp_store::TransferRecord]) -> String {
    if records.is_empty() {
        return match period {
            Some(p) => format!("No entries for period {p}."),
            None => "No entries for all periods.".to_string(),
        };
    }
    let mut lines = vec![
        format!(
            "{:<25} {:<8} {:>10}  {:<10}  Transfer-ID",
            "Name", "Period", "EUR", "Status"
        ),
        "-".repeat(75),
    ];
    for record in records {
        lines.push(format!(
            "{:<25} {:<8} {:>10}  {:<10}  {}",
            record.employee_name,
            record.period,
            format_cents(record.amount_cents),
            record.status.as_str(),
            record.transfer_id.as_deref().unwrap_or("-")
        ));
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// Build the list of tool definitions exposed by the payroll adapter.
fn build_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "payroll_list_employees".into(),
            description: "Read an employee CSV (columns: name, iban, zielordner) and list the \
                          valid employees with masked IBANs"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "csv_path": {
                        "type": "string",
                        "description": "Absolute path to the employee CSV file"
                    }
                },
                "required": ["csv_path"]
            }),
        },
        ToolDefinition {
            name: "payroll_check_transfer".into(),
            description: "Check whether the salary transfer for an employee and period was \
                          already executed"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Full employee name (e.g. \"Michael Richter\")"
                    },
                    "period": {
                        "type": "string",
                        "description": "Payroll period as YYYY-MM (e.g. \"2026-02\")"
                    },
                    "amount_cents": {
                        "type": "integer",
                        "description": "Net amount in euro cents (e.g. 763363 = 7633.63 EUR)"
                    }
                },
                "required": ["name", "period", "amount_cents"]
            }),
        },
        ToolDefinition {
            name: "payroll_list_transfers".into(),
            description: "List all known transfers from the idempotency ledger".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "period": {
                        "type": "string",
                        "description": "Optional period filter as YYYY-MM (default: all periods)"
                    }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "payroll_process".into(),
            description: "Split a multi-page payslip PDF, save each page into the employee's \
                          folder and pay the net amounts by SEPA transfer via Qonto. Every \
                          transfer needs approval in the Qonto app; the tool waits up to five \
                          minutes per transfer."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pdf_path": {
                        "type": "string",
                        "description": "Absolute path to the payslip PDF"
                    },
                    "csv_path": {
                        "type": "string",
                        "description": "Absolute path to the employee CSV"
                    },
                    "period": {
                        "type": "string",
                        "description": "Payroll period as YYYY-MM (default: current month)"
                    },
                    "skip_transfers": {
                        "type": "boolean",
                        "description": "Only save the PDFs, do not send any transfer (default: false)"
                    }
                },
                "required": ["pdf_path", "csv_path"]
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Adapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Adapter for PayrollAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Payments
    }

    async fn connect(&mut self) -> Result<()> {
        match self.payments_client() {
            Ok(_) => info!(id = %self.id, "payroll adapter connected"),
            Err(reason) => warn!(
                id = %self.id,
                reason = %reason,
                "payroll adapter connected without payments"
            ),
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!(id = %self.id, "payroll adapter disconnected");
        self.connected = false;
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if !self.connected {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(match self.payments_client() {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Degraded,
        })
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        build_tool_definitions()
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        if !self.connected {
            return Err(AdapterError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: format!("adapter `{}` is not connected", self.id),
            });
        }

        match name {
            "payroll_list_employees" => self.tool_list_employees(params).await,
            "payroll_check_transfer" => self.tool_check_transfer(params).await,
            "payroll_list_transfers" => self.tool_list_transfers(params).await,
            "payroll_process" => self.tool_process(params).await,
            _ => Err(AdapterError::ToolNotFound {
                adapter_id: self.id.clone(),
                tool_name: name.to_string(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement {
            provider: "qonto".into(),
            scopes: vec![
                "payment.write".into(),
                "organization.read".into(),
            ],
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
