//! Environment-driven configuration.
//!
//! Every provider has a typed config struct that is read from environment
//! variables (normally populated from a `.env` file by the binary).  The
//! `from_lookup` constructors take an arbitrary lookup function so tests do
//! not have to mutate the process environment.

use std::path::{Path, PathBuf};

use crate::error::{AdapterError, Result};

pub const DEFAULT_QONTO_API_BASE_URL: &str = "https://thirdparty.qonto.com/v2";
pub const DEFAULT_QONTO_OAUTH_BASE_URL: &str = "https://oauth.qonto.com";
pub const DEFAULT_MS_TENANT_ID: &str = "common";
pub const DEFAULT_MS_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_MS_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_INVOICES_LIST: &str = "Rechnungen";
pub const DEFAULT_POSITIONS_LIST: &str = "Rechnungspositionen";

// ---------------------------------------------------------------------------
// Data directory
// ---------------------------------------------------------------------------

/// The directory holding the ledger, token caches, pending state and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `BYMCP_HOME` if set, else `.byMCP` in the user's home directory.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = non_blank(&lookup, "BYMCP_HOME") {
            return Ok(Self::new(home));
        }
        let home = non_blank(&lookup, "HOME")
            .or_else(|| non_blank(&lookup, "USERPROFILE"))
            .ok_or_else(|| {
                AdapterError::ConfigError(
                    "cannot determine the data directory: set BYMCP_HOME or HOME".into(),
                )
            })?;
        Ok(Self::new(Path::new(&home).join(".byMCP")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory (and `logs/`) if missing.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("idempotency.db")
    }

    pub fn qonto_tokens_path(&self) -> PathBuf {
        self.root.join("qonto_tokens.json")
    }

    pub fn ms_tokens_path(&self) -> PathBuf {
        self.root.join("ms_tokens.json")
    }

    pub fn ms_device_flow_path(&self) -> PathBuf {
        self.root.join("ms_device_flow.json")
    }

    pub fn pending_invoice_path(&self) -> PathBuf {
        self.root.join("pending_invoice.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

// ---------------------------------------------------------------------------
// Qonto
// ---------------------------------------------------------------------------

/// Qonto Business API credentials.
#[derive(Debug, Clone)]
pub struct QontoConfig {
    pub login: String,
    pub secret_key: String,
    pub debit_iban: String,
    /// OAuth client, needed for payments and receipt uploads.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base_url: String,
    pub oauth_base_url: String,
}

impl QontoConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let [login, secret_key, debit_iban] =
            required(&lookup, ["QONTO_LOGIN", "QONTO_SECRET_KEY", "QONTO_DEBIT_IBAN"])?;
        Ok(Self {
            login,
            secret_key,
            debit_iban: debit_iban.replace(' ', "").to_uppercase(),
            client_id: non_blank(&lookup, "QONTO_CLIENT_ID"),
            client_secret: non_blank(&lookup, "QONTO_CLIENT_SECRET"),
            api_base_url: non_blank(&lookup, "QONTO_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_QONTO_API_BASE_URL.to_string()),
            oauth_base_url: non_blank(&lookup, "QONTO_OAUTH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_QONTO_OAUTH_BASE_URL.to_string()),
        })
    }

    /// The OAuth client credentials, or an error naming what is missing.
    pub fn oauth_client(&self) -> Result<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            (id, secret) => {
                let mut missing = Vec::new();
                if id.is_none() {
                    missing.push("QONTO_CLIENT_ID");
                }
                if secret.is_none() {
                    missing.push("QONTO_CLIENT_SECRET");
                }
                Err(missing_error(&missing))
            }
        }
    }

    /// The `Authorization` header value for API-key requests.
    pub fn api_key_header(&self) -> String {
        format!("{}:{}", self.login, self.secret_key)
    }
}

// ---------------------------------------------------------------------------
// Microsoft
// ---------------------------------------------------------------------------

/// Microsoft Entra app registration and endpoints.
#[derive(Debug, Clone)]
pub struct MicrosoftConfig {
    pub client_id: String,
    pub tenant_id: String,
    pub login_base_url: String,
    pub graph_base_url: String,
}

impl MicrosoftConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let [client_id] = required(&lookup, ["MS_CLIENT_ID"])?;
        Ok(Self {
            client_id,
            tenant_id: non_blank(&lookup, "MS_TENANT_ID")
                .unwrap_or_else(|| DEFAULT_MS_TENANT_ID.to_string()),
            login_base_url: non_blank(&lookup, "MS_LOGIN_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MS_LOGIN_BASE_URL.to_string()),
            graph_base_url: non_blank(&lookup, "MS_GRAPH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MS_GRAPH_BASE_URL.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// SharePoint
// ---------------------------------------------------------------------------

/// The SharePoint site and lists invoices are imported into.
#[derive(Debug, Clone)]
pub struct SharePointConfig {
    pub site_url: String,
    pub invoices_list: String,
    pub positions_list: String,
}

impl SharePointConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let [site_url] = required(&lookup, ["SHAREPOINT_SITE_URL"])?;
        Ok(Self {
            site_url,
            invoices_list: non_blank(&lookup, "SHAREPOINT_INVOICES_LIST")
                .unwrap_or_else(|| DEFAULT_INVOICES_LIST.to_string()),
            positions_list: non_blank(&lookup, "SHAREPOINT_POSITIONS_LIST")
                .unwrap_or_else(|| DEFAULT_POSITIONS_LIST.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_blank<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F, const N: usize>(lookup: &F, keys: [&str; N]) -> Result<[String; N]>
where
    F: Fn(&str) -> Option<String>,
{
    let values = keys.map(|key| non_blank(lookup, key));
    let missing: Vec<&str> = keys
        .iter()
        .zip(values.iter())
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| *key)
        .collect();
    if !missing.is_empty() {
        return Err(missing_error(&missing));
    }
    Ok(values.map(Option::unwrap_or_default))
}

fn missing_error(missing: &[&str]) -> AdapterError {
    AdapterError::ConfigError(format!(
        "missing environment variables: {}",
        missing.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn data_dir_prefers_bymcp_home() {
        let dir = DataDir::from_lookup(env(&[("BYMCP_HOME", "/srv/bymcp"), ("HOME", "/home/a")]))
            .unwrap();
        assert_eq!(dir.root(), Path::new("/srv/bymcp"));
        assert_eq!(dir.ledger_path(), Path::new("/srv/bymcp/idempotency.db"));

        let dir = DataDir::from_lookup(env(&[("HOME", "/home/a")])).unwrap();
        assert_eq!(dir.root(), Path::new("/home/a/.byMCP"));
        assert_eq!(dir.logs_dir(), Path::new("/home/a/.byMCP/logs"));
    }

    #[test]
    fn data_dir_without_home_fails() {
        assert!(DataDir::from_lookup(env(&[])).is_err());
    }

    #[test]
    fn qonto_reports_every_missing_variable() {
        let err = QontoConfig::from_lookup(env(&[("QONTO_LOGIN", "acme-1234"), ("QONTO_SECRET_KEY", "  ")]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("QONTO_SECRET_KEY, QONTO_DEBIT_IBAN"), "{msg}");
        assert!(!msg.contains("QONTO_LOGIN"));
    }

    #[test]
    fn qonto_defaults_and_normalization() {
        let config = QontoConfig::from_lookup(env(&[
            ("QONTO_LOGIN", "acme-1234"),
            ("QONTO_SECRET_KEY", "s3cret"),
            ("QONTO_DEBIT_IBAN", "de89 3704 0044 0532 0130 00"),
        ]))
        .unwrap();
        assert_eq!(config.debit_iban, "DE89370400440532013000");
        assert_eq!(config.api_base_url, DEFAULT_QONTO_API_BASE_URL);
        assert_eq!(config.api_key_header(), "acme-1234:s3cret");
        let err = config.oauth_client().unwrap_err().to_string();
        assert!(err.contains("QONTO_CLIENT_ID, QONTO_CLIENT_SECRET"));
    }

    #[test]
    fn microsoft_and_sharepoint_defaults() {
        let ms = MicrosoftConfig::from_lookup(env(&[("MS_CLIENT_ID", "app-id")])).unwrap();
        assert_eq!(ms.tenant_id, "common");
        assert_eq!(ms.graph_base_url, DEFAULT_MS_GRAPH_BASE_URL);

        let sp = SharePointConfig::from_lookup(env(&[(
            "SHAREPOINT_SITE_URL",
            "https://acme.sharepoint.com/sites/finance",
        )]))
        .unwrap();
        assert_eq!(sp.invoices_list, "Rechnungen");
        assert_eq!(sp.positions_list, "Rechnungspositionen");

        assert!(SharePointConfig::from_lookup(env(&[])).is_err());
    }
}
