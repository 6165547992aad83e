//! Shared adapter initialization.
//!
//! `serve`, `status` and `tools` need the same set of skills.  Everything is
//! built from the environment; a provider whose configuration is missing
//! only degrades the skills that need it.

use std::sync::Arc;

use anyhow::{Context, Result};
use bymcp_adapters::{
    Adapter, DataDir, GraphClient, InvoicesAdapter, MicrosoftAccess, MicrosoftConfig,
    PayrollAdapter, QontoClient, QontoConfig, ReceiptsAdapter, SharePointConfig,
};
use bymcp_auth_engine::{
    MicrosoftAuthConfig, MicrosoftSession, QontoAuthConfig, QontoSession, TokenSource,
};
use bymcp_store::{Database, TransferStore};
use tracing::{info, warn};

use crate::helpers::config_reason;

/// Clients and configuration shared by the skills.
pub struct Services {
    pub ledger: TransferStore,
    pub qonto: Result<Arc<QontoClient>, String>,
    pub microsoft: Result<MicrosoftAccess, String>,
    pub sharepoint: Result<SharePointConfig, String>,
}

/// Open the ledger and build the provider clients.
pub async fn init_services(data_dir: &DataDir) -> Result<Services> {
    let db = Database::open_and_migrate(data_dir.ledger_path())
        .await
        .context("failed to open the transfer ledger")?;

    let qonto = build_qonto(data_dir);
    if let Err(reason) = &qonto {
        warn!(reason = %reason, "Qonto not configured");
    }
    let microsoft = build_microsoft(data_dir);
    if let Err(reason) = &microsoft {
        warn!(reason = %reason, "Microsoft not configured");
    }
    let sharepoint = SharePointConfig::from_env().map_err(|e| config_reason(&e));
    if let Err(reason) = &sharepoint {
        warn!(reason = %reason, "SharePoint not configured");
    }

    Ok(Services {
        ledger: TransferStore::new(db),
        qonto,
        microsoft,
        sharepoint,
    })
}

/// Build all skills; with `connect` set they are also connected.
pub async fn init_adapters(
    services: &Services,
    data_dir: &DataDir,
    connect: bool,
) -> Result<Vec<Arc<dyn Adapter>>> {
    let mut payroll = match &services.qonto {
        Ok(qonto) => PayrollAdapter::with_qonto("payroll", services.ledger.clone(), Arc::clone(qonto)),
        Err(reason) => {
            PayrollAdapter::new("payroll", services.ledger.clone()).with_qonto_error(reason.clone())
        }
    };

    let mut receipts = ReceiptsAdapter::new("receipts");
    receipts = match &services.qonto {
        Ok(qonto) => receipts.with_qonto(Arc::clone(qonto)),
        Err(reason) => receipts.with_qonto_error(reason.clone()),
    };
    receipts = match &services.microsoft {
        Ok(access) => receipts.with_microsoft(access.clone()),
        Err(reason) => receipts.with_microsoft_error(reason.clone()),
    };

    let mut invoices = InvoicesAdapter::new("invoices", data_dir.pending_invoice_path());
    invoices = match &services.microsoft {
        Ok(access) => invoices.with_graph(Arc::clone(&access.graph)),
        Err(reason) => invoices.with_graph_error(reason.clone()),
    };
    invoices = match &services.sharepoint {
        Ok(config) => invoices.with_sharepoint(config.clone()),
        Err(reason) => invoices.with_sharepoint_error(reason.clone()),
    };

    if connect {
        payroll.connect().await?;
        receipts.connect().await?;
        invoices.connect().await?;
        info!("adapters initialized (payroll, receipts, invoices)");
    }

    Ok(vec![Arc::new(payroll), Arc::new(receipts), Arc::new(invoices)])
}

/// The Qonto OAuth session, if client credentials are configured.
pub fn qonto_session(config: &QontoConfig, data_dir: &DataDir) -> bymcp_adapters::Result<QontoSession> {
    let (client_id, client_secret) = config.oauth_client()?;
    let mut auth = QontoAuthConfig::new(client_id, client_secret);
    auth.oauth_base_url = config.oauth_base_url.clone();
    Ok(QontoSession::new(auth, data_dir.qonto_tokens_path()))
}

/// The Microsoft device-flow session for `config`.
pub fn microsoft_session(config: &MicrosoftConfig, data_dir: &DataDir) -> MicrosoftSession {
    let mut auth = MicrosoftAuthConfig::new(config.client_id.as_str()).with_tenant(config.tenant_id.as_str());
    auth.login_base_url = config.login_base_url.clone();
    MicrosoftSession::new(auth, data_dir.ms_tokens_path(), data_dir.ms_device_flow_path())
}

fn build_qonto(data_dir: &DataDir) -> Result<Arc<QontoClient>, String> {
    let config = QontoConfig::from_env().map_err(|e| config_reason(&e))?;
    let tokens: Option<Arc<dyn TokenSource>> = match qonto_session(&config, data_dir) {
        Ok(session) => Some(Arc::new(session)),
        Err(e) => {
            warn!(reason = %config_reason(&e), "Qonto OAuth not configured, payments disabled");
            None
        }
    };
    QontoClient::new(config, tokens)
        .map(Arc::new)
        .map_err(|e| config_reason(&e))
}

fn build_microsoft(data_dir: &DataDir) -> Result<MicrosoftAccess, String> {
    let config = MicrosoftConfig::from_env().map_err(|e| config_reason(&e))?;
    let session = Arc::new(microsoft_session(&config, data_dir));
    let graph = GraphClient::new(config.graph_base_url.clone(), session.clone())
        .map_err(|e| config_reason(&e))?;
    Ok(MicrosoftAccess {
        session,
        graph: Arc::new(graph),
    })
}
