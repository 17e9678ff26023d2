use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{AggregateResult, StudentInfo};
use crate::report::{build_contract, ReportContract};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("document renderer is not configured (set BOLETA_RENDERER_URL)")]
    NotConfigured,
    #[error("document renderer returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("document renderer returned an empty document")]
    EmptyDocument,
    #[error("could not reach document renderer")]
    Transport(#[from] reqwest::Error),
}

/// Turns a report contract into a binary document.
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    async fn render(&self, contract: &ReportContract) -> Result<Vec<u8>, ExportError>;
}

/// Posts the contract as JSON to a server-side PDF renderer.
pub struct HttpPdfExporter {
    client: Client,
    endpoint: String,
}

impl HttpPdfExporter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DocumentExporter for HttpPdfExporter {
    async fn render(&self, contract: &ReportContract) -> Result<Vec<u8>, ExportError> {
        debug!(endpoint = %self.endpoint, file_name = %contract.file_name, "requesting boleta render");

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, PDF_CONTENT_TYPE)
            .json(contract)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExportError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDocument {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Assembles the contract, hands it to `exporter` once and names the result.
/// Failures are returned as-is; there is no retry and no partial document.
pub async fn export_document(
    exporter: &dyn DocumentExporter,
    result: &AggregateResult,
    student: &StudentInfo,
    cycle: &str,
) -> Result<ExportedDocument, ExportError> {
    let contract = build_contract(result, student, cycle);
    let bytes = exporter.render(&contract).await?;
    if bytes.is_empty() {
        return Err(ExportError::EmptyDocument);
    }

    info!(file_name = %contract.file_name, size = bytes.len(), "boleta exported");
    Ok(ExportedDocument {
        file_name: contract.file_name,
        content_type: PDF_CONTENT_TYPE,
        bytes,
    })
}
