//! Signing a form response: validate, stamp the PDF, store the copy, record the audit entry.
//!
//! From the caller's side the operation either happens completely or not at all. A failed
//! record write puts the previous signed artifact back in place.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::compositor::{
    CompositeError, PageFailure, SignatureJob, SignaturePlacement, sign_document,
};
use crate::coords::PageDimensions;
use crate::signature::{Cpf, ResponseRecord, SignatureInput, SignatureLogEntry, SignatureRaster};
use crate::store::{DocumentStore, PersistenceError, RecordStore, UploadOptions};

pub const RESPONSES: &str = "responses";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("CPF must have exactly 11 digits, got `{0}`")]
    InvalidCpf(String),
    #[error("signature is empty")]
    EmptySignature,
    #[error("signature is not valid base64: {0}")]
    MalformedSignature(#[from] base64::DecodeError),
    #[error("no page selected")]
    NoPagesSelected,
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A signing request as the client sends it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub response_id: String,
    /// Storage path of the PDF to sign.
    pub source_pdf_path: String,
    pub cpf: String,
    pub signature: SignatureInput,
    pub pages: Vec<u32>,
    /// Sizes of the pages the operator previewed.
    #[serde(default)]
    pub page_dims: Vec<PageDimensions>,
    /// Where the operator dragged the signature box, keyed by page.
    #[serde(default)]
    pub placements: HashMap<u32, SignaturePlacement>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A request that passed every precondition.
#[derive(Debug)]
pub struct ValidatedRequest {
    pub cpf: Cpf,
    pub raster: SignatureRaster,
    pub pages: Vec<u32>,
}

impl SignRequest {
    /// Checks the preconditions without looking at any stored data.
    pub fn validate(&self) -> Result<ValidatedRequest, ValidationError> {
        let cpf = Cpf::parse(&self.cpf).ok_or_else(|| ValidationError::InvalidCpf(self.cpf.clone()))?;
        if self.pages.is_empty() {
            return Err(ValidationError::NoPagesSelected);
        }
        let raster = self.signature.clone().into_raster()?;
        if raster.is_empty() {
            return Err(ValidationError::EmptySignature);
        }
        Ok(ValidatedRequest {
            cpf,
            raster,
            pages: self.pages.clone(),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignReceipt {
    pub signed_pdf_path: String,
    pub signed_pages: Vec<u32>,
    pub skipped_pages: Vec<PageFailure>,
    pub entry: SignatureLogEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
}

pub struct Signer<'a, R, D> {
    records: &'a R,
    docs: &'a D,
    prefix: &'a str,
    url_ttl: Duration,
}

impl<'a, R: RecordStore, D: DocumentStore> Signer<'a, R, D> {
    pub fn new(records: &'a R, docs: &'a D, prefix: &'a str, url_ttl: Duration) -> Self {
        Signer {
            records,
            docs,
            prefix,
            url_ttl,
        }
    }

    /// Every signing of a response lands on the same path.
    pub fn signed_pdf_path(&self, response_id: &str) -> String {
        format!("{}/{}.pdf", self.prefix, response_id)
    }

    pub async fn sign(
        &self,
        request: &SignRequest,
        signed_at: OffsetDateTime,
    ) -> Result<SignReceipt, SigningError> {
        let valid = request.validate()?;

        let pdf = self.docs.download(&request.source_pdf_path).await?;
        let page_dims: HashMap<u32, PageDimensions> =
            request.page_dims.iter().map(|d| (d.page, *d)).collect();
        let signed = sign_document(&SignatureJob {
            pdf: &pdf,
            raster: &valid.raster,
            cpf: &valid.cpf,
            pages: &valid.pages,
            page_dims: &page_dims,
            placements: &request.placements,
            signed_at,
        })?;

        let mut record: ResponseRecord = match self
            .records
            .get(RESPONSES, &request.response_id)
            .await?
        {
            Some(value) => serde_json::from_value(value).map_err(PersistenceError::from)?,
            None => ResponseRecord::default(),
        };
        let entry = SignatureLogEntry::new(
            &valid.cpf,
            signed_at,
            signed.signed_pages.clone(),
            request.message.clone(),
        );
        let path = self.signed_pdf_path(&request.response_id);
        record
            .append_signature(entry.clone())
            .map_err(PersistenceError::from)?;
        record.signed_pdf_path = Some(path.clone());
        let value = serde_json::to_value(&record).map_err(PersistenceError::from)?;

        let previous = match self.docs.download(&path).await {
            Ok(bytes) => Some(bytes),
            Err(PersistenceError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        self.docs
            .upload(&path, signed.pdf, UploadOptions::pdf(true))
            .await?;
        if let Err(e) = self.records.put(RESPONSES, &request.response_id, value).await {
            self.restore(&path, previous).await;
            return Err(e.into());
        }

        log::info!(
            "Signed response {} on pages {:?} ({} skipped)",
            request.response_id,
            signed.signed_pages,
            signed.failures.len()
        );

        let signed_url = match self.docs.create_signed_url(&path, self.url_ttl).await {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("Cannot create a read URL for {path}: {e}");
                None
            }
        };
        Ok(SignReceipt {
            signed_pdf_path: path,
            signed_pages: signed.signed_pages,
            skipped_pages: signed.failures,
            entry,
            signed_url,
        })
    }

    /// Puts back what was at `path` before the upload.
    async fn restore(&self, path: &str, previous: Option<Vec<u8>>) {
        let result = match previous {
            Some(bytes) => self.docs.upload(path, bytes, UploadOptions::pdf(true)).await,
            None => self.docs.remove(path).await,
        };
        if let Err(e) = result {
            log::error!("Cannot roll back signed artifact {path}: {e}");
        }
    }
}
