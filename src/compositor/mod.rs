//! Burns signatures and field values into existing PDF documents.

mod fields;
mod pdf;

pub use fields::*;
pub use pdf::PageError;

use std::collections::{BTreeMap, HashMap};

use lopdf::content::Operation;
use lopdf::{Document, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::coords::{PageDimensions, PdfBox, PdfPageSize, Vector2, pixel_box_to_pdf};
use crate::render::pdf_page_size;
use crate::signature::{Cpf, SignatureRaster};

/// Size of the signature box in preview pixels, scaled into points per page.
pub const SIGNATURE_BOX: Vector2 = Vector2::new(180.0, 72.0);
/// Margin from the bottom-right corner when a page was never previewed.
pub const FALLBACK_MARGIN: f64 = 20.0;
pub const LEGEND_FONT_SIZE: f32 = 7.0;
/// Offsets of the two legend baselines below the box.
pub const LEGEND_OFFSETS: [f32; 2] = [12.0, 22.0];

const IMAGE_NAME: &str = "ImSig";
const FONT_NAME: &str = "FSigLegend";

/// Top-left corner of the signature box in preview pixels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignaturePlacement {
    pub x: f64,
    pub y: f64,
}

impl SignaturePlacement {
    /// Where the box sits until the operator drags it: 65% across, 5% down.
    pub fn default_for(dims: &PageDimensions) -> SignaturePlacement {
        SignaturePlacement {
            x: dims.pixel_width * 0.65,
            y: dims.pixel_height * 0.05,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("no page selected")]
    NoPagesSelected,
    #[error("signature image is empty")]
    EmptySignature,
    #[error("signature image cannot be decoded: {0}")]
    UnreadableSignature(#[from] image::ImageError),
    #[error("cannot process PDF: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("cannot embed signature: {0}")]
    Embed(#[from] std::io::Error),
    #[error("none of the selected pages could be signed")]
    NoPagesSigned(Vec<PageFailure>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageFailure {
    pub page: u32,
    pub reason: String,
}

/// Everything the compositor needs to sign a document.
pub struct SignatureJob<'a> {
    pub pdf: &'a [u8],
    pub raster: &'a SignatureRaster,
    pub cpf: &'a Cpf,
    /// 1-based page numbers, in the order they were selected.
    pub pages: &'a [u32],
    /// Pages the operator actually previewed, with their rendered size.
    pub page_dims: &'a HashMap<u32, PageDimensions>,
    /// Drag-adjusted positions. Previewed pages missing here use the default position.
    pub placements: &'a HashMap<u32, SignaturePlacement>,
    /// Shown in the legend as is, so it should already be in the signer's offset.
    pub signed_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct SignedDocument {
    pub pdf: Vec<u8>,
    pub signed_pages: Vec<u32>,
    pub failures: Vec<PageFailure>,
}

impl SignedDocument {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Stamps the signature and its audit legend on every selected page.
///
/// Pages fail independently: a page that cannot be stamped is logged and reported in
/// `failures`, the rest are still signed. Only when no page at all could be signed is the
/// whole job an error.
pub fn sign_document(job: &SignatureJob<'_>) -> Result<SignedDocument, CompositeError> {
    if job.pages.is_empty() {
        return Err(CompositeError::NoPagesSelected);
    }
    if job.raster.is_empty() {
        return Err(CompositeError::EmptySignature);
    }
    let img = image::load_from_memory(&job.raster.bytes)?.to_rgba8();

    let mut doc = Document::load_mem(job.pdf)?;
    let page_ids = doc.get_pages();
    let image_id = pdf::embed_rgba_image(&mut doc, &img)?;
    let font_id = pdf::add_standard_font(&mut doc, "Helvetica");
    let legend = legend_lines(job.cpf, job.signed_at);

    let mut signed_pages = Vec::new();
    let mut failures = Vec::new();
    for &page in job.pages {
        if signed_pages.contains(&page) {
            continue;
        }
        match stamp_page(&mut doc, &page_ids, page, job, image_id, font_id, &legend) {
            Ok(()) => signed_pages.push(page),
            Err(e) => {
                log::warn!("Skipping page {page} while signing: {e}");
                failures.push(PageFailure {
                    page,
                    reason: e.to_string(),
                });
            }
        }
    }

    if signed_pages.is_empty() {
        return Err(CompositeError::NoPagesSigned(failures));
    }

    pdf::touch_mod_date(&mut doc, job.signed_at);
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(SignedDocument {
        pdf: buffer,
        signed_pages,
        failures,
    })
}

fn stamp_page(
    doc: &mut Document,
    page_ids: &BTreeMap<u32, ObjectId>,
    page: u32,
    job: &SignatureJob<'_>,
    image_id: ObjectId,
    font_id: ObjectId,
    legend: &[String; 2],
) -> Result<(), PageError> {
    let page_id = *page_ids.get(&page).ok_or(PageError::Missing(page))?;
    let pdf_size = pdf_page_size(doc, page_id).ok_or(PageError::NoMediaBox)?;

    let dims = job.page_dims.get(&page).filter(|dims| {
        let usable = dims.is_usable();
        if !usable {
            log::warn!(
                "Page {page} reported an unusable preview size {}x{}",
                dims.pixel_width,
                dims.pixel_height
            );
        }
        usable
    });
    let sig_box = match dims {
        Some(dims) => {
            let placement = job
                .placements
                .get(&page)
                .copied()
                .unwrap_or_else(|| SignaturePlacement::default_for(dims));
            pixel_box_to_pdf(
                Vector2::new(placement.x, placement.y),
                SIGNATURE_BOX,
                dims,
                &pdf_size,
            )
        }
        None => {
            log::warn!("Page {page} was never previewed, using the fallback signature box");
            fallback_box(&pdf_size)
        }
    };

    pdf::register_resources(
        doc,
        page_id,
        &[("XObject", IMAGE_NAME, image_id), ("Font", FONT_NAME, font_id)],
    )?;
    pdf::append_isolated_content(doc, page_id, signature_ops(&sig_box, legend))?;
    Ok(())
}

/// Box used for pages with no usable preview: bottom-right corner of the MediaBox, unscaled.
///
/// This ignores any position the operator may have picked on other pages.
pub fn fallback_box(pdf_size: &PdfPageSize) -> PdfBox {
    PdfBox {
        x: pdf_size.x + pdf_size.width - SIGNATURE_BOX.x - FALLBACK_MARGIN,
        y: pdf_size.y + FALLBACK_MARGIN,
        width: SIGNATURE_BOX.x,
        height: SIGNATURE_BOX.y,
    }
}

pub fn legend_lines(cpf: &Cpf, signed_at: OffsetDateTime) -> [String; 2] {
    [
        format!("Assinado digitalmente por CPF {cpf}"),
        format!(
            "em {:02}/{:02}/{:04} às {:02}:{:02}",
            signed_at.day(),
            u8::from(signed_at.month()),
            signed_at.year(),
            signed_at.hour(),
            signed_at.minute(),
        ),
    ]
}

fn signature_ops(sig_box: &PdfBox, legend: &[String; 2]) -> Vec<Operation> {
    let x = sig_box.x as f32;
    let y = sig_box.y as f32;
    let mut ops = Vec::new();
    pdf::draw_xobject(
        &mut ops,
        IMAGE_NAME,
        x,
        y,
        sig_box.width as f32,
        sig_box.height as f32,
    );

    ops.push(Operation::new("rg", vec![0.into(), 0.into(), 0.into()]));
    ops.push(Operation::new("BT", vec![]));
    for (line, offset) in legend.iter().zip(LEGEND_OFFSETS) {
        pdf::show_text(&mut ops, FONT_NAME, LEGEND_FONT_SIZE, x, y - offset, line);
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}
