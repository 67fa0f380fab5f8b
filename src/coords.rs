//! Conversions between the three coordinate spaces a page lives in.
//!
//! * percentage: 0..100 of the rendered page, origin at the top-left;
//! * pixel: the page as rendered on screen at the current zoom, origin at the top-left;
//! * PDF point: the page's native user space, origin at the bottom-left.
//!
//! Everything here is pure; callers decide what to do when a page has never been rendered.

use serde::{Deserialize, Serialize};

use crate::mapping::Coordinates;

pub type Vector2 = cgmath::Vector2<f64>;

/// Size of a page as rendered at the editor's current zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDimensions {
    pub page: u32,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl PageDimensions {
    /// Whether the size can be used to scale into PDF space. A zero, negative or
    /// non-finite size counts as a page that was never rendered.
    pub fn is_usable(&self) -> bool {
        self.pixel_width.is_finite()
            && self.pixel_height.is_finite()
            && self.pixel_width > 0.0
            && self.pixel_height > 0.0
    }
}

/// Visible area of a PDF page in points: the MediaBox, `(x, y)` being its lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfPageSize {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PdfPageSize {
    /// A page whose MediaBox starts at the origin.
    pub const fn new(width: f64, height: f64) -> PdfPageSize {
        PdfPageSize {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    pub fn top(&self) -> f64 {
        self.y + self.height
    }
}

/// A box in PDF user space, `(x, y)` being its lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Scale factors from rendered pixels to PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelScale {
    pub x: f64,
    pub y: f64,
}

impl PixelScale {
    pub fn between(dims: &PageDimensions, pdf: &PdfPageSize) -> PixelScale {
        PixelScale {
            x: pdf.width / dims.pixel_width,
            y: pdf.height / dims.pixel_height,
        }
    }
}

pub fn pixel_to_percent(pixel: Vector2, dims: &PageDimensions) -> Vector2 {
    Vector2::new(
        (100.0 * pixel.x / dims.pixel_width).clamp(0.0, 100.0),
        (100.0 * pixel.y / dims.pixel_height).clamp(0.0, 100.0),
    )
}

pub fn percent_to_pixel(percent: Vector2, dims: &PageDimensions) -> Vector2 {
    Vector2::new(
        percent.x * dims.pixel_width / 100.0,
        percent.y * dims.pixel_height / 100.0,
    )
}

/// Converts a pixel-space delta (no clamping, may be negative) into a percentage delta.
pub fn pixel_delta_to_percent(delta: Vector2, dims: &PageDimensions) -> Vector2 {
    Vector2::new(
        100.0 * delta.x / dims.pixel_width,
        100.0 * delta.y / dims.pixel_height,
    )
}

/// Maps a point from pixel space to PDF space, flipping the Y axis.
pub fn pixel_point_to_pdf(pixel: Vector2, dims: &PageDimensions, pdf: &PdfPageSize) -> Vector2 {
    let scale = PixelScale::between(dims, pdf);
    Vector2::new(pdf.x + pixel.x * scale.x, pdf.top() - pixel.y * scale.y)
}

/// Maps a box anchored at its top-left pixel corner into PDF space.
///
/// The returned `y` is the bottom edge of the box, so the box height is subtracted after
/// flipping.
pub fn pixel_box_to_pdf(
    top_left: Vector2,
    size: Vector2,
    dims: &PageDimensions,
    pdf: &PdfPageSize,
) -> PdfBox {
    let scale = PixelScale::between(dims, pdf);
    let width = size.x * scale.x;
    let height = size.y * scale.y;
    PdfBox {
        x: pdf.x + top_left.x * scale.x,
        y: pdf.top() - top_left.y * scale.y - height,
        width,
        height,
    }
}

/// Maps a placed field's percentage box onto a PDF page.
pub fn percent_to_pdf_box(
    coordinates: &Coordinates,
    dims: &PageDimensions,
    pdf: &PdfPageSize,
) -> PdfBox {
    let top_left = percent_to_pixel(Vector2::new(coordinates.x, coordinates.y), dims);
    let size = percent_to_pixel(Vector2::new(coordinates.width, coordinates.height), dims);
    pixel_box_to_pdf(top_left, size, dims, pdf)
}
