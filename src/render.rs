//! Page rendering as seen by the editor: only the rendered pixel size matters here.

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;

use crate::coords::{PageDimensions, PdfPageSize};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: u32 },
    #[error("page {0} has no usable MediaBox")]
    NoMediaBox(u32),
    #[error("invalid PDF: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// Renders a page at a zoom scale and reports the resulting pixel size.
pub trait PageRenderer {
    fn page_count(&self) -> u32;
    fn render_page(&self, page: u32, scale: f64) -> Result<PageDimensions, RenderError>;
}

/// Renderer that derives the pixel size from each page's MediaBox, one pixel per point at
/// scale 1.0. The host UI rasterizes the page itself at the same scale.
#[derive(Debug, Clone)]
pub struct MediaBoxRenderer {
    sizes: Vec<Option<PdfPageSize>>,
}

impl MediaBoxRenderer {
    pub fn from_bytes(pdf: &[u8]) -> Result<MediaBoxRenderer, RenderError> {
        let doc = Document::load_mem(pdf)?;
        Ok(MediaBoxRenderer::from_document(&doc))
    }

    pub fn from_document(doc: &Document) -> MediaBoxRenderer {
        let sizes = doc
            .get_pages()
            .values()
            .map(|&id| pdf_page_size(doc, id))
            .collect();
        MediaBoxRenderer { sizes }
    }
}

impl PageRenderer for MediaBoxRenderer {
    fn page_count(&self) -> u32 {
        self.sizes.len() as u32
    }

    fn render_page(&self, page: u32, scale: f64) -> Result<PageDimensions, RenderError> {
        let count = self.page_count();
        if page == 0 || page > count {
            return Err(RenderError::PageOutOfRange { page, count });
        }
        let size = self.sizes[(page - 1) as usize].ok_or(RenderError::NoMediaBox(page))?;
        Ok(PageDimensions {
            page,
            pixel_width: (size.width * scale).round(),
            pixel_height: (size.height * scale).round(),
        })
    }
}

/// Native size of a page, following `Parent` links for an inherited MediaBox.
///
/// A `Parent` chain that loops back on itself counts as no MediaBox.
pub fn pdf_page_size(doc: &Document, page_id: ObjectId) -> Option<PdfPageSize> {
    let mut visited = HashSet::new();
    let mut current = Some(page_id);
    while let Some(id) = current {
        if !visited.insert(id) {
            log::warn!("Page tree loops back to object {id:?}");
            return None;
        }
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Some(size) = media_box(doc, dict) {
            return Some(size);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn media_box(doc: &Document, dict: &Dictionary) -> Option<PdfPageSize> {
    let raw = dict.get(b"MediaBox").ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let arr = resolved.as_array().ok()?;
    let [llx, lly, urx, ury] = arr.as_slice() else {
        return None;
    };
    let (x, y) = (number(llx)?, number(lly)?);
    let width = number(urx)? - x;
    let height = number(ury)? - y;
    (width > 0.0 && height > 0.0).then_some(PdfPageSize {
        x,
        y,
        width,
        height,
    })
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::dictionary;

    /// Builds a document with one near-empty page per size.
    pub fn blank_pdf(sizes: &[(f32, f32)]) -> Document {
        let mut doc = Document::with_version("1.5");
        let id_pages = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        for &(w, h) in sizes {
            let id_content = doc.add_object(lopdf::Stream::new(dictionary! {}, b"0 g\n".to_vec()));
            let id_page = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => id_pages,
                "Contents" => id_content,
                "Resources" => dictionary! {},
                "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            });
            kids.push(id_page.into());
        }
        doc.set_object(
            id_pages,
            dictionary! {
                "Type" => "Pages",
                "Count" => kids.len() as i64,
                "Kids" => kids,
            },
        );
        let id_catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => id_pages,
        });
        doc.trailer.set("Root", id_catalog);
        doc
    }

    pub fn blank_pdf_bytes(sizes: &[(f32, f32)]) -> Vec<u8> {
        let mut doc = blank_pdf(sizes);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_media_box_renderer() {
        let r = MediaBoxRenderer::from_bytes(&blank_pdf_bytes(&[(612.0, 792.0), (595.0, 842.0)]))
            .unwrap();
        assert_eq!(r.page_count(), 2);
        let d = r.render_page(2, 2.0).unwrap();
        assert_eq!(d.page, 2);
        assert_eq!((d.pixel_width, d.pixel_height), (1190.0, 1684.0));
        assert!(matches!(
            r.render_page(3, 1.0),
            Err(RenderError::PageOutOfRange { page: 3, count: 2 })
        ));
    }

    #[test]
    fn test_inherited_media_box() {
        let mut doc = blank_pdf(&[(100.0, 200.0)]);
        let page_id = *doc.get_pages().get(&1).unwrap();
        let parent = {
            let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
            page.remove(b"MediaBox");
            page.get(b"Parent").unwrap().as_reference().unwrap()
        };
        doc.get_object_mut(parent)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("MediaBox", vec![0.into(), 0.into(), 300.into(), 400.into()]);
        let size = pdf_page_size(&doc, page_id).unwrap();
        assert_eq!((size.width, size.height), (300.0, 400.0));
    }

    #[test]
    fn test_media_box_keeps_origin() {
        let mut doc = blank_pdf(&[(612.0, 792.0)]);
        let page_id = doc.get_pages()[&1];
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("MediaBox", vec![100.into(), 100.into(), 712.into(), 892.into()]);
        let size = pdf_page_size(&doc, page_id).unwrap();
        assert_eq!((size.x, size.y, size.width, size.height), (100.0, 100.0, 612.0, 792.0));
    }

    #[test]
    fn test_self_parented_page_has_no_size() {
        let mut doc = blank_pdf(&[(612.0, 792.0)]);
        let page_id = doc.get_pages()[&1];
        let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
        page.remove(b"MediaBox");
        page.set("Parent", page_id);
        assert_eq!(pdf_page_size(&doc, page_id), None);
        let r = MediaBoxRenderer::from_document(&doc);
        assert!(r.render_page(1, 1.0).is_err());
    }
}
