use std::collections::HashMap;

use lopdf::Document;
use lopdf::content::Operation;

use super::{CompositeError, PageFailure, pdf};
use crate::coords::{PageDimensions, percent_to_pdf_box};
use crate::mapping::{FontFamily, Mapping};
use crate::render::pdf_page_size;

const FONT_NORMAL: &str = "FMapN";
const FONT_BOLD: &str = "FMapB";
/// Horizontal padding between the box edge and the text.
const TEXT_PADDING: f32 = 2.0;

#[derive(Debug)]
pub struct FilledDocument {
    pub pdf: Vec<u8>,
    pub filled: usize,
    pub failures: Vec<PageFailure>,
}

/// Writes the value of every placed field into its box.
///
/// Fields with no value or no placement are left out. The text starts at the top-left of the
/// box, one font size below its top edge.
pub fn fill_fields(
    pdf_bytes: &[u8],
    mapping: &Mapping,
    values: &HashMap<String, String>,
) -> Result<FilledDocument, CompositeError> {
    let mut doc = Document::load_mem(pdf_bytes)?;
    let page_ids = doc.get_pages();
    let font_normal = pdf::add_standard_font(&mut doc, FontFamily::Normal.base_font());
    let font_bold = pdf::add_standard_font(&mut doc, FontFamily::Bold.base_font());

    let mut per_page: HashMap<u32, (Vec<Operation>, usize)> = HashMap::new();
    let mut filled = 0;
    let mut failures = Vec::new();

    for field in &mapping.fields {
        let Some(coords) = &field.coordinates else {
            continue;
        };
        let Some(value) = values.get(&field.field_key).filter(|v| !v.is_empty()) else {
            log::debug!("No value for field `{}`", field.field_key);
            continue;
        };
        let size = page_ids
            .get(&coords.page)
            .and_then(|&id| pdf_page_size(&doc, id));
        let Some(size) = size else {
            log::warn!(
                "Field `{}` targets page {} which cannot be used",
                field.field_key,
                coords.page
            );
            failures.push(PageFailure {
                page: coords.page,
                reason: format!("field `{}`: page missing or without MediaBox", field.field_key),
            });
            continue;
        };

        // One pixel per point: the box does not depend on the rendered size anyway.
        let dims = PageDimensions {
            page: coords.page,
            pixel_width: size.width,
            pixel_height: size.height,
        };
        let b = percent_to_pdf_box(coords, &dims, &size);
        let font = match coords.font_family {
            FontFamily::Normal => FONT_NORMAL,
            FontFamily::Bold => FONT_BOLD,
        };
        let font_size = coords.font_size as f32;
        let (ops, count) = per_page.entry(coords.page).or_default();
        *count += 1;
        ops.push(Operation::new("BT", vec![]));
        pdf::show_text(
            ops,
            font,
            font_size,
            b.x as f32 + TEXT_PADDING,
            (b.y + b.height) as f32 - font_size,
            value,
        );
        ops.push(Operation::new("ET", vec![]));
    }

    let mut pages: Vec<_> = per_page.into_iter().collect();
    pages.sort_by_key(|(page, _)| *page);
    for (page, (mut ops, count)) in pages {
        let page_id = page_ids[&page];
        ops.insert(0, Operation::new("rg", vec![0.into(), 0.into(), 0.into()]));
        let res = pdf::register_resources(
            &mut doc,
            page_id,
            &[("Font", FONT_NORMAL, font_normal), ("Font", FONT_BOLD, font_bold)],
        )
        .and_then(|()| pdf::append_isolated_content(&mut doc, page_id, ops));
        match res {
            Ok(()) => filled += count,
            Err(e) => {
                log::warn!("Cannot write fields on page {page}: {e}");
                failures.push(PageFailure {
                    page,
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(FilledDocument {
        pdf: buffer,
        filled,
        failures,
    })
}
