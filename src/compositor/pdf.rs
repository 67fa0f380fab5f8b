//! Low level page surgery on an existing document: resources, content streams, images.

use std::collections::HashSet;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::RgbaImage;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use thiserror::Error;

/// Why a single page could not be stamped. Never fatal for the whole document.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page {0} does not exist")]
    Missing(u32),
    #[error("page has no usable MediaBox")]
    NoMediaBox,
    #[error("page object is not a dictionary")]
    NotADictionary,
    #[error("invalid /{0} entry")]
    InvalidEntry(&'static str),
    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
}

/// Adds a standard Type1 font object with WinAnsi encoding.
pub fn add_standard_font(doc: &mut Document, base_font: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Embeds an RGBA image as a Flate-compressed RGB XObject, with a soft mask when the image
/// has any transparency.
pub fn embed_rgba_image(doc: &mut Document, img: &RgbaImage) -> std::io::Result<ObjectId> {
    let (width, height) = img.dimensions();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in img.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if alpha.iter().any(|&a| a != u8::MAX) {
        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        let smask_id = doc.add_object(smask);
        image_dict.set("SMask", smask_id);
    }

    Ok(doc.add_object(Stream::new(image_dict, deflate(&rgb)?)))
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

enum ResourcesHome {
    Inline,
    Indirect(ObjectId),
}

/// Registers named objects in the page's resources, e.g. `(b"XObject", "ImSig", id)`.
///
/// Inherited resources are copied onto the page first so that the page keeps everything it
/// could already see. Indirect sub-dictionaries are inlined into the page's copy.
pub fn register_resources(
    doc: &mut Document,
    page_id: ObjectId,
    entries: &[(&'static str, &str, ObjectId)],
) -> Result<(), PageError> {
    let page = doc.get_dictionary(page_id).map_err(|_| PageError::NotADictionary)?;
    let (home, mut resources) = match page.get(b"Resources") {
        Ok(Object::Reference(id)) => (
            ResourcesHome::Indirect(*id),
            doc.get_dictionary(*id)
                .map_err(|_| PageError::InvalidEntry("Resources"))?
                .clone(),
        ),
        Ok(Object::Dictionary(dict)) => (ResourcesHome::Inline, dict.clone()),
        Ok(_) => return Err(PageError::InvalidEntry("Resources")),
        Err(_) => (ResourcesHome::Inline, inherited_resources(doc, page)?),
    };

    for &(category, name, id) in entries {
        let mut sub = match resources.get(category.as_bytes()) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(sub_id)) => doc
                .get_dictionary(*sub_id)
                .map_err(|_| PageError::InvalidEntry(category))?
                .clone(),
            Ok(_) => return Err(PageError::InvalidEntry(category)),
            Err(_) => Dictionary::new(),
        };
        sub.set(name, id);
        resources.set(category, sub);
    }

    match home {
        ResourcesHome::Inline => {
            doc.get_object_mut(page_id)?
                .as_dict_mut()?
                .set("Resources", resources);
        }
        ResourcesHome::Indirect(id) => {
            doc.set_object(id, resources);
        }
    }
    Ok(())
}

fn inherited_resources(doc: &Document, page: &Dictionary) -> Result<Dictionary, PageError> {
    let mut visited = HashSet::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    while let Some(id) = parent {
        if !visited.insert(id) {
            return Err(PageError::InvalidEntry("Parent"));
        }
        let dict = doc.get_dictionary(id)?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(res)) => return Ok(res.clone()),
            Ok(Object::Reference(res_id)) => return Ok(doc.get_dictionary(*res_id)?.clone()),
            Ok(_) => return Err(PageError::InvalidEntry("Resources")),
            Err(_) => parent = dict.get(b"Parent").and_then(Object::as_reference).ok(),
        }
    }
    Ok(Dictionary::new())
}

/// Appends `ops` to the page, drawn in a clean graphics state.
///
/// The original content is bracketed by `q`/`Q` so whatever transform or color it leaves
/// behind does not leak into the appended operations.
pub fn append_isolated_content(
    doc: &mut Document,
    page_id: ObjectId,
    ops: Vec<Operation>,
) -> Result<(), PageError> {
    let page = doc.get_dictionary(page_id).map_err(|_| PageError::NotADictionary)?;
    let existing: Vec<Object> = match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(items) => items.clone(),
            Object::Stream(_) => vec![Object::Reference(*id)],
            _ => return Err(PageError::InvalidEntry("Contents")),
        },
        Ok(Object::Array(items)) => items.clone(),
        Ok(_) => return Err(PageError::InvalidEntry("Contents")),
        Err(_) => Vec::new(),
    };

    let mut all = vec![Operation::new("Q", vec![])];
    if existing.is_empty() {
        all.clear();
    }
    all.push(Operation::new("q", vec![]));
    all.extend(ops);
    all.push(Operation::new("Q", vec![]));
    let encoded = Content { operations: all }.encode()?;

    let mut contents = Vec::with_capacity(existing.len() + 2);
    if !existing.is_empty() {
        let id_open = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        contents.push(Object::Reference(id_open));
        contents.extend(existing);
    }
    contents.push(Object::Reference(doc.add_object(Stream::new(dictionary! {}, encoded))));

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", contents);
    Ok(())
}

/// Draws an XObject scaled into the box whose lower-left corner is `(x, y)`.
pub fn draw_xobject(ops: &mut Vec<Operation>, name: &str, x: f32, y: f32, w: f32, h: f32) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![
            w.into(),
            0.0.into(),
            0.0.into(),
            h.into(),
            x.into(),
            y.into(),
        ],
    ));
    ops.push(Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]));
    ops.push(Operation::new("Q", vec![]));
}

/// Emits one line of text starting at `(x, y)`. Must be called between `BT` and `ET`.
pub fn show_text(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, text: &str) {
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(font.as_bytes().to_vec()), size.into()],
    ));
    ops.push(Operation::new(
        "Tm",
        vec![
            1.0.into(),
            0.0.into(),
            0.0.into(),
            1.0.into(),
            x.into(),
            y.into(),
        ],
    ));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(win_ansi(text), StringFormat::Literal)],
    ));
}

/// Encodes text for a WinAnsi font. Latin-1 characters map to themselves, anything else
/// becomes `?`.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Sets `/ModDate` in the document information dictionary, creating it when missing.
pub fn touch_mod_date(doc: &mut Document, date: time::OffsetDateTime) {
    let date = date.to_offset(time::UtcOffset::UTC);
    let s_date = format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}Z",
        date.year(),
        u8::from(date.month()),
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
    );
    let info_id = match doc.trailer.get(b"Info").and_then(Object::as_reference) {
        Ok(id) => id,
        Err(_) => {
            let id = doc.add_object(Dictionary::new());
            doc.trailer.set("Info", id);
            id
        }
    };
    if let Ok(info) = doc.get_object_mut(info_id).and_then(Object::as_dict_mut) {
        info.set("ModDate", Object::string_literal(s_date));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::blank_pdf;

    #[test]
    fn test_win_ansi() {
        assert_eq!(win_ansi("às 10:00"), b"\xe0s 10:00".to_vec());
        assert_eq!(win_ansi("€"), b"?".to_vec());
    }

    #[test]
    fn test_register_resources_inline() {
        let mut doc = blank_pdf(&[(100.0, 100.0)]);
        let page_id = doc.get_pages()[&1];
        let font = add_standard_font(&mut doc, "Helvetica");
        register_resources(&mut doc, page_id, &[("Font", "FX", font)]).unwrap();
        let res = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap();
        let fonts = res.get(b"Font").unwrap().as_dict().unwrap();
        assert_eq!(fonts.get(b"FX").unwrap().as_reference().unwrap(), font);
    }

    #[test]
    fn test_register_resources_keeps_inherited() {
        let mut doc = blank_pdf(&[(100.0, 100.0)]);
        let page_id = doc.get_pages()[&1];
        let old_font = add_standard_font(&mut doc, "Courier");
        let parent = {
            let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
            page.remove(b"Resources");
            page.get(b"Parent").unwrap().as_reference().unwrap()
        };
        doc.get_object_mut(parent).unwrap().as_dict_mut().unwrap().set(
            "Resources",
            dictionary! { "Font" => dictionary! { "F1" => old_font } },
        );
        let new_font = add_standard_font(&mut doc, "Helvetica");
        register_resources(&mut doc, page_id, &[("Font", "FX", new_font)]).unwrap();

        let res = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap();
        let fonts = res.get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(b"F1"));
        assert!(fonts.has(b"FX"));
    }

    #[test]
    fn test_register_resources_stops_on_parent_loop() {
        let mut doc = blank_pdf(&[(100.0, 100.0)]);
        let page_id = doc.get_pages()[&1];
        let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
        page.remove(b"Resources");
        page.set("Parent", page_id);
        let font = add_standard_font(&mut doc, "Helvetica");
        let err = register_resources(&mut doc, page_id, &[("Font", "FX", font)]).unwrap_err();
        assert!(matches!(err, PageError::InvalidEntry("Parent")));
    }

    #[test]
    fn test_register_resources_rejects_garbage() {
        let mut doc = blank_pdf(&[(100.0, 100.0)]);
        let page_id = doc.get_pages()[&1];
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Resources", 7);
        let font = add_standard_font(&mut doc, "Helvetica");
        let err = register_resources(&mut doc, page_id, &[("Font", "FX", font)]).unwrap_err();
        assert!(matches!(err, PageError::InvalidEntry("Resources")));
    }

    #[test]
    fn test_append_isolates_original_content() {
        let mut doc = blank_pdf(&[(100.0, 100.0)]);
        let page_id = doc.get_pages()[&1];
        append_isolated_content(&mut doc, page_id, vec![Operation::new("n", vec![])]).unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        let ops: Vec<String> = Content::decode(&content)
            .unwrap()
            .operations
            .into_iter()
            .map(|op| op.operator)
            .collect();
        assert_eq!(ops, ["q", "g", "Q", "q", "n", "Q"]);
    }
}
