use serde::{Deserialize, Serialize};

pub const MIN_WIDTH: f64 = 5.0;
pub const MAX_WIDTH: f64 = 100.0;
pub const MIN_HEIGHT: f64 = 1.0;
pub const MAX_HEIGHT: f64 = 50.0;
pub const MIN_FONT_SIZE: u32 = 6;
pub const MAX_FONT_SIZE: u32 = 72;

pub const DEFAULT_WIDTH: f64 = 30.0;
pub const DEFAULT_HEIGHT: f64 = 3.0;
pub const DEFAULT_FONT_SIZE: u32 = 10;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontFamily {
    #[default]
    Normal,
    Bold,
}

impl FontFamily {
    pub fn toggled(self) -> FontFamily {
        match self {
            FontFamily::Normal => FontFamily::Bold,
            FontFamily::Bold => FontFamily::Normal,
        }
    }

    /// Name of the standard Type1 font used when burning text in.
    pub fn base_font(self) -> &'static str {
        match self {
            FontFamily::Normal => "Helvetica",
            FontFamily::Bold => "Helvetica-Bold",
        }
    }
}

/// Position, size and style of a placed field.
///
/// `x`, `y`, `width` and `height` are percentages of the rendered page, never pixels nor
/// points, so a mapping survives zoom changes and different page sizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub page: u32,
    pub width: f64,
    pub height: f64,
    pub font_size: u32,
    pub font_family: FontFamily,
}

impl Coordinates {
    pub fn new(page: u32, x: f64, y: f64) -> Coordinates {
        Coordinates {
            x: x.clamp(0.0, 100.0),
            y: y.clamp(0.0, 100.0),
            page,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            font_size: DEFAULT_FONT_SIZE,
            font_family: FontFamily::Normal,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPlacement {
    pub field_key: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// `None` while the field exists in the form but sits on no page.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

impl FieldPlacement {
    pub fn unplaced(field_key: impl Into<String>) -> FieldPlacement {
        FieldPlacement {
            field_key: field_key.into(),
            field_type: FieldType::Text,
            coordinates: None,
        }
    }

    pub fn page(&self) -> Option<u32> {
        self.coordinates.as_ref().map(|c| c.page)
    }
}

/// All placements of one form template. Saved and loaded as a whole document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub template_url: String,
    #[serde(default)]
    pub fields: Vec<FieldPlacement>,
}
