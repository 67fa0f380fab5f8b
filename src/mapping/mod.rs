mod types;

pub use types::*;

use thiserror::Error;

use crate::coords::Vector2;

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("no placement at index {0}")]
    NoSuchPlacement(usize),
    #[error("field `{0}` at index {1} is not placed on any page")]
    Unplaced(String, usize),
}

/// Single-field edits. None of these touches more than one placement.
impl Mapping {
    pub fn new(template_url: impl Into<String>) -> Mapping {
        Mapping {
            template_url: template_url.into(),
            fields: Vec::new(),
        }
    }

    /// Adds an unplaced entry for every key of the form that the mapping does not know yet.
    pub fn sync_fields<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            if !self.fields.iter().any(|f| f.field_key == key) {
                self.fields.push(FieldPlacement::unplaced(key));
            }
        }
    }

    pub fn placements_on_page(&self, page: u32) -> impl Iterator<Item = (usize, &FieldPlacement)> {
        self.fields
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.page() == Some(page))
    }

    /// Keys of the fields that sit on no page at all.
    pub fn unplaced_fields(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for f in &self.fields {
            let placed = self
                .fields
                .iter()
                .any(|o| o.field_key == f.field_key && o.coordinates.is_some());
            if !placed && !keys.contains(&f.field_key.as_str()) {
                keys.push(&f.field_key);
            }
        }
        keys
    }

    pub fn coordinates(&self, index: usize) -> Result<&Coordinates, MappingError> {
        let field = self
            .fields
            .get(index)
            .ok_or(MappingError::NoSuchPlacement(index))?;
        field
            .coordinates
            .as_ref()
            .ok_or_else(|| MappingError::Unplaced(field.field_key.clone(), index))
    }

    fn coordinates_mut(&mut self, index: usize) -> Result<&mut Coordinates, MappingError> {
        let field = self
            .fields
            .get_mut(index)
            .ok_or(MappingError::NoSuchPlacement(index))?;
        match field.coordinates.as_mut() {
            Some(c) => Ok(c),
            None => Err(MappingError::Unplaced(field.field_key.clone(), index)),
        }
    }

    /// Puts `field_key` on `page` at `percent`, returning the index of the placement.
    ///
    /// An existing placement of the same field on the same page is moved, keeping its size
    /// and style. Otherwise an unplaced entry of the field is reused, or a new entry is
    /// appended with the default size and style.
    pub fn place_field(&mut self, field_key: &str, page: u32, percent: Vector2) -> usize {
        let x = percent.x.clamp(0.0, 100.0);
        let y = percent.y.clamp(0.0, 100.0);

        if let Some((index, coords)) = self
            .fields
            .iter_mut()
            .enumerate()
            .filter(|(_, f)| f.field_key == field_key)
            .find_map(|(i, f)| f.coordinates.as_mut().filter(|c| c.page == page).map(|c| (i, c)))
        {
            coords.x = x;
            coords.y = y;
            return index;
        }

        let coords = Coordinates::new(page, x, y);
        if let Some(index) = self
            .fields
            .iter()
            .position(|f| f.field_key == field_key && f.coordinates.is_none())
        {
            self.fields[index].coordinates = Some(coords);
            return index;
        }

        self.fields.push(FieldPlacement {
            field_key: field_key.to_owned(),
            field_type: FieldType::Text,
            coordinates: Some(coords),
        });
        self.fields.len() - 1
    }

    /// Moves a placement by a percentage delta. Each axis saturates at the page edge on its own.
    pub fn move_placement(&mut self, index: usize, dx: f64, dy: f64) -> Result<(), MappingError> {
        let c = self.coordinates_mut(index)?;
        c.x = (c.x + dx).clamp(0.0, 100.0);
        c.y = (c.y + dy).clamp(0.0, 100.0);
        Ok(())
    }

    pub fn resize_placement(
        &mut self,
        index: usize,
        width: f64,
        height: f64,
    ) -> Result<(), MappingError> {
        let c = self.coordinates_mut(index)?;
        c.width = width.clamp(MIN_WIDTH, MAX_WIDTH);
        c.height = height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        Ok(())
    }

    pub fn set_font_size(&mut self, index: usize, size: u32) -> Result<(), MappingError> {
        let c = self.coordinates_mut(index)?;
        c.font_size = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        Ok(())
    }

    pub fn toggle_bold(&mut self, index: usize) -> Result<(), MappingError> {
        let c = self.coordinates_mut(index)?;
        c.font_family = c.font_family.toggled();
        Ok(())
    }

    /// Takes `field_key` off `page`. Returns whether anything was removed.
    ///
    /// When it was the last placement of the field, the entry stays as unplaced so the field
    /// is still offered for placement.
    pub fn remove_placement(&mut self, field_key: &str, page: u32) -> bool {
        let Some(index) = self
            .fields
            .iter()
            .position(|f| f.field_key == field_key && f.page() == Some(page))
        else {
            return false;
        };
        let siblings = self
            .fields
            .iter()
            .filter(|f| f.field_key == field_key)
            .count();
        if siblings > 1 {
            self.fields.remove(index);
        } else {
            self.fields[index].coordinates = None;
        }
        true
    }
}
