//! Interactive placement of fields on the pages of a template.
//!
//! A session owns its mapping. Nothing is persisted until `save`, so a session that is
//! dropped loses every edit made since the last save.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::{PageDimensions, Vector2, pixel_delta_to_percent, pixel_to_percent};
use crate::gateway::MappingGateway;
use crate::mapping::{Coordinates, Mapping, MappingError};
use crate::render::{PageRenderer, RenderError};
use crate::store::{DocumentStore, PersistenceError, RecordStore};

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("no field selected")]
    NoFieldSelected,
    #[error("no placement selected")]
    NoPlacementSelected,
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("page {page} out of range (1..={count})")]
    PageOutOfRange { page: u32, count: u32 },
    #[error("page {0} has not been rendered at the current zoom")]
    PageNotRendered(u32),
    #[error("placement {0} is not on the current page")]
    NotOnCurrentPage(usize),
    #[error("a drag is in progress")]
    DragInProgress,
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Where the session is in the select / place / drag cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EditorState {
    Idle,
    Selecting,
    Placed,
    Dragging,
}

/// Part of a placement box the pointer grabbed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DragHandle {
    /// Moves the box.
    #[default]
    Body,
    /// Bottom-right corner, resizes the box.
    Corner,
}

/// Bookkeeping of one drag, from pointer-down to pointer-up.
///
/// Deltas are measured from where the pointer went down, so the placement follows the
/// pointer exactly even after it was held back at a page edge.
#[derive(Clone, Debug, PartialEq)]
pub struct DragSession {
    pub index: usize,
    pub handle: DragHandle,
    dims: PageDimensions,
    origin_client: Vector2,
    /// Position for `Body`, size for `Corner`, in percent.
    origin: Vector2,
}

impl DragSession {
    /// Percentage position (or size) the placement should have for a pointer at `client`.
    fn target(&self, client: Vector2) -> Vector2 {
        self.origin + pixel_delta_to_percent(client - self.origin_client, &self.dims)
    }
}

/// Pointer and form input the UI forwards to the session.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditorAction {
    SelectField { field_key: String },
    ClickPage { x: f64, y: f64 },
    SelectPlacement { index: usize },
    PointerDown {
        index: usize,
        client_x: f64,
        client_y: f64,
        #[serde(default)]
        handle: DragHandle,
    },
    PointerMove { client_x: f64, client_y: f64 },
    PointerUp,
    Resize { width: f64, height: f64 },
    SetFontSize { size: u32 },
    ToggleBold,
    RemoveSelected,
    GoToPage { page: u32 },
    SetZoom { scale: f64 },
    ClearSelection,
}

/// What the UI needs to draw the current page.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorView<'a> {
    pub state: EditorState,
    pub current_page: u32,
    pub page_count: u32,
    pub scale: f64,
    pub page_dims: Option<PageDimensions>,
    pub selected_field_key: Option<&'a str>,
    pub selected_placement_index: Option<usize>,
    pub placements: Vec<VisiblePlacement<'a>>,
    pub unplaced_fields: Vec<&'a str>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisiblePlacement<'a> {
    pub index: usize,
    pub field_key: &'a str,
    pub coordinates: &'a Coordinates,
}

pub struct EditorSession {
    template_id: String,
    mapping: Mapping,
    renderer: Box<dyn PageRenderer + Send + Sync>,
    scale: f64,
    current_page: u32,
    page_dims: HashMap<u32, PageDimensions>,
    selected_field: Option<String>,
    selected_placement: Option<usize>,
    drag: Option<DragSession>,
}

impl EditorSession {
    pub fn new(
        template_id: impl Into<String>,
        mapping: Mapping,
        renderer: Box<dyn PageRenderer + Send + Sync>,
        scale: f64,
    ) -> EditorSession {
        EditorSession {
            template_id: template_id.into(),
            mapping,
            renderer,
            scale,
            current_page: 1,
            page_dims: HashMap::new(),
            selected_field: None,
            selected_placement: None,
            drag: None,
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn state(&self) -> EditorState {
        if self.drag.is_some() {
            EditorState::Dragging
        } else if self.selected_placement.is_some() {
            EditorState::Placed
        } else if self.selected_field.is_some() {
            EditorState::Selecting
        } else {
            EditorState::Idle
        }
    }

    pub fn view(&self) -> EditorView<'_> {
        EditorView {
            state: self.state(),
            current_page: self.current_page,
            page_count: self.renderer.page_count(),
            scale: self.scale,
            page_dims: self.page_dims.get(&self.current_page).copied(),
            selected_field_key: self.selected_field.as_deref(),
            selected_placement_index: self.selected_placement,
            placements: self
                .mapping
                .placements_on_page(self.current_page)
                .filter_map(|(index, f)| {
                    Some(VisiblePlacement {
                        index,
                        field_key: &f.field_key,
                        coordinates: f.coordinates.as_ref()?,
                    })
                })
                .collect(),
            unplaced_fields: self.mapping.unplaced_fields(),
        }
    }

    /// Renders the current page at the session zoom and records its pixel size.
    pub fn capture_current_page(&mut self) -> Result<PageDimensions, EditorError> {
        let dims = self.renderer.render_page(self.current_page, self.scale)?;
        self.page_dims.insert(dims.page, dims);
        Ok(dims)
    }

    fn current_dims(&self) -> Result<&PageDimensions, EditorError> {
        self.page_dims
            .get(&self.current_page)
            .ok_or(EditorError::PageNotRendered(self.current_page))
    }

    fn check_on_current_page(&self, index: usize) -> Result<(), EditorError> {
        if self.mapping.coordinates(index)?.page == self.current_page {
            Ok(())
        } else {
            Err(EditorError::NotOnCurrentPage(index))
        }
    }

    fn no_drag(&self) -> Result<(), EditorError> {
        if self.drag.is_some() {
            Err(EditorError::DragInProgress)
        } else {
            Ok(())
        }
    }

    pub fn select_field(&mut self, field_key: &str) -> Result<(), EditorError> {
        self.no_drag()?;
        if !self.mapping.fields.iter().any(|f| f.field_key == field_key) {
            return Err(EditorError::UnknownField(field_key.to_string()));
        }
        log::debug!("Selected field {field_key}");
        self.selected_field = Some(field_key.to_string());
        self.selected_placement = None;
        Ok(())
    }

    /// Places the selected field where the page was clicked, in page pixels.
    pub fn click_page(&mut self, pixel: Vector2) -> Result<usize, EditorError> {
        self.no_drag()?;
        let field_key = self
            .selected_field
            .clone()
            .ok_or(EditorError::NoFieldSelected)?;
        let percent = pixel_to_percent(pixel, self.current_dims()?);
        let index = self
            .mapping
            .place_field(&field_key, self.current_page, percent);
        log::debug!(
            "Placed {} on page {} at {:.2}%, {:.2}%",
            field_key,
            self.current_page,
            percent.x,
            percent.y
        );
        self.selected_placement = Some(index);
        Ok(index)
    }

    pub fn select_placement(&mut self, index: usize) -> Result<(), EditorError> {
        self.no_drag()?;
        self.check_on_current_page(index)?;
        self.selected_field = Some(self.mapping.fields[index].field_key.clone());
        self.selected_placement = Some(index);
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), EditorError> {
        self.no_drag()?;
        self.selected_field = None;
        self.selected_placement = None;
        Ok(())
    }

    /// Starts dragging a placement. `client` is the pointer position in screen pixels.
    pub fn pointer_down(
        &mut self,
        index: usize,
        client: Vector2,
        handle: DragHandle,
    ) -> Result<(), EditorError> {
        self.no_drag()?;
        self.check_on_current_page(index)?;
        let dims = *self.current_dims()?;
        let coords = self.mapping.coordinates(index)?;
        let origin = match handle {
            DragHandle::Body => Vector2::new(coords.x, coords.y),
            DragHandle::Corner => Vector2::new(coords.width, coords.height),
        };
        self.drag = Some(DragSession {
            index,
            handle,
            dims,
            origin_client: client,
            origin,
        });
        self.selected_field = Some(self.mapping.fields[index].field_key.clone());
        self.selected_placement = Some(index);
        log::debug!("Drag start on placement {index} ({handle:?})");
        Ok(())
    }

    /// Moves or resizes the dragged placement to follow the pointer. Ignored when no drag is
    /// active.
    pub fn pointer_move(&mut self, client: Vector2) -> Result<(), EditorError> {
        let Some(drag) = &self.drag else {
            return Ok(());
        };
        let target = drag.target(client);
        let index = drag.index;
        match drag.handle {
            DragHandle::Body => {
                let current = self.mapping.coordinates(index)?;
                let (dx, dy) = (target.x - current.x, target.y - current.y);
                self.mapping.move_placement(index, dx, dy)?;
            }
            DragHandle::Corner => self.mapping.resize_placement(index, target.x, target.y)?,
        }
        Ok(())
    }

    pub fn pointer_up(&mut self) {
        if let Some(drag) = self.drag.take() {
            log::debug!("Drag end on placement {}", drag.index);
        }
    }

    fn selected(&self) -> Result<usize, EditorError> {
        self.selected_placement
            .ok_or(EditorError::NoPlacementSelected)
    }

    pub fn resize(&mut self, width: f64, height: f64) -> Result<(), EditorError> {
        let index = self.selected()?;
        self.mapping.resize_placement(index, width, height)?;
        Ok(())
    }

    pub fn set_font_size(&mut self, size: u32) -> Result<(), EditorError> {
        let index = self.selected()?;
        self.mapping.set_font_size(index, size)?;
        Ok(())
    }

    pub fn toggle_bold(&mut self) -> Result<(), EditorError> {
        let index = self.selected()?;
        self.mapping.toggle_bold(index)?;
        Ok(())
    }

    /// Takes the selected placement off its page. Indices shift, so the selection is cleared.
    pub fn remove_selected(&mut self) -> Result<(), EditorError> {
        self.no_drag()?;
        let index = self.selected()?;
        let field = &self.mapping.fields[index];
        let (key, page) = (field.field_key.clone(), self.mapping.coordinates(index)?.page);
        self.mapping.remove_placement(&key, page);
        self.selected_field = None;
        self.selected_placement = None;
        Ok(())
    }

    pub fn go_to_page(&mut self, page: u32) -> Result<(), EditorError> {
        self.no_drag()?;
        let count = self.renderer.page_count();
        if page == 0 || page > count {
            return Err(EditorError::PageOutOfRange { page, count });
        }
        self.current_page = page;
        let off_page = self
            .selected_placement
            .is_some_and(|index| self.check_on_current_page(index).is_err());
        if off_page {
            self.selected_placement = None;
        }
        Ok(())
    }

    /// Changes the zoom. Every captured page size becomes stale and is dropped.
    pub fn set_zoom(&mut self, scale: f64) -> Result<(), EditorError> {
        self.no_drag()?;
        if scale.is_finite() && scale > 0.0 {
            self.scale = scale;
            self.page_dims.clear();
        }
        Ok(())
    }

    pub fn apply(&mut self, action: EditorAction) -> Result<(), EditorError> {
        match action {
            EditorAction::SelectField { field_key } => self.select_field(&field_key),
            EditorAction::ClickPage { x, y } => self.click_page(Vector2::new(x, y)).map(|_| ()),
            EditorAction::SelectPlacement { index } => self.select_placement(index),
            EditorAction::PointerDown {
                index,
                client_x,
                client_y,
                handle,
            } => self.pointer_down(index, Vector2::new(client_x, client_y), handle),
            EditorAction::PointerMove { client_x, client_y } => {
                self.pointer_move(Vector2::new(client_x, client_y))
            }
            EditorAction::PointerUp => {
                self.pointer_up();
                Ok(())
            }
            EditorAction::Resize { width, height } => self.resize(width, height),
            EditorAction::SetFontSize { size } => self.set_font_size(size),
            EditorAction::ToggleBold => self.toggle_bold(),
            EditorAction::RemoveSelected => self.remove_selected(),
            EditorAction::GoToPage { page } => self.go_to_page(page),
            EditorAction::SetZoom { scale } => self.set_zoom(scale),
            EditorAction::ClearSelection => self.clear_selection(),
        }
    }

    /// The mapping as it should be persisted. Refused mid-drag, where the position is only
    /// partly applied.
    pub fn snapshot_for_save(&self) -> Result<Mapping, EditorError> {
        self.no_drag()?;
        Ok(self.mapping.clone())
    }

    pub async fn save<R: RecordStore, D: DocumentStore>(
        &self,
        gateway: &MappingGateway<'_, R, D>,
    ) -> Result<(), EditorError> {
        let mapping = self.snapshot_for_save()?;
        gateway.save(&self.template_id, &mapping).await?;
        Ok(())
    }
}
