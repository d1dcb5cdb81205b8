//! Table view implementation
//!
//! A [`TableView`] ties one controller to the fetch orchestrator and the
//! row projector. Responses are only ever displayed against the state
//! that is current when they arrive.

mod projector;

pub use projector::{
    split_composite, CellValue, DisplayCell, DisplayRow, EncounterSample, ObjectName, ProjectedPage,
    ProjectionError, RowProjector, Severity, COMPOSITE_SEPARATOR,
};

use std::sync::Arc;

use arroyo_core::events::events::{PageFailed, PageLoaded, ResponseDiscarded, RowsDegraded};
use arroyo_core::{
    DatasetSummary, EventBus, ExpansionState, QueryDescriptor, RowKey, TableStateController, TableViewId,
};
use arroyo_data::{FetchOrchestrator, PageState};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the table currently shows
#[derive(Debug, Clone, PartialEq)]
pub struct TableDisplay {
    /// The state the rows belong to
    pub descriptor: QueryDescriptor,
    pub state: PageState,
    pub rows: Vec<DisplayRow>,
}

impl TableDisplay {
    fn loading(descriptor: QueryDescriptor) -> Self {
        Self {
            descriptor,
            state: PageState::Loading,
            rows: Vec::new(),
        }
    }

    pub fn total_row_count(&self) -> Option<u64> {
        self.state.page().map(|page| page.total_row_count)
    }

    pub fn summary(&self) -> Option<&DatasetSummary> {
        self.state.page().map(|page| &page.summary)
    }
}

/// A live conjunction table
pub struct TableView {
    id: TableViewId,
    controller: Arc<TableStateController>,
    fetcher: FetchOrchestrator,
    projector: RowProjector,
    events: Arc<EventBus>,
    expansion: ExpansionState,
    display: RwLock<Option<TableDisplay>>,
}

impl TableView {
    pub fn new(controller: Arc<TableStateController>, fetcher: FetchOrchestrator) -> Self {
        Self::with_events(controller, fetcher, Arc::new(EventBus::new()))
    }

    pub fn with_events(controller: Arc<TableStateController>, fetcher: FetchOrchestrator, events: Arc<EventBus>) -> Self {
        let projector = RowProjector::new(controller.shared_config());
        Self {
            id: Uuid::new_v4(),
            controller,
            fetcher,
            projector,
            events,
            expansion: ExpansionState::new(),
            display: RwLock::new(None),
        }
    }

    pub fn id(&self) -> TableViewId {
        self.id
    }

    pub fn controller(&self) -> &Arc<TableStateController> {
        &self.controller
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn projector(&self) -> &RowProjector {
        &self.projector
    }

    /// Copy of what is currently displayed
    pub fn display(&self) -> Option<TableDisplay> {
        self.display.read().clone()
    }

    /// Load the page for the current state, honouring the freshness window
    ///
    /// Updates are pull-based: a stale page stays on display after its
    /// background revalidation finishes, until the next `load` picks up
    /// the fresh entry from the cache.
    pub async fn load(&self) -> PageState {
        loop {
            let descriptor = self.controller.descriptor();
            self.begin(&descriptor);

            let state = self.fetcher.resolve(&descriptor).await;
            if !self.apply(&descriptor, &state) || !self.clamped(&state) {
                return state;
            }
        }
    }

    /// Refetch the current page ignoring the freshness window
    pub async fn refresh(&self) -> PageState {
        self.controller.request_refresh();
        let descriptor = self.controller.descriptor();
        self.begin(&descriptor);

        let state = self.fetcher.refresh(&descriptor).await;
        if self.apply(&descriptor, &state) && self.clamped(&state) {
            return self.load().await;
        }
        state
    }

    /// Flip a row's expansion; returns whether it is now expanded
    pub fn toggle_expansion(&self, key: RowKey) -> bool {
        self.expansion.toggle(key)
    }

    pub fn is_expanded(&self, key: &RowKey) -> bool {
        self.expansion.is_expanded(key)
    }

    /// Encounter samples of a displayed row, decoded only when it is expanded
    pub fn expanded_samples(&self, key: &RowKey) -> Option<Result<Vec<EncounterSample>, ProjectionError>> {
        if !self.expansion.is_expanded(key) {
            return None;
        }
        let display = self.display.read();
        let row = display.as_ref()?.rows.iter().find(|row| &row.key == key)?;
        Some(row.expansion_samples())
    }

    /// Show a loading state when switching to a state with nothing displayed yet
    fn begin(&self, descriptor: &QueryDescriptor) {
        let mut display = self.display.write();
        if *descriptor != self.controller.descriptor() {
            return;
        }
        let showing_other = display.as_ref().map(|d| &d.descriptor != descriptor).unwrap_or(true);
        if showing_other && self.fetcher.status(descriptor).page().is_none() {
            *display = Some(TableDisplay::loading(descriptor.clone()));
        }
    }

    /// Display a resolved state if it still matches the current table state
    ///
    /// The match is checked and the display written under one lock, so a
    /// late response can never land after the current one.
    fn apply(&self, descriptor: &QueryDescriptor, state: &PageState) -> bool {
        let projected = match state.page() {
            Some(page) => self.projector.project_page(page, descriptor.offset),
            None => ProjectedPage::default(),
        };
        let degraded = projected.degraded;

        let mut display = self.display.write();
        if *descriptor != self.controller.descriptor() {
            drop(display);
            warn!(
                "Discarding response for offset {}: table state changed while it was loading",
                descriptor.offset
            );
            self.events.publish(ResponseDiscarded {
                view_id: self.id,
                offset: descriptor.offset,
            });
            return false;
        }
        if state.page().is_some() {
            self.expansion.retain_visible(projected.rows.iter().map(|row| &row.key));
        }
        *display = Some(TableDisplay {
            descriptor: descriptor.clone(),
            state: state.clone(),
            rows: projected.rows,
        });
        drop(display);

        let variant = self.controller.config().variant;
        match state {
            PageState::Fresh(page) | PageState::Stale(page) => {
                info!(
                    "Loaded {} of {} rows at offset {} ({})",
                    page.rows.len(),
                    page.total_row_count,
                    descriptor.offset,
                    variant
                );
                self.events.publish(PageLoaded {
                    view_id: self.id,
                    variant,
                    offset: descriptor.offset,
                    row_count: page.rows.len(),
                    total_row_count: page.total_row_count,
                    stale: matches!(state, PageState::Stale(_)),
                });
            }
            PageState::Errored { page, message } => {
                self.events.publish(PageFailed {
                    view_id: self.id,
                    variant,
                    offset: descriptor.offset,
                    message: message.clone(),
                    has_previous: page.is_some(),
                });
            }
            PageState::Idle | PageState::Loading => {}
        }

        if degraded > 0 {
            self.events.publish(RowsDegraded {
                view_id: self.id,
                count: degraded,
            });
        }
        true
    }

    fn clamped(&self, state: &PageState) -> bool {
        match state.page() {
            Some(page) if self.controller.reconcile_total(page.total_row_count) => {
                debug!("Reloading after the page index was clamped");
                true
            }
            _ => false,
        }
    }
}
