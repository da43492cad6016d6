//! Data sources.
//!
//! A `DataSource` owns one search configuration, its paging state and the
//! consumers it feeds. Population runs in two steps:
//!
//! 1. `prepare` (synchronous): decide who needs data, build and sign the
//!    request, skip duplicates, show loading indicators
//! 2. `dispatch` (async): send the request and distribute the response
//!
//! UI handlers call `prepare` for every affected source before awaiting any
//! dispatch, so every request reflects the state at the time of the event.
//!
//! ## Ordering
//!
//! Requests carry a sequence number. A response older than the last one
//! rendered is dropped.

mod pivot;

pub use pivot::build_pivot;

use parking_lot::{Mutex, RwLock};
use quarry_core::{
    value_as_text, value_at_path, BackendError, FilterClause, Request, Response, SortSpec,
    SourceConfig, StaticClause,
};
use std::sync::Arc;
use tokio::sync::watch;

use crate::backend::SearchBackend;
use crate::consumer::{Consumer, GridConsumer, MapConsumer};
use crate::filters::FilterBoard;
use crate::notice::Notifier;
use crate::pagination::{
    CursorOutcome, PagingMode, PaginationState, DEFAULT_PAGE_SIZE,
};
use crate::panels::PanelTracker;
use crate::query::{build_query, BuiltQuery, QueryContext, QueryInputs, RowFilter};

/// Observable request state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Idle,
    RequestPending,
}

/// Why no request was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No visible consumer wants data.
    NothingToPopulate,
    /// Same request as last time.
    Duplicate,
    /// Bound to a grid selection and nothing is selected.
    NoQuery,
}

/// Result of one population pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulateOutcome {
    Rendered,
    Skipped(SkipReason),
    /// A newer response was already rendered.
    Stale,
    /// A composite page past the end was requested.
    Overrun,
    Failed(BackendError),
}

/// A prepared request waiting to be sent.
pub struct PendingRequest {
    seq: u64,
    page: u32,
    generation: u64,
    signature: String,
    request: Arc<Request>,
    loading: Vec<Arc<dyn Consumer>>,
}

impl PendingRequest {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Output of `prepare`.
pub enum Prepared {
    Dispatch(PendingRequest),
    Skipped(SkipReason),
}

/// Page-wide services shared by every source.
#[derive(Clone)]
pub struct SourceServices {
    pub backend: Arc<dyn SearchBackend>,
    pub board: Arc<FilterBoard>,
    pub query: Arc<QueryContext>,
    pub panels: Arc<PanelTracker>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Default)]
struct Links {
    /// Grid whose selected row filters this source.
    row_grid: Option<Arc<GridConsumer>>,
    /// Map whose viewport bounds the aggregation.
    bounds_map: Option<Arc<MapConsumer>>,
    /// Grids whose filter row applies to this source.
    filter_grids: Vec<Arc<GridConsumer>>,
}

struct CachedResponse {
    signature: String,
    request: Arc<Request>,
    response: Arc<Response>,
}

#[derive(Default)]
struct Latch {
    /// Signature of the last request sent.
    signature: Option<String>,
    issued: u64,
    rendered: u64,
    in_flight: usize,
    last: Option<CachedResponse>,
    /// Consumers that needed and rendered the cached response.
    served: Vec<String>,
}

pub struct DataSource {
    id: String,
    settings: RwLock<SourceConfig>,
    paging: Mutex<PaginationState>,
    consumers: RwLock<Vec<Arc<dyn Consumer>>>,
    links: RwLock<Links>,
    latch: Mutex<Latch>,
    services: SourceServices,
    status_tx: watch::Sender<SourceStatus>,
    status_rx: watch::Receiver<SourceStatus>,
}

impl DataSource {
    pub fn new(settings: SourceConfig, services: SourceServices) -> Self {
        let mode = match &settings.aggregation {
            Some(template) if template.is_composite() => PagingMode::Composite,
            _ => PagingMode::Offset,
        };
        let paging = PaginationState::new(mode, settings.size.unwrap_or(DEFAULT_PAGE_SIZE));
        let (status_tx, status_rx) = watch::channel(SourceStatus::Idle);
        Self {
            id: settings.id.clone(),
            settings: RwLock::new(settings),
            paging: Mutex::new(paging),
            consumers: RwLock::new(Vec::new()),
            links: RwLock::new(Links::default()),
            latch: Mutex::new(Latch::default()),
            services,
            status_tx,
            status_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> SourceConfig {
        self.settings.read().clone()
    }

    /// Page size used for paging and the row refresh threshold.
    pub fn size(&self) -> u32 {
        self.paging.lock().size()
    }

    pub fn status(&self) -> SourceStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SourceStatus> {
        self.status_rx.clone()
    }

    // =========================================================================
    // Wiring
    // =========================================================================

    /// Register a consumer. Responses are distributed in registration order.
    pub fn add_consumer(&self, consumer: Arc<dyn Consumer>) {
        tracing::debug!(
            "Source '{}': added {} consumer '{}'",
            self.id,
            consumer.kind(),
            consumer.id()
        );
        self.consumers.write().push(consumer);
    }

    /// Register a grid consumer. Its filter row applies to this source.
    pub fn add_grid(&self, grid: Arc<GridConsumer>) {
        self.links.write().filter_grids.push(grid.clone());
        self.add_consumer(grid);
    }

    /// Apply another grid's filter row to this source.
    pub fn link_filter_grid(&self, grid: Arc<GridConsumer>) {
        self.links.write().filter_grids.push(grid);
    }

    pub fn set_row_grid(&self, grid: Arc<GridConsumer>) {
        self.links.write().row_grid = Some(grid);
    }

    pub fn set_bounds_map(&self, map: Arc<MapConsumer>) {
        self.links.write().bounds_map = Some(map);
    }

    pub fn consumers(&self) -> Vec<Arc<dyn Consumer>> {
        self.consumers.read().clone()
    }

    // =========================================================================
    // Settings changes
    // =========================================================================

    pub fn set_sort(&self, sort: SortSpec) {
        self.settings.write().sort = sort;
    }

    /// Back to the first page. Called whenever a filter changes.
    pub fn reset_paging(&self) {
        self.paging.lock().reset();
    }

    /// Move one page forward past `rendered_rows` rows.
    pub fn page_forward(&self, rendered_rows: usize) -> bool {
        self.paging.lock().forward(rendered_rows)
    }

    pub fn page_back(&self) -> bool {
        self.paging.lock().backward()
    }

    pub fn paging(&self) -> PaginationState {
        self.paging.lock().clone()
    }

    /// Run `f` with an extra static clause in place.
    ///
    /// The clause is removed as soon as `f` returns, so it only reaches the
    /// requests `f` prepares.
    pub fn with_temporary_clause<R>(&self, clause: &FilterClause, f: impl FnOnce(&Self) -> R) -> R {
        let temporary = StaticClause::from_filter_clause(clause);
        self.settings
            .write()
            .filter_bool_clauses
            .get_mut(clause.bool_clause)
            .push(temporary.clone());

        let result = f(self);

        let mut settings = self.settings.write();
        let clauses = settings.filter_bool_clauses.get_mut(clause.bool_clause);
        if let Some(pos) = clauses.iter().rposition(|c| c == &temporary) {
            clauses.remove(pos);
        }
        result
    }

    /// Forget that `consumer_id` holds the cached response.
    ///
    /// Called when a consumer drops its rendered data, so the next pass
    /// serves it again even when the request is unchanged.
    pub fn release_consumer(&self, consumer_id: &str) {
        self.latch.lock().served.retain(|id| id != consumer_id);
    }

    /// The last request sent.
    pub fn last_request(&self) -> Option<Arc<Request>> {
        self.latch.lock().last.as_ref().map(|c| c.request.clone())
    }

    /// The last response rendered.
    pub fn last_response(&self) -> Option<Arc<Response>> {
        self.latch.lock().last.as_ref().map(|c| c.response.clone())
    }

    // =========================================================================
    // Population
    // =========================================================================

    fn is_hidden(&self, consumer: &dyn Consumer) -> bool {
        consumer
            .panel()
            .is_some_and(|panel| !self.services.panels.is_visible(&panel))
    }

    /// Build the current request without side effects.
    pub fn build_request(&self) -> BuiltQuery {
        let settings = self.settings.read();
        let paging = self.paging.lock();
        let links = self.links.read();

        let row_filter = match (&settings.row_filter, &links.row_grid) {
            (None, _) => RowFilter::Unbound,
            (Some(binding), Some(grid)) => grid
                .selected_row()
                .and_then(|row| value_at_path(&row.doc, &binding.field).map(value_as_text))
                .map(|value| RowFilter::Selected {
                    field: binding.field.clone(),
                    value,
                })
                .unwrap_or(RowFilter::NothingSelected),
            (Some(_), None) => RowFilter::NothingSelected,
        };
        let viewport = settings
            .filter_bounds_using_map
            .as_ref()
            .and(links.bounds_map.as_ref())
            .map(|map| map.viewport());
        let filter_grids: Vec<&GridConsumer> =
            links.filter_grids.iter().map(|g| g.as_ref()).collect();

        build_query(
            &self.services.query,
            QueryInputs {
                settings: &settings,
                paging: &paging,
                row_filter,
                viewport,
                board: &self.services.board,
                filter_grids: &filter_grids,
            },
        )
    }

    /// Synchronous half of population.
    pub fn prepare(&self, force: bool) -> Prepared {
        let consumers = self.consumers.read().clone();
        let mut wanting = Vec::new();
        for consumer in &consumers {
            if !consumer.needs_population(&self.id) {
                continue;
            }
            if self.is_hidden(consumer.as_ref()) {
                if let Some(panel) = consumer.panel() {
                    self.services.panels.defer(&panel, &self.id);
                }
                continue;
            }
            wanting.push(consumer.clone());
        }

        if wanting.is_empty() && !force {
            tracing::debug!("Source '{}': nothing to populate", self.id);
            return Prepared::Skipped(SkipReason::NothingToPopulate);
        }

        let request = match self.build_request() {
            BuiltQuery::Request(request) => request,
            BuiltQuery::NoQuery => {
                tracing::debug!("Source '{}': no row selected, request skipped", self.id);
                return Prepared::Skipped(SkipReason::NoQuery);
            }
        };
        let signature = request.signature();

        let mut latch = self.latch.lock();
        if !force && latch.signature.as_deref() == Some(signature.as_str()) {
            // Consumers that missed the cached response get it now.
            let mut revived = Vec::new();
            if let Some(cached) = latch.last.as_ref().filter(|c| c.signature == signature) {
                for consumer in &wanting {
                    if !latch.served.iter().any(|id| id == consumer.id()) {
                        revived.push((consumer.clone(), cached.request.clone(), cached.response.clone()));
                    }
                }
            }
            for (consumer, _, _) in &revived {
                latch.served.push(consumer.id().to_string());
            }
            drop(latch);

            tracing::debug!(
                "Source '{}': duplicate request skipped, {} consumer(s) served from cache",
                self.id,
                revived.len()
            );
            if !revived.is_empty() {
                let settings = self.settings();
                for (consumer, request, response) in revived {
                    consumer.populate(&settings, &response, &request);
                }
            }
            for consumer in &wanting {
                consumer.set_loading(false);
            }
            return Prepared::Skipped(SkipReason::Duplicate);
        }

        latch.signature = Some(signature.clone());
        latch.issued += 1;
        latch.in_flight += 1;
        let seq = latch.issued;
        drop(latch);

        for consumer in &wanting {
            consumer.set_loading(true);
        }
        self.status_tx.send_replace(SourceStatus::RequestPending);
        tracing::debug!("Source '{}': request #{} prepared", self.id, seq);

        let (page, generation) = {
            let paging = self.paging.lock();
            (paging.page(), paging.generation())
        };
        Prepared::Dispatch(PendingRequest {
            seq,
            page,
            generation,
            signature,
            request: Arc::new(request),
            loading: wanting,
        })
    }

    /// Asynchronous half of population.
    pub async fn dispatch(&self, pending: PendingRequest) -> PopulateOutcome {
        let result = self
            .services
            .backend
            .search((*pending.request).clone())
            .await
            .and_then(|response| match response.failure() {
                Some(message) => Err(BackendError::Query {
                    code: response.code,
                    message,
                }),
                None => Ok(response),
            });

        let outcome = match result {
            Ok(response) => self.render(&pending, response),
            Err(error) => self.fail(&pending, error),
        };

        for consumer in &pending.loading {
            consumer.set_loading(false);
        }
        let idle = {
            let mut latch = self.latch.lock();
            latch.in_flight = latch.in_flight.saturating_sub(1);
            latch.in_flight == 0
        };
        if idle {
            self.status_tx.send_replace(SourceStatus::Idle);
        }
        outcome
    }

    /// Prepare and dispatch.
    pub async fn populate(&self, force: bool) -> PopulateOutcome {
        match self.prepare(force) {
            Prepared::Dispatch(pending) => self.dispatch(pending).await,
            Prepared::Skipped(reason) => PopulateOutcome::Skipped(reason),
        }
    }

    fn render(&self, pending: &PendingRequest, mut response: Response) -> PopulateOutcome {
        {
            let mut latch = self.latch.lock();
            if pending.seq < latch.rendered {
                tracing::debug!(
                    "Source '{}': dropped stale response #{} (rendered #{})",
                    self.id,
                    pending.seq,
                    latch.rendered
                );
                return PopulateOutcome::Stale;
            }
            latch.rendered = pending.seq;
        }

        let settings = self.settings();
        let consumers = self.consumers();

        let cursor = match &settings.aggregation {
            Some(template) if template.is_composite() => {
                let after_key = response
                    .aggregations
                    .as_ref()
                    .and_then(|aggs| template.after_key(aggs));
                self.paging
                    .lock()
                    .record_response(pending.generation, pending.page, after_key)
            }
            _ => CursorOutcome::Ignored,
        };
        if cursor == CursorOutcome::Overrun {
            tracing::debug!("Source '{}': no data past page {}", self.id, pending.page);
            for consumer in &consumers {
                consumer.last_page_reached();
            }
            return PopulateOutcome::Overrun;
        }

        if let Some(aggs) = &response.aggregations {
            for (name, table) in &settings.tables {
                if let Some(pivot) = build_pivot(aggs, table) {
                    response.tables.insert(name.clone(), pivot);
                }
            }
        }
        let response = Arc::new(response);

        let mut served = Vec::new();
        for consumer in &consumers {
            if self.is_hidden(consumer.as_ref()) {
                if consumer.needs_population(&self.id) {
                    if let Some(panel) = consumer.panel() {
                        self.services.panels.defer(&panel, &self.id);
                    }
                }
                continue;
            }
            if consumer.needs_population(&self.id) {
                served.push(consumer.id().to_string());
            }
            consumer.populate(&settings, &response, &pending.request);
            if cursor == CursorOutcome::LastPage {
                consumer.last_page_reached();
            }
        }
        tracing::debug!(
            "Source '{}': response #{} rendered by {} consumer(s)",
            self.id,
            pending.seq,
            served.len()
        );

        let mut latch = self.latch.lock();
        latch.last = Some(CachedResponse {
            signature: pending.signature.clone(),
            request: pending.request.clone(),
            response,
        });
        latch.served = served;
        PopulateOutcome::Rendered
    }

    fn fail(&self, pending: &PendingRequest, error: BackendError) -> PopulateOutcome {
        let stale = {
            let mut latch = self.latch.lock();
            if latch.signature.as_deref() == Some(pending.signature.as_str()) {
                latch.signature = None;
            }
            pending.seq < latch.rendered
        };
        tracing::warn!("Source '{}': request #{} failed: {}", self.id, pending.seq, error);
        if !stale {
            self.services
                .notifier
                .error(&format!("Search request for '{}' failed: {}", self.id, error));
        }
        PopulateOutcome::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSearchBackend;
    use crate::consumer::ConsumerKind;
    use crate::notice::MockNotifier;
    use indexmap::IndexMap;
    use mockall::Sequence;
    use quarry_core::{
        AggregationTemplate, HitTotal, Hits, RowFilterConfig, SortField, SortOrder,
    };
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Consumer that logs every call it receives.
    struct Recorder {
        id: String,
        panel: Option<String>,
        needs: bool,
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(id: &str, needs: bool) -> Arc<Self> {
            Self::on_panel(id, None, needs)
        }

        fn on_panel(id: &str, panel: Option<&str>, needs: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                panel: panel.map(str::to_string),
                needs,
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        fn populations(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter(|e| e.starts_with("populate"))
                .collect()
        }
    }

    impl Consumer for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> ConsumerKind {
            ConsumerKind::Grid
        }

        fn panel(&self) -> Option<String> {
            self.panel.clone()
        }

        fn needs_population(&self, _source: &str) -> bool {
            self.needs
        }

        fn populate(&self, _settings: &SourceConfig, response: &Response, _request: &Request) {
            self.events
                .lock()
                .push(format!("populate:{}", response.hits.total.value()));
        }

        fn set_loading(&self, loading: bool) {
            self.events.lock().push(format!("loading:{}", loading));
        }

        fn last_page_reached(&self) {
            self.events.lock().push("last_page".to_string());
        }
    }

    fn response(total: u64) -> Response {
        Response {
            hits: Hits {
                hits: vec![],
                total: HitTotal::Count(total),
            },
            ..Default::default()
        }
    }

    fn settings() -> SourceConfig {
        SourceConfig {
            id: "records".to_string(),
            size: Some(30),
            sort: IndexMap::new(),
            filter_bool_clauses: Default::default(),
            row_filter: None,
            filter_bounds_using_map: None,
            aggregation: None,
            aggregation_map_mode: Default::default(),
            tables: IndexMap::new(),
            initial_map_bounds: false,
        }
    }

    fn composite_settings() -> SourceConfig {
        let mut template = AggregationTemplate::new(json!({
            "by_species": { "composite": { "size": 50, "sources": [] } }
        }));
        template.composite = Some("by_species".to_string());
        SourceConfig {
            aggregation: Some(template),
            ..settings()
        }
    }

    fn services(backend: MockSearchBackend, notifier: MockNotifier) -> SourceServices {
        SourceServices {
            backend: Arc::new(backend),
            board: Arc::new(FilterBoard::new()),
            query: Arc::new(QueryContext::default()),
            panels: Arc::new(PanelTracker::new()),
            notifier: Arc::new(notifier),
        }
    }

    fn quiet() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_error().never();
        notifier
    }

    fn signature(source: &DataSource) -> String {
        source.last_request().map(|r| r.signature()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_unchanged_state_sends_one_request() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .times(1)
            .returning(|_| Box::pin(async { Ok(response(5)) }));

        let source = DataSource::new(settings(), services(backend, quiet()));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());

        assert_eq!(source.populate(false).await, PopulateOutcome::Rendered);
        assert_eq!(
            source.populate(false).await,
            PopulateOutcome::Skipped(SkipReason::Duplicate)
        );
        assert_eq!(
            grid.events(),
            vec!["loading:true", "populate:5", "loading:false", "loading:false"]
        );
        assert_eq!(source.status(), SourceStatus::Idle);
    }

    #[tokio::test]
    async fn test_force_bypasses_duplicate_check() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .times(2)
            .returning(|_| Box::pin(async { Ok(response(5)) }));

        let source = DataSource::new(settings(), services(backend, quiet()));
        source.add_consumer(Recorder::new("grid", true));
        source.populate(false).await;
        assert_eq!(source.populate(true).await, PopulateOutcome::Rendered);
    }

    #[tokio::test]
    async fn test_disabled_consumer_gets_no_indicator() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .times(1)
            .returning(|_| Box::pin(async { Ok(response(5)) }));

        let source = DataSource::new(settings(), services(backend, quiet()));
        let grid = Recorder::new("grid", true);
        let map = Recorder::new("map", false);
        source.add_consumer(grid.clone());
        source.add_consumer(map.clone());

        source.populate(false).await;
        assert_eq!(grid.populations(), vec!["populate:5"]);
        assert_eq!(map.events(), vec!["populate:5"]);
    }

    #[tokio::test]
    async fn test_nothing_needs_population() {
        let backend = MockSearchBackend::new();
        let source = DataSource::new(settings(), services(backend, quiet()));
        let download = Recorder::new("download", false);
        source.add_consumer(download.clone());

        assert_eq!(
            source.populate(false).await,
            PopulateOutcome::Skipped(SkipReason::NothingToPopulate)
        );
        assert!(download.events().is_empty());
    }

    #[tokio::test]
    async fn test_failure_notifies_once_and_releases_latch() {
        let mut backend = MockSearchBackend::new();
        let mut seq = Sequence::new();
        backend
            .expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Box::pin(async { Err(BackendError::Transport("connection reset".to_string())) })
            });
        backend
            .expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Box::pin(async { Ok(response(2)) }));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_error()
            .withf(|message| message.contains("connection reset"))
            .times(1)
            .return_const(());

        let source = DataSource::new(settings(), services(backend, notifier));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());

        assert!(matches!(
            source.populate(false).await,
            PopulateOutcome::Failed(BackendError::Transport(_))
        ));
        assert_eq!(grid.events(), vec!["loading:true", "loading:false"]);
        assert_eq!(source.status(), SourceStatus::Idle);

        assert_eq!(source.populate(false).await, PopulateOutcome::Rendered);
        assert_eq!(grid.populations(), vec!["populate:2"]);
    }

    #[tokio::test]
    async fn test_error_payload_is_a_failure() {
        let mut backend = MockSearchBackend::new();
        backend.expect_search().returning(|_| {
            Box::pin(async {
                Ok(Response {
                    code: Some(500),
                    ..Default::default()
                })
            })
        });
        let mut notifier = MockNotifier::new();
        notifier.expect_error().times(1).return_const(());

        let source = DataSource::new(settings(), services(backend, notifier));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());

        assert!(matches!(
            source.populate(false).await,
            PopulateOutcome::Failed(BackendError::Query {
                code: Some(500),
                ..
            })
        ));
        assert!(grid.populations().is_empty());
    }

    #[tokio::test]
    async fn test_stale_response_dropped() {
        let mut backend = MockSearchBackend::new();
        backend.expect_search().times(2).returning(|request| {
            let slow = request.sort.is_empty();
            Box::pin(async move {
                if slow {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(response(1))
                } else {
                    Ok(response(2))
                }
            })
        });

        let source = DataSource::new(settings(), services(backend, quiet()));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());

        let Prepared::Dispatch(first) = source.prepare(false) else {
            panic!("expected a request");
        };
        source.set_sort(
            [(
                "id".to_string(),
                SortField {
                    order: SortOrder::Desc,
                },
            )]
            .into_iter()
            .collect(),
        );
        let Prepared::Dispatch(second) = source.prepare(false) else {
            panic!("expected a request");
        };
        assert!(second.seq() > first.seq());

        let (old, new) = tokio::join!(source.dispatch(first), source.dispatch(second));
        assert_eq!(old, PopulateOutcome::Stale);
        assert_eq!(new, PopulateOutcome::Rendered);
        assert_eq!(grid.populations(), vec!["populate:2"]);
    }

    #[tokio::test]
    async fn test_hidden_consumer_served_from_cache() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .times(1)
            .returning(|_| Box::pin(async { Ok(response(5)) }));

        let services = services(backend, quiet());
        let panels = services.panels.clone();
        panels.hide("tab-map");

        let source = DataSource::new(settings(), services);
        let grid = Recorder::new("grid", true);
        let map = Recorder::on_panel("map", Some("tab-map"), true);
        source.add_consumer(grid.clone());
        source.add_consumer(map.clone());

        assert_eq!(source.populate(false).await, PopulateOutcome::Rendered);
        assert!(map.events().is_empty());
        assert_eq!(panels.pending("tab-map"), 1);

        assert_eq!(panels.show("tab-map"), vec!["records".to_string()]);
        assert_eq!(
            source.populate(false).await,
            PopulateOutcome::Skipped(SkipReason::Duplicate)
        );
        assert_eq!(map.events(), vec!["populate:5", "loading:false"]);
        assert_eq!(grid.populations(), vec!["populate:5"]);
    }

    #[tokio::test]
    async fn test_only_hidden_consumers_defer() {
        let backend = MockSearchBackend::new();
        let services = services(backend, quiet());
        let panels = services.panels.clone();
        panels.hide("tab-grid");

        let source = DataSource::new(settings(), services);
        source.add_consumer(Recorder::on_panel("grid", Some("tab-grid"), true));
        assert_eq!(
            source.populate(false).await,
            PopulateOutcome::Skipped(SkipReason::NothingToPopulate)
        );
        assert_eq!(panels.pending("tab-grid"), 1);
    }

    fn composite_backend(last_page: u64) -> MockSearchBackend {
        let mut backend = MockSearchBackend::new();
        backend.expect_search().returning(move |request| {
            let page = request
                .aggs
                .as_ref()
                .and_then(|aggs| aggs.pointer("/by_species/composite/after/p"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let aggregations = if page < last_page {
                json!({ "by_species": { "after_key": { "p": page + 1 }, "buckets": [] } })
            } else {
                json!({ "by_species": { "buckets": [] } })
            };
            Box::pin(async move {
                Ok(Response {
                    aggregations: Some(aggregations),
                    ..Default::default()
                })
            })
        });
        backend
    }

    #[tokio::test]
    async fn test_composite_forward_then_back_repeats_signatures() {
        let source = DataSource::new(composite_settings(), services(composite_backend(10), quiet()));
        source.add_consumer(Recorder::new("grid", true));

        source.populate(false).await;
        let mut forward = vec![signature(&source)];
        for _ in 0..2 {
            assert!(source.page_forward(0));
            assert_eq!(source.populate(false).await, PopulateOutcome::Rendered);
            forward.push(signature(&source));
        }
        let mut back = vec![signature(&source)];
        for _ in 0..2 {
            assert!(source.page_back());
            assert_eq!(source.populate(false).await, PopulateOutcome::Rendered);
            back.push(signature(&source));
        }
        back.reverse();
        assert_eq!(forward, back);
        assert_ne!(forward[0], forward[1]);
    }

    #[tokio::test]
    async fn test_composite_overrun_rolls_back() {
        let source = DataSource::new(composite_settings(), services(composite_backend(1), quiet()));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());

        source.populate(false).await;
        assert!(source.page_forward(0));
        assert_eq!(source.populate(false).await, PopulateOutcome::Overrun);

        let paging = source.paging();
        assert_eq!(paging.page(), 0);
        assert!(!paging.has_next_cursor());
        assert!(!source.page_forward(0));
        assert_eq!(grid.populations().len(), 1);
        assert!(grid.events().contains(&"last_page".to_string()));
    }

    #[tokio::test]
    async fn test_filter_change_clears_cursors() {
        let source = DataSource::new(composite_settings(), services(composite_backend(10), quiet()));
        source.add_consumer(Recorder::new("grid", true));
        source.populate(false).await;
        assert!(source.page_forward(0));
        source.reset_paging();
        assert_eq!(source.paging().page(), 0);
        assert!(!source.paging().has_next_cursor());
    }

    #[tokio::test]
    async fn test_page_response_after_reset_does_not_roll_back() {
        let source = DataSource::new(composite_settings(), services(composite_backend(1), quiet()));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());
        source.populate(false).await;

        assert!(source.page_forward(0));
        let Prepared::Dispatch(old_page) = source.prepare(false) else {
            panic!("expected a request");
        };
        source.reset_paging();

        assert_eq!(source.dispatch(old_page).await, PopulateOutcome::Rendered);
        assert!(!grid.events().contains(&"last_page".to_string()));
        assert_eq!(source.paging().page(), 0);
        assert!(!source.paging().has_next_cursor());

        assert_eq!(source.populate(false).await, PopulateOutcome::Rendered);
        assert!(source.page_forward(0));
    }

    #[test]
    fn test_temporary_clause_only_in_prepared_request() {
        let source = DataSource::new(settings(), services(MockSearchBackend::new(), quiet()));
        source.add_consumer(Recorder::new("grid", true));

        let clause = FilterClause::exclude_ids(&["a1".to_string(), "b2".to_string()]);
        let prepared = source.with_temporary_clause(&clause, |s| s.prepare(true));
        let Prepared::Dispatch(pending) = prepared else {
            panic!("expected a request");
        };
        assert!(pending.request().bool_queries.contains(&clause));
        assert!(source.settings().filter_bool_clauses.must_not.is_empty());
    }

    #[tokio::test]
    async fn test_row_filter_without_selection_skips() {
        let mut settings = settings();
        settings.row_filter = Some(RowFilterConfig {
            grid: "species-grid".to_string(),
            field: "key".to_string(),
        });
        let source = DataSource::new(settings, services(MockSearchBackend::new(), quiet()));
        let grid = Recorder::new("grid", true);
        source.add_consumer(grid.clone());

        assert_eq!(
            source.populate(false).await,
            PopulateOutcome::Skipped(SkipReason::NoQuery)
        );
        assert!(grid.events().is_empty());
    }
}
