//! Per-kind lifecycle of diagram views.
//!
//! Each document moves through Absent, Creating and Active. Creation waits for
//! the application shell, then builds the session and view while holding the
//! slot lock, so a close racing with an open either cancels the creation or
//! tears the finished view down; it never leaves a session behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use diagram_protocol::{DiagramKind, DocumentRef};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, OnceCell};
use tracing::{debug, info};

use crate::{
    ApplicationShell, BridgeError, BridgeResult, Connector, DiagramConfiguration, DiagramView,
    SessionRegistry,
};

const OPENED_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Absent,
    Creating,
    Active,
}

struct Slot {
    generation: u64,
    cell: Arc<OnceCell<Arc<DiagramView>>>,
    view: Option<Arc<DiagramView>>,
}

type Slots = HashMap<DocumentRef, Slot>;

#[derive(Clone)]
pub struct DiagramManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    configuration: DiagramConfiguration,
    registry: Arc<SessionRegistry>,
    connector: Connector,
    shell: watch::Sender<Option<Arc<dyn ApplicationShell>>>,
    slots: Mutex<Slots>,
    opened: broadcast::Sender<DocumentRef>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

impl DiagramManager {
    pub fn new(
        configuration: DiagramConfiguration,
        registry: Arc<SessionRegistry>,
        connector: Connector,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                configuration,
                registry,
                connector,
                shell: watch::channel(None).0,
                slots: Mutex::new(HashMap::new()),
                opened: broadcast::channel(OPENED_EVENT_CAPACITY).0,
                next_generation: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> String {
        format!("{}-diagram-opener", self.inner.configuration.kind)
    }

    pub fn kind(&self) -> &DiagramKind {
        &self.inner.configuration.kind
    }

    pub fn configuration(&self) -> &DiagramConfiguration {
        &self.inner.configuration
    }

    /// Open priority for `document`; zero means this manager declines it.
    pub fn can_handle(&self, document: &DocumentRef) -> u32 {
        if self.inner.configuration.claims(document) {
            self.inner.configuration.open_priority
        } else {
            0
        }
    }

    /// Supplies the shell. Opens issued earlier wait for this call.
    pub fn on_start(&self, shell: Arc<dyn ApplicationShell>) {
        self.inner.shell.send_replace(Some(shell));
        info!(target: "diagram.manager", kind = %self.kind(), "diagram manager started");
    }

    pub fn subscribe_opened(&self) -> broadcast::Receiver<DocumentRef> {
        self.inner.opened.subscribe()
    }

    /// Returns the view for `document`, creating it on first use, and brings
    /// it to front.
    pub async fn open(&self, document: &DocumentRef) -> BridgeResult<Arc<DiagramView>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }
        let (generation, cell) = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(document.clone()).or_insert_with(|| Slot {
                generation: self.inner.next_generation.fetch_add(1, Ordering::Relaxed),
                cell: Arc::new(OnceCell::new()),
                view: None,
            });
            (slot.generation, Arc::clone(&slot.cell))
        };

        let view = cell
            .get_or_try_init(|| self.create_view(document, generation))
            .await?
            .clone();

        if !self.inner.is_current(document, generation) {
            view.dispose();
            return Err(BridgeError::ViewClosed(document.clone()));
        }

        let shell = self.inner.wait_for_shell().await?;
        shell.activate(view.id());
        let _ = self.inner.opened.send(document.clone());
        debug!(
            target: "diagram.manager",
            view = %view.id(),
            document = %document,
            "diagram opened"
        );
        Ok(view)
    }

    async fn create_view(
        &self,
        document: &DocumentRef,
        generation: u64,
    ) -> BridgeResult<Arc<DiagramView>> {
        let shell = self.inner.wait_for_shell().await?;

        let view = {
            let mut slots = self.inner.slots.lock();
            let slot = slots
                .get_mut(document)
                .filter(|slot| slot.generation == generation)
                .ok_or_else(|| BridgeError::ViewClosed(document.clone()))?;

            let session = self
                .inner
                .registry
                .get_or_create(document, &self.inner.configuration.kind);
            let teardown = {
                let manager = Arc::downgrade(&self.inner);
                let document = document.clone();
                Box::new(move || teardown_from_view(manager, &document, generation))
            };
            let view = Arc::new(DiagramView::new(&self.inner.configuration, session, teardown));
            slot.view = Some(Arc::clone(&view));
            view
        };

        shell.add_view(Arc::clone(&view));
        info!(
            target: "diagram.manager",
            view = %view.id(),
            document = %document,
            label = %view.label(),
            "diagram view created"
        );
        Ok(view)
    }

    /// Close the view for `document`, or cancel its in-flight creation.
    /// Returns whether anything was open.
    pub fn close(&self, document: &DocumentRef) -> bool {
        let mut slots = self.inner.slots.lock();
        let Some(slot) = slots.remove(document) else {
            return false;
        };
        if let Some(view) = slot.view {
            view.disarm();
            self.inner.release(&mut slots, &view, slot.generation);
        } else {
            debug!(target: "diagram.manager", document = %document, "creation cancelled");
        }
        true
    }

    pub fn view_state(&self, document: &DocumentRef) -> ViewState {
        match self.inner.slots.lock().get(document) {
            None => ViewState::Absent,
            Some(slot) if slot.cell.initialized() => ViewState::Active,
            Some(_) => ViewState::Creating,
        }
    }

    pub fn find_view(&self, document: &DocumentRef) -> Option<Arc<DiagramView>> {
        self.inner
            .slots
            .lock()
            .get(document)
            .and_then(|slot| slot.cell.get().cloned())
    }

    pub fn open_documents(&self) -> Vec<DocumentRef> {
        self.inner.slots.lock().keys().cloned().collect()
    }

    /// Close every view and refuse further opens. Returns how many closed.
    pub fn shutdown(&self) -> usize {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let documents = self.open_documents();
        let closed = documents.iter().filter(|document| self.close(document)).count();
        info!(target: "diagram.manager", kind = %self.kind(), closed, "diagram manager shut down");
        closed
    }
}

impl ManagerInner {
    async fn wait_for_shell(&self) -> BridgeResult<Arc<dyn ApplicationShell>> {
        let mut shell = self.shell.subscribe();
        let ready = shell
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BridgeError::ShuttingDown)?;
        ready.clone().ok_or(BridgeError::ShuttingDown)
    }

    fn is_current(&self, document: &DocumentRef, generation: u64) -> bool {
        self.slots
            .lock()
            .get(document)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Slot removal, then detach, then registry removal. Runs under the slot
    /// lock so a concurrent open cannot pick up the session being released.
    fn release(&self, slots: &mut Slots, view: &DiagramView, generation: u64) {
        if slots
            .get(view.document())
            .is_some_and(|slot| slot.generation == generation)
        {
            slots.remove(view.document());
        }
        self.connector.detach(view.session());
        self.registry.remove(view.document(), view.kind());
        info!(
            target: "diagram.manager",
            view = %view.id(),
            document = %view.document(),
            "diagram view closed"
        );
    }
}

fn teardown_from_view(manager: Weak<ManagerInner>, document: &DocumentRef, generation: u64) {
    let Some(manager) = manager.upgrade() else {
        return;
    };
    let mut slots = manager.slots.lock();
    let view = slots
        .get(document)
        .filter(|slot| slot.generation == generation)
        .and_then(|slot| slot.view.clone());
    match view {
        Some(view) => manager.release(&mut slots, &view, generation),
        None => debug!(
            target: "diagram.manager",
            document = %document,
            "view already released"
        ),
    }
}
