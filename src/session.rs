//! UI-side workflow sequencing over the worker channel and idle queue.
//!
//! Owns no protocol logic: readiness -> configure, document load -> page
//! count -> render every page (materialized through the idle queue, ordered
//! by page number rather than arrival order), single-page navigation, and
//! resize delegation to the pan/zoom collaborator.

use crate::channel::{ListenerId, WorkerChannel};
use crate::error::ChannelError;
use crate::idle::IdleTaskQueue;
use crate::message::READY_METHOD;
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::watch;

/// Engine methods driven by the session workflow.
pub const LOAD_DATA: &str = "loadData";
pub const GET_PAGE_COUNT: &str = "getPageCount";
pub const RENDER_TO_SVG: &str = "renderToSVG";
pub const SET_OPTIONS: &str = "setOptions";

/// Pan/zoom collaborator (consumed interface).
pub trait PanZoomView {
    /// Rebuild the view over freshly rendered output.
    fn reinitialize(&mut self);

    /// Re-fit the view after a viewport resize.
    fn resize(&mut self);
}

/// One rendering session: a channel, its idle queue, and the workflow state
/// the UI observes. Control-thread only.
pub struct RenderSession {
    channel: Arc<WorkerChannel>,
    queue: IdleTaskQueue,
    view: Rc<RefCell<dyn PanZoomView>>,
    ready_rx: watch::Receiver<bool>,
    ready_listener: ListenerId,
    loading: watch::Sender<bool>,
    engine_methods: Arc<Mutex<Vec<String>>>,
    pages: Rc<RefCell<Vec<Option<JsonValue>>>>,
    primary: Rc<RefCell<Option<JsonValue>>>,
    page_count: Cell<u32>,
    current_page: Cell<u32>,
}

impl RenderSession {
    /// Attach a session to its channel.
    ///
    /// Registers the readiness listener; call before first yielding to the
    /// runtime so the host's ready notification cannot be missed. On
    /// readiness the engine is configured with `options` (fire-and-forget;
    /// a failure is logged).
    pub fn new(
        channel: Arc<WorkerChannel>,
        queue: IdleTaskQueue,
        view: Rc<RefCell<dyn PanZoomView>>,
        options: JsonValue,
    ) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        let (loading, _) = watch::channel(false);
        let engine_methods = Arc::new(Mutex::new(Vec::new()));

        let ready_listener = {
            let methods = engine_methods.clone();
            let configure_channel = channel.clone();
            channel.add_listener(READY_METHOD, move |data| {
                if let Some(names) = data.as_array() {
                    *methods.lock() = names
                        .iter()
                        .filter_map(|name| name.as_str().map(str::to_owned))
                        .collect();
                }
                ready_tx.send_replace(true);

                // Configure as soon as the engine is up. The call message is
                // posted here, synchronously; only the reply is deferred.
                let configure =
                    configure_channel.call(SET_OPTIONS, vec![options.clone()], None);
                tokio::spawn(async move {
                    if let Err(err) = configure.await {
                        log::error!("engine configuration failed: {err}");
                    }
                });
            })
        };

        Self {
            channel,
            queue,
            view,
            ready_rx,
            ready_listener,
            loading,
            engine_methods,
            pages: Rc::new(RefCell::new(Vec::new())),
            primary: Rc::new(RefCell::new(None)),
            page_count: Cell::new(0),
            current_page: Cell::new(1),
        }
    }

    /// Wait until the engine host has announced readiness. Returns false if
    /// the channel was destroyed first.
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.ready_rx.clone();
        rx.wait_for(|ready| *ready).await.is_ok()
    }

    /// Load a document and render every page.
    ///
    /// Pages are rendered concurrently; each result is routed through the
    /// idle queue into its page-number slot, so the materialized sequence is
    /// ordered by page regardless of completion order. When every render has
    /// settled, the loading flag clears and the pan/zoom view is rebuilt
    /// once over the full output.
    ///
    /// On failure the loading flag intentionally stays set; the error is
    /// logged and returned.
    pub async fn load_document(&self, contents: &str) -> Result<u32, ChannelError> {
        self.loading.send_replace(true);

        self.channel
            .call(LOAD_DATA, vec![JsonValue::from(contents)], None)
            .await
            .map_err(|err| fail("document load", err))?;

        let count_value = self
            .channel
            .call(GET_PAGE_COUNT, vec![], None)
            .await
            .map_err(|err| fail("page count", err))?;
        let count = count_value.as_u64().unwrap_or(0) as u32;

        self.page_count.set(count);
        self.current_page.set(1);
        *self.pages.borrow_mut() = vec![None; count as usize];
        *self.primary.borrow_mut() = None;

        // Issue every render call up front; replies may land in any order.
        let renders: Vec<_> = (1..=count)
            .map(|page| {
                (
                    page,
                    self.channel.call(RENDER_TO_SVG, vec![json!(page)], None),
                )
            })
            .collect();

        for (page, render) in renders {
            let data = render
                .await
                .map_err(|err| fail("page render", err))?;
            if page == 1 {
                *self.primary.borrow_mut() = Some(data.clone());
            }
            let pages = self.pages.clone();
            self.queue.add_task(move || {
                pages.borrow_mut()[(page - 1) as usize] = Some(data);
            });
        }

        self.loading.send_replace(false);
        self.view.borrow_mut().reinitialize();
        Ok(count)
    }

    /// Re-render a single page as the primary view and re-sync pan/zoom.
    pub async fn show_page(&self, page: u32) -> Result<(), ChannelError> {
        self.current_page.set(page);
        self.loading.send_replace(true);

        let data = self
            .channel
            .call(RENDER_TO_SVG, vec![json!(page)], None)
            .await
            .map_err(|err| fail("page render", err))?;
        *self.primary.borrow_mut() = Some(data);

        self.loading.send_replace(false);
        self.view.borrow_mut().reinitialize();
        Ok(())
    }

    /// Zero-argument engine query, e.g. `getOptions` or `getMEI`.
    pub fn query(
        &self,
        method: &str,
    ) -> impl Future<Output = Result<JsonValue, ChannelError>> + 'static {
        self.channel.call(method, vec![], None)
    }

    /// Delegate a viewport resize to the pan/zoom collaborator.
    pub fn handle_resize(&self) {
        self.view.borrow_mut().resize();
    }

    /// True while rendered results await idle-time materialization.
    pub fn has_deferred_work(&self) -> bool {
        self.queue.has_pending_tasks()
    }

    /// Observable loading flag.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Observable readiness flag.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Method names announced by the engine host, empty before readiness.
    pub fn engine_methods(&self) -> Vec<String> {
        self.engine_methods.lock().clone()
    }

    /// Rendered pages in page order; unmaterialized slots are `None` until
    /// the idle queue drains.
    pub fn pages(&self) -> Vec<Option<JsonValue>> {
        self.pages.borrow().clone()
    }

    /// The primary (currently displayed) page payload.
    pub fn primary_view(&self) -> Option<JsonValue> {
        self.primary.borrow().clone()
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.get()
    }

    pub fn current_page(&self) -> u32 {
        self.current_page.get()
    }

    /// Detach from the channel and destroy it along with any deferred work.
    pub fn close(&self) {
        self.channel.remove_listener(self.ready_listener);
        self.queue.clear();
        self.channel.destroy();
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn fail(stage: &str, err: ChannelError) -> ChannelError {
    log::error!("{stage} failed: {err}");
    err
}
