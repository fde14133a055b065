//! Multi-resource loading sessions.
//!
//! Every request in a manifest gets a [`Loader`] that tracks its state
//! (`Data` -> `Complete` or `Data` -> `Error`), readiness and progress. The
//! session multiplexes all transport event streams on the current task and
//! completes once every loader is ready. The first hard failure aborts the
//! session and cancels every loader that is still running.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{self, Debug},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures::{
    FutureExt, StreamExt,
    future::{self, LocalBoxFuture},
    stream::{self, AbortHandle, LocalBoxStream},
};
use instant::Instant;

use crate::{
    error::{LoadError, LoadResult},
    resources::{
        manifest::{Asset, LoadRequest, Manifest, Parser, RequestType},
        transport::{Transport, TransportEvent},
    },
};

/// Loaded assets by name.
pub type Assets = HashMap<String, Asset>;

/// State of a single resource or a whole session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Data,
    Complete,
    Error,
}

/// Snapshot of a [`Loader`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoaderStatus {
    pub name: String,
    pub state: LoaderState,
    pub ready: bool,
    pub progress: f32,
}

/// Tracks one request of a session.
pub struct Loader {
    name: String,
    kind: RequestType,
    stream: bool,
    parser: Option<Parser>,
    state: LoaderState,
    ready: bool,
    progress: f32,
    total: Option<u64>,
    received: Vec<u8>,
    /// Body data started arriving.
    loading: bool,
    asset: Option<Asset>,
    has_metadata: bool,
    can_play: bool,
    abort: AbortHandle,
}

impl Loader {
    fn new(request: LoadRequest, abort: AbortHandle) -> Self {
        Self {
            name: request.name,
            kind: request.kind,
            stream: request.stream,
            parser: request.parser,
            state: LoaderState::Data,
            ready: false,
            progress: 0.0,
            total: None,
            received: Vec::new(),
            loading: false,
            asset: None,
            has_metadata: false,
            can_play: false,
            abort,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn status(&self) -> LoaderStatus {
        LoaderStatus {
            name: self.name.clone(),
            state: self.state,
            ready: self.ready,
            progress: self.progress,
        }
    }

    /// Aborts the transport and marks the loader as failed. Loaders that
    /// already finished are left untouched.
    pub fn cancel(&mut self) {
        if self.state != LoaderState::Data {
            return;
        }
        self.abort.abort();
        self.state = LoaderState::Error;
    }

    fn smooth(&mut self) {
        self.progress = 0.75 * self.progress + 0.25;
    }

    fn measure(&mut self) {
        match self.total {
            Some(total) if total > 0 => {
                let fraction = (self.received.len() as f64 / total as f64).min(1.0) as f32;
                self.progress = self.progress.max(fraction);
            }
            _ => self.smooth(),
        }
    }

    /// Applies a transport event. Returns the progress label when observers
    /// need to be notified.
    fn advance(&mut self, event: TransportEvent) -> LoadResult<Option<String>> {
        if self.state != LoaderState::Data {
            return Ok(None);
        }
        if self.kind.is_element() {
            self.advance_element(event)
        } else {
            self.advance_request(event)
        }
    }

    fn advance_request(&mut self, event: TransportEvent) -> LoadResult<Option<String>> {
        let (has_body, finished) = match event {
            TransportEvent::Headers { total } => {
                self.total = total;
                (false, false)
            }
            TransportEvent::Chunk(bytes) => {
                self.received.extend_from_slice(&bytes);
                (true, false)
            }
            TransportEvent::Finished => (true, true),
            TransportEvent::Metadata | TransportEvent::CanPlay => return Ok(None),
        };
        if !self.stream && has_body && !finished {
            // buffered bodies are parsed once complete, only the first chunk moves progress
            if self.loading {
                return Ok(None);
            }
            self.loading = true;
            self.smooth();
            return Ok(Some(self.name.clone()));
        }

        if has_body {
            let raw = self.raw_payload()?;
            self.asset = Some(self.parse_data(raw)?);
        }
        if finished {
            self.parse_done()?;
            self.state = LoaderState::Complete;
            self.received = Vec::new();
        }
        if self.stream {
            self.measure();
        } else {
            self.smooth();
        }
        self.ready = (self.stream && self.asset.is_some()) || self.state == LoaderState::Complete;
        Ok(Some(self.name.clone()))
    }

    fn advance_element(&mut self, event: TransportEvent) -> LoadResult<Option<String>> {
        match event {
            TransportEvent::Headers { total } => {
                self.total = total;
                Ok(None)
            }
            TransportEvent::Chunk(bytes) => {
                self.received.extend_from_slice(&bytes);
                if !self.stream {
                    return Ok(None);
                }
                self.measure();
                Ok(Some(self.name.clone()))
            }
            TransportEvent::Finished if !self.kind.is_playable() => self.complete_element(),
            TransportEvent::Metadata if self.kind.is_playable() => {
                self.has_metadata = true;
                if self.can_play {
                    return self.complete_element();
                }
                Ok(None)
            }
            TransportEvent::CanPlay if self.kind.is_playable() => {
                self.can_play = true;
                if self.has_metadata {
                    return self.complete_element();
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn complete_element(&mut self) -> LoadResult<Option<String>> {
        let raw = self.raw_payload()?;
        self.asset = Some(self.parse_data(raw)?);
        self.parse_done()?;
        self.state = LoaderState::Complete;
        self.progress = 1.0;
        self.ready = true;
        self.received = Vec::new();
        Ok(Some(format!("finish {}", self.name)))
    }

    fn raw_payload(&self) -> LoadResult<Asset> {
        Ok(match self.kind {
            RequestType::Text => Asset::Text(String::from_utf8_lossy(&self.received).into_owned()),
            RequestType::Binary => Asset::Binary(self.received.clone()),
            RequestType::Image => {
                let image = image::load_from_memory(&self.received).map_err(|source| {
                    LoadError::Decode {
                        name: self.name.clone(),
                        source,
                    }
                })?;
                Asset::Image(image)
            }
            RequestType::Video | RequestType::Audio => Asset::Media(self.received.clone()),
        })
    }

    fn parse_data(&mut self, raw: Asset) -> LoadResult<Asset> {
        match &mut self.parser {
            Some(parser) => (parser.on_data)(raw).map_err(|source| LoadError::Parser {
                name: self.name.clone(),
                source,
            }),
            None => Ok(raw),
        }
    }

    fn parse_done(&mut self) -> LoadResult<()> {
        let Some(on_done) = self.parser.as_mut().and_then(|p| p.on_done.as_mut()) else {
            return Ok(());
        };
        let Some(asset) = self.asset.take() else {
            return Ok(());
        };
        let asset = on_done(asset).map_err(|source| LoadError::Parser {
            name: self.name.clone(),
            source,
        })?;
        self.asset = Some(asset);
        Ok(())
    }
}

impl Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("ready", &self.ready)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

type Tagged = (usize, Option<anyhow::Result<TransportEvent>>);

#[derive(Debug)]
struct SessionState {
    state: LoaderState,
    loaders: Vec<Loader>,
}

impl SessionState {
    fn handle(&mut self, index: usize, event: Option<anyhow::Result<TransportEvent>>) -> LoadResult<Option<String>> {
        if self.state == LoaderState::Error {
            let name = self.loaders.get(index).map_or("session", |l| l.name());
            return Err(LoadError::Canceled(name.to_string()));
        }
        let Some(loader) = self.loaders.get_mut(index) else {
            return Ok(None);
        };
        match event {
            Some(Ok(event)) => loader.advance(event),
            Some(Err(e)) => Err(LoadError::transport(&loader.name, format!("{e:#}"))),
            // the event stream of this resource ended
            None => match loader.state {
                LoaderState::Error => Err(LoadError::Canceled(loader.name.clone())),
                LoaderState::Data if !loader.ready => Err(LoadError::transport(
                    &loader.name,
                    "connection closed before the resource completed",
                )),
                _ => Ok(None),
            },
        }
    }

    fn all_ready(&self) -> bool {
        self.loaders.iter().all(Loader::is_ready)
    }

    /// Average progress, every resource weighted equally.
    fn progress(&self) -> f32 {
        if self.loaders.is_empty() {
            return 1.0;
        }
        self.loaders.iter().map(Loader::progress).sum::<f32>() / self.loaders.len() as f32
    }

    fn abort(&mut self) {
        self.state = LoaderState::Error;
        self.loaders.iter_mut().for_each(Loader::cancel);
    }

    fn take_assets(&mut self) -> Assets {
        self.loaders
            .iter_mut()
            .filter_map(|loader| Some((loader.name.clone(), loader.asset.take()?)))
            .collect()
    }
}

fn start(
    transport: &dyn Transport,
    requests: Vec<LoadRequest>,
) -> (Rc<RefCell<SessionState>>, LocalBoxStream<'static, Tagged>) {
    let mut loaders = Vec::with_capacity(requests.len());
    let mut streams = Vec::with_capacity(requests.len());
    for (index, request) in requests.into_iter().enumerate() {
        log::trace!("requesting {} \"{}\" from {}", request.kind, request.name, request.src);
        let (events, abort) = stream::abortable(transport.open(&request));
        let tagged = events
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .map(move |event| (index, event));
        streams.push(tagged.boxed_local());
        loaders.push(Loader::new(request, abort));
    }
    let shared = Rc::new(RefCell::new(SessionState {
        state: LoaderState::Data,
        loaders,
    }));
    (shared, stream::select_all(streams).boxed_local())
}

/// Resolves after yielding to the executor once.
async fn yield_now() {
    let mut yielded = false;
    future::poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await
}

async fn drive(
    shared: Rc<RefCell<SessionState>>,
    mut events: LocalBoxStream<'static, Tagged>,
    on_progress: &mut dyn FnMut(f32, &str),
) -> LoadResult<Assets> {
    let started = Instant::now();
    if shared.borrow().loaders.is_empty() {
        yield_now().await;
        let mut session = shared.borrow_mut();
        if session.state == LoaderState::Error {
            return Err(LoadError::Canceled("session".to_string()));
        }
        session.state = LoaderState::Complete;
        return Ok(Assets::new());
    }

    while let Some((index, event)) = events.next().await {
        let mut session = shared.borrow_mut();
        match session.handle(index, event) {
            Err(e) => {
                session.abort();
                return Err(e);
            }
            Ok(None) => {}
            Ok(Some(label)) => {
                if session.all_ready() {
                    session.state = LoaderState::Complete;
                    log::debug!(
                        "loaded {} resources in {:?}",
                        session.loaders.len(),
                        started.elapsed()
                    );
                    return Ok(session.take_assets());
                }
                let progress = session.progress();
                drop(session);
                on_progress(progress, &label);
            }
        }
    }

    let mut session = shared.borrow_mut();
    session.abort();
    Err(LoadError::Canceled("session".to_string()))
}

type DoneCallback = Box<dyn FnOnce(Assets)>;
type ProgressCallback = Box<dyn FnMut(f32, &str)>;
type ErrorCallback = Box<dyn FnOnce(LoadError)>;

/// Manifest plus the callbacks of a callback-style [`load`].
pub struct LoadConfig {
    manifest: Manifest,
    on_done: Option<DoneCallback>,
    on_progress: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
}

impl LoadConfig {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            on_done: None,
            on_progress: None,
            on_error: None,
        }
    }

    /// Called once with every asset when all resources are ready. Required.
    pub fn on_done(mut self, on_done: impl FnOnce(Assets) + 'static) -> Self {
        self.on_done = Some(Box::new(on_done));
        self
    }

    /// Called with the average progress and a label on every state change.
    pub fn on_progress(mut self, on_progress: impl FnMut(f32, &str) + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    /// Called at most once on the first hard failure. Without it the error is logged.
    pub fn on_error(mut self, on_error: impl FnOnce(LoadError) + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn validate(&self) -> LoadResult<()> {
        if self.on_done.is_none() {
            return Err(LoadError::config("missing on_done() callback"));
        }
        self.manifest.validate()
    }
}

impl Debug for LoadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadConfig")
            .field("manifest", &self.manifest)
            .field("on_done", &self.on_done.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A running callback-style load. Nothing happens until it is polled.
#[must_use = "a load session does nothing unless it is polled or spawned"]
pub struct LoadSession {
    shared: Rc<RefCell<SessionState>>,
    future: LocalBoxFuture<'static, ()>,
}

impl LoadSession {
    pub fn state(&self) -> LoaderState {
        self.shared.borrow().state
    }

    pub fn progress(&self) -> f32 {
        self.shared.borrow().progress()
    }

    pub fn status(&self, name: &str) -> Option<LoaderStatus> {
        self.shared
            .borrow()
            .loaders
            .iter()
            .find(|loader| loader.name == name)
            .map(Loader::status)
    }

    pub fn statuses(&self) -> Vec<LoaderStatus> {
        self.shared.borrow().loaders.iter().map(Loader::status).collect()
    }

    /// Cancels a single resource. Since a session is all-or-nothing, this
    /// fails the session once it is polled again. Finished sessions are
    /// left untouched.
    pub fn cancel_resource(&self, name: &str) -> bool {
        let mut session = self.shared.borrow_mut();
        if session.state != LoaderState::Data {
            return false;
        }
        match session.loaders.iter_mut().find(|loader| loader.name == name) {
            Some(loader) if loader.state == LoaderState::Data => {
                loader.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancels every running resource.
    pub fn cancel(&self) {
        let mut session = self.shared.borrow_mut();
        if session.state == LoaderState::Data {
            session.abort();
        }
    }
}

impl Future for LoadSession {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.future.poll_unpin(cx)
    }
}

impl Debug for LoadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Validates `config` and prepares a load.
///
/// Configuration errors are returned right away, before any request is
/// issued. The returned session has to be polled (awaited or spawned); the
/// callbacks only ever run from inside that poll, so they never fire before
/// `load` returns, even for an empty manifest.
pub fn load(transport: &dyn Transport, config: LoadConfig) -> LoadResult<LoadSession> {
    config.validate()?;
    let LoadConfig {
        manifest,
        on_done,
        mut on_progress,
        on_error,
    } = config;
    let on_done = on_done.ok_or_else(|| LoadError::config("missing on_done() callback"))?;

    let (shared, events) = start(transport, manifest.into_requests());
    let future = {
        let shared = shared.clone();
        async move {
            let mut notify = |progress: f32, label: &str| {
                if let Some(on_progress) = on_progress.as_mut() {
                    on_progress(progress, label);
                }
            };
            match drive(shared, events, &mut notify).await {
                Ok(assets) => on_done(assets),
                Err(e) => match on_error {
                    Some(on_error) => on_error(e),
                    None => log::error!("load error: {e}"),
                },
            }
        }
        .boxed_local()
    };
    Ok(LoadSession { shared, future })
}

/// Fetches every request of `manifest` and resolves with all assets, or with
/// the first hard failure.
pub async fn load_assets(transport: &dyn Transport, manifest: Manifest) -> LoadResult<Assets> {
    manifest.validate()?;
    let (shared, events) = start(transport, manifest.into_requests());
    drive(shared, events, &mut |_, _| {}).await
}
