//! Transports turn a [`LoadRequest`] into a stream of readiness events.
//!
//! The loader only reacts to events; it never touches sockets or files
//! itself. Dropping an event stream aborts the underlying request.

use futures::{
    StreamExt,
    stream::{self, LocalBoxStream},
};

use crate::resources::manifest::{LoadRequest, RequestType};

/// Readiness transitions reported by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Response headers arrived. `total` is the announced body length.
    Headers { total: Option<u64> },
    /// A piece of the body.
    Chunk(Vec<u8>),
    /// Media metadata is available (video/audio).
    Metadata,
    /// Media can start playing (video/audio).
    CanPlay,
    /// The body is complete.
    Finished,
}

pub type EventStream = LocalBoxStream<'static, anyhow::Result<TransportEvent>>;

/// A way of fetching resources.
pub trait Transport {
    /// Starts fetching `request`. An `Err` item is a hard failure of the resource.
    fn open(&self, request: &LoadRequest) -> EventStream;
}

/// Events a transport emits after the body of a `kind` request has arrived.
pub fn completion_events(kind: RequestType) -> Vec<TransportEvent> {
    if kind.is_playable() {
        vec![TransportEvent::Metadata, TransportEvent::CanPlay]
    } else {
        vec![TransportEvent::Finished]
    }
}

/// Directory part of a document URL: everything before the last `/`.
/// A URL without any `/` has an empty base.
pub fn base_url(url: &str) -> &str {
    url.rfind('/').map_or("", |idx| &url[..idx])
}

/// Resolves `uri` relative to a base produced by [`base_url`].
pub fn join_url(base: &str, uri: &str) -> String {
    if base.is_empty() {
        uri.to_string()
    } else {
        format!("{base}/{uri}")
    }
}

fn failed(error: anyhow::Error) -> EventStream {
    stream::iter([Err(error)]).boxed_local()
}

/// Fetches resources over HTTP. Works natively and in the browser.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Option<reqwest::Url>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative sources against `base`.
    pub fn with_base(base: &str) -> anyhow::Result<Self> {
        let base = reqwest::Url::parse(&format!("{}/", base.trim_end_matches('/')))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base: Some(base),
        })
    }

    /// Resolves relative sources against the page origin.
    #[cfg(target_arch = "wasm32")]
    pub fn from_origin() -> anyhow::Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow::anyhow!("no window available"))?;
        let origin = window
            .location()
            .origin()
            .map_err(|e| anyhow::anyhow!("could not read origin: {e:?}"))?;
        Self::with_base(&origin)
    }

    fn resolve(&self, src: &str) -> anyhow::Result<reqwest::Url> {
        match &self.base {
            Some(base) => Ok(base.join(src)?),
            None => Ok(reqwest::Url::parse(src)?),
        }
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: &LoadRequest) -> EventStream {
        let url = match self.resolve(&request.src) {
            Ok(url) => url,
            Err(e) => return failed(e),
        };
        let builder = self.client.get(url);
        #[cfg(target_arch = "wasm32")]
        let builder = if request.credentials {
            builder.fetch_credentials_include()
        } else {
            builder
        };
        let kind = request.kind;

        let response = async move {
            let response = builder.send().await?;
            if response.status() != reqwest::StatusCode::OK {
                anyhow::bail!("unexpected status {}", response.status());
            }
            Ok(response)
        };

        stream::once(response)
            .map(move |response: anyhow::Result<reqwest::Response>| match response {
                Ok(response) => {
                    let head = stream::iter([Ok(TransportEvent::Headers {
                        total: response.content_length(),
                    })]);
                    let body = response.bytes_stream().map(|chunk| {
                        chunk
                            .map(|bytes| TransportEvent::Chunk(bytes.to_vec()))
                            .map_err(anyhow::Error::from)
                    });
                    let tail = stream::iter(completion_events(kind).into_iter().map(Ok));
                    head.chain(body).chain(tail).boxed_local()
                }
                Err(e) => failed(e),
            })
            .flatten()
            .boxed_local()
    }
}

/// Reads resources from a local directory.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct FileTransport {
    root: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileTransport {
    const CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for FileTransport {
    fn default() -> Self {
        Self::new(std::path::Path::new("./").join("assets"))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Transport for FileTransport {
    fn open(&self, request: &LoadRequest) -> EventStream {
        use anyhow::Context;
        use tokio::io::AsyncReadExt;

        let path = self.root.join(&request.src);
        let kind = request.kind;
        let opened = async move {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("could not open {}", path.display()))?;
            let total = file.metadata().await?.len();
            Ok((file, total))
        };

        stream::once(opened)
            .map(move |opened: anyhow::Result<(tokio::fs::File, u64)>| match opened {
                Ok((file, total)) => {
                    let head = stream::iter([Ok(TransportEvent::Headers { total: Some(total) })]);
                    let body = stream::try_unfold(file, |mut file| async move {
                        let mut chunk = vec![0; Self::CHUNK_SIZE];
                        let read = file.read(&mut chunk).await?;
                        if read == 0 {
                            return Ok::<_, anyhow::Error>(None);
                        }
                        chunk.truncate(read);
                        Ok(Some((TransportEvent::Chunk(chunk), file)))
                    });
                    let tail = stream::iter(completion_events(kind).into_iter().map(Ok));
                    head.chain(body).chain(tail).boxed_local()
                }
                Err(e) => failed(e),
            })
            .flatten()
            .boxed_local()
    }
}
