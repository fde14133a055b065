//! Load requests and manifests.
//!
//! A manifest maps asset names to [`LoadRequest`]s. Requests built in code are
//! typed and cannot carry unknown keys; manifests coming from JSON are checked
//! by [`Manifest::from_json`] before anything is fetched.

use std::fmt::{self, Debug};

use image::DynamicImage;
use serde_json::Value;

use crate::error::{LoadError, LoadResult};

/// How a resource is fetched and what kind of asset it produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RequestType {
    #[default]
    Text,
    Binary,
    Image,
    Video,
    Audio,
}

impl RequestType {
    pub const ALL: [RequestType; 5] = [
        RequestType::Text,
        RequestType::Binary,
        RequestType::Image,
        RequestType::Video,
        RequestType::Audio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Text => "text",
            RequestType::Binary => "binary",
            RequestType::Image => "image",
            RequestType::Video => "video",
            RequestType::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Image, video and audio loads behave like media elements: they only
    /// become ready on their completion events.
    pub fn is_element(self) -> bool {
        matches!(
            self,
            RequestType::Image | RequestType::Video | RequestType::Audio
        )
    }

    /// Video and audio wait for both "has metadata" and "can play".
    pub fn is_playable(self) -> bool {
        matches!(self, RequestType::Video | RequestType::Audio)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded (and possibly parsed) asset.
#[derive(Clone, Debug)]
pub enum Asset {
    Text(String),
    Binary(Vec<u8>),
    Image(DynamicImage),
    /// Encoded audio or video payload.
    Media(Vec<u8>),
    Json(Value),
}

impl Asset {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Asset::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Asset::Binary(bytes) | Asset::Media(bytes) => Some(bytes),
            Asset::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Asset::Binary(bytes) | Asset::Media(bytes) => Some(bytes),
            Asset::Text(text) => Some(text.into_bytes()),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<DynamicImage> {
        match self {
            Asset::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Asset::Json(json) => Some(json),
            _ => None,
        }
    }
}

type Hook = Box<dyn FnMut(Asset) -> anyhow::Result<Asset>>;

/// Post-processing hooks of a request.
///
/// `on_data` transforms the raw payload whenever it becomes available,
/// `on_done` may replace the asset once the resource completes. An error from
/// either hook aborts the whole session.
pub struct Parser {
    pub(crate) on_data: Hook,
    pub(crate) on_done: Option<Hook>,
}

impl Parser {
    pub fn new(on_data: impl FnMut(Asset) -> anyhow::Result<Asset> + 'static) -> Self {
        Self {
            on_data: Box::new(on_data),
            on_done: None,
        }
    }

    pub fn on_done(mut self, on_done: impl FnMut(Asset) -> anyhow::Result<Asset> + 'static) -> Self {
        self.on_done = Some(Box::new(on_done));
        self
    }

    /// Parses a text payload as JSON.
    pub fn json() -> Self {
        Self::new(|asset| {
            let value = match &asset {
                Asset::Text(text) => serde_json::from_str(text)?,
                Asset::Binary(bytes) => serde_json::from_slice(bytes)?,
                other => anyhow::bail!("cannot parse {other:?} as JSON"),
            };
            Ok(Asset::Json(value))
        })
    }
}

impl Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("on_done", &self.on_done.is_some())
            .finish_non_exhaustive()
    }
}

/// A single named resource to fetch.
#[derive(Debug)]
pub struct LoadRequest {
    pub name: String,
    pub kind: RequestType,
    pub src: String,
    pub stream: bool,
    pub credentials: bool,
    pub parser: Option<Parser>,
}

impl LoadRequest {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            kind: RequestType::default(),
            src: src.into(),
            stream: false,
            credentials: false,
            parser: None,
        }
    }

    pub fn kind(mut self, kind: RequestType) -> Self {
        self.kind = kind;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn parser(mut self, parser: Parser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub(crate) fn validate(&self) -> LoadResult<()> {
        if self.src.is_empty() {
            return Err(LoadError::config(format!(
                "missing src for asset \"{}\"",
                self.name
            )));
        }
        Ok(())
    }
}

impl From<&str> for LoadRequest {
    fn from(src: &str) -> Self {
        LoadRequest::new(src)
    }
}

impl From<String> for LoadRequest {
    fn from(src: String) -> Self {
        LoadRequest::new(src)
    }
}

const REQUEST_KEYS: [&str; 4] = ["type", "src", "stream", "credentials"];

/// Named requests, kept in insertion order. Requests are issued in this order.
#[derive(Debug, Default)]
pub struct Manifest {
    requests: Vec<LoadRequest>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the request called `name`.
    pub fn insert(&mut self, name: impl Into<String>, request: impl Into<LoadRequest>) {
        let mut request = request.into();
        request.name = name.into();
        match self.requests.iter_mut().find(|r| r.name == request.name) {
            Some(existing) => *existing = request,
            None => self.requests.push(request),
        }
    }

    pub fn with(mut self, name: impl Into<String>, request: impl Into<LoadRequest>) -> Self {
        self.insert(name, request);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LoadRequest> {
        self.requests.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadRequest> {
        self.requests.iter()
    }

    pub(crate) fn into_requests(self) -> Vec<LoadRequest> {
        self.requests
    }

    pub(crate) fn validate(&self) -> LoadResult<()> {
        self.requests.iter().try_for_each(LoadRequest::validate)
    }

    /// Reads a manifest from JSON.
    ///
    /// Entries are either a URL string or an object with the keys `type`,
    /// `src`, `stream` and `credentials`. Unknown keys, a missing `src`,
    /// wrongly typed values and unknown types are rejected. Parser hooks
    /// cannot be expressed in JSON; attach them with [`Manifest::insert`].
    pub fn from_json(value: &Value) -> LoadResult<Self> {
        let Value::Object(entries) = value else {
            return Err(LoadError::config("missing manifest"));
        };
        let mut manifest = Manifest::new();
        for (name, entry) in entries {
            let request = match entry {
                Value::String(src) => LoadRequest::new(src.as_str()),
                Value::Object(fields) => {
                    if let Some(key) = fields.keys().find(|k| !REQUEST_KEYS.contains(&k.as_str())) {
                        return Err(LoadError::config(format!(
                            "invalid parameter \"{key}\" in asset \"{name}\""
                        )));
                    }
                    let src = match fields.get("src") {
                        Some(Value::String(src)) => src.clone(),
                        Some(_) => {
                            return Err(LoadError::config(format!(
                                "invalid src for asset \"{name}\", must be a string"
                            )));
                        }
                        None => {
                            return Err(LoadError::config(format!(
                                "missing src for asset \"{name}\""
                            )));
                        }
                    };
                    let kind = match fields.get("type") {
                        None => RequestType::default(),
                        Some(value) => value
                            .as_str()
                            .and_then(RequestType::parse)
                            .ok_or_else(|| {
                                LoadError::config(format!(
                                    "invalid type {value} for asset \"{name}\", possible values: {}",
                                    RequestType::ALL.map(RequestType::as_str).join(",")
                                ))
                            })?,
                    };
                    LoadRequest::new(src)
                        .kind(kind)
                        .stream(flag(fields.get("stream"), "stream", name)?)
                        .credentials(flag(fields.get("credentials"), "credentials", name)?)
                }
                _ => {
                    return Err(LoadError::config(format!(
                        "invalid asset definition \"{name}\""
                    )));
                }
            };
            manifest.insert(name.as_str(), request);
        }
        Ok(manifest)
    }
}

fn flag(value: Option<&Value>, key: &str, name: &str) -> LoadResult<bool> {
    match value {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(LoadError::config(format!(
            "invalid {key} {other} for asset \"{name}\", must be a boolean"
        ))),
    }
}
