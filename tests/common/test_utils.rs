use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    io::Cursor,
    rc::Rc,
    sync::{Mutex, Once},
};

use flow_gltf::{
    CommandDescriptor, LoadRequest, RenderBackend, TextureOptions, Transport, TransportEvent,
    resources::transport::{EventStream, completion_events},
};
use futures::{StreamExt, future, stream};

/// One scripted step of a mocked request.
#[derive(Clone, Debug)]
pub enum Step {
    Headers(Option<u64>),
    Chunk(Vec<u8>),
    Metadata,
    CanPlay,
    Finished,
    /// Fails the request.
    Fail(String),
    /// Never produces anything again.
    Hang,
    /// Gives other requests a chance to make progress.
    Yield,
}

struct DropGuard {
    src: String,
    dropped: Rc<RefCell<Vec<String>>>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.dropped.borrow_mut().push(self.src.clone());
    }
}

/// Serves scripted responses by URL. Unknown URLs fail like a 404.
#[derive(Default)]
pub struct MockTransport {
    routes: RefCell<HashMap<String, Vec<Step>>>,
    opened: RefCell<Vec<String>>,
    dropped: Rc<RefCell<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` in two chunks, followed by the completion events of the
    /// request type.
    pub fn with_body(self, src: &str, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let (head, tail) = body.split_at(body.len() / 2);
        let steps = vec![
            Step::Headers(Some(body.len() as u64)),
            Step::Yield,
            Step::Chunk(head.to_vec()),
            Step::Yield,
            Step::Chunk(tail.to_vec()),
            Step::Yield,
        ];
        self.routes.borrow_mut().insert(src.to_string(), steps);
        self
    }

    pub fn with_json(self, src: &str, json: serde_json::Value) -> Self {
        self.with_body(src, json.to_string())
    }

    /// Serves exactly `steps`. No completion events are added.
    pub fn with_script(self, src: &str, steps: Vec<Step>) -> Self {
        self.routes
            .borrow_mut()
            .insert(src.to_string(), [vec![Step::Yield], steps].concat());
        self
    }

    pub fn with_hang(self, src: &str) -> Self {
        self.with_script(src, vec![Step::Headers(None), Step::Hang])
    }

    pub fn with_failure(self, src: &str) -> Self {
        self.with_script(src, vec![Step::Fail("500 internal server error".into())])
    }

    /// Sources in the order they were opened.
    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }

    /// Sources whose event streams were dropped.
    pub fn dropped(&self) -> Vec<String> {
        self.dropped.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn open(&self, request: &LoadRequest) -> EventStream {
        self.opened.borrow_mut().push(request.src.clone());
        let mut steps = match self.routes.borrow().get(&request.src) {
            Some(steps) => steps.clone(),
            None => vec![Step::Yield, Step::Fail("404 not found".into())],
        };
        let scripted = steps
            .iter()
            .any(|step| matches!(step, Step::Fail(_) | Step::Hang | Step::Finished | Step::Metadata | Step::CanPlay));
        if !scripted {
            steps.extend(completion_events(request.kind).into_iter().map(|event| match event {
                TransportEvent::Metadata => Step::Metadata,
                TransportEvent::CanPlay => Step::CanPlay,
                _ => Step::Finished,
            }));
        }

        let guard = DropGuard {
            src: request.src.clone(),
            dropped: self.dropped.clone(),
        };
        stream::iter(steps)
            .then(|step| async move {
                match step {
                    Step::Headers(total) => Some(Ok(TransportEvent::Headers { total })),
                    Step::Chunk(bytes) => Some(Ok(TransportEvent::Chunk(bytes))),
                    Step::Metadata => Some(Ok(TransportEvent::Metadata)),
                    Step::CanPlay => Some(Ok(TransportEvent::CanPlay)),
                    Step::Finished => Some(Ok(TransportEvent::Finished)),
                    Step::Fail(message) => Some(Err(anyhow::anyhow!(message))),
                    Step::Hang => future::pending().await,
                    Step::Yield => {
                        yield_now().await;
                        None
                    }
                }
            })
            .filter_map(future::ready)
            .map(move |event| {
                let _keep = &guard;
                event
            })
            .boxed_local()
    }
}

/// Resolves after yielding to the executor once.
pub async fn yield_now() {
    let mut yielded = false;
    future::poll_fn(|cx| {
        if yielded {
            std::task::Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        }
    })
    .await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub struct BufferRecord {
    pub byte_length: usize,
    pub elements: bool,
    pub data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureRecord {
    pub size: Option<(u32, u32)>,
    pub options: Option<TextureOptions>,
}

/// Backend recording every call instead of talking to a GPU. Compiled
/// commands are the descriptors themselves.
#[derive(Default)]
pub struct RecordingBackend {
    next: Cell<usize>,
    buffers: RefCell<HashMap<usize, BufferRecord>>,
    textures: RefCell<HashMap<usize, TextureRecord>>,
    compiled: RefCell<Vec<String>>,
    failing: RefCell<HashSet<String>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes compiling `technique` fail.
    pub fn fail_compile(&self, technique: &str) {
        self.failing.borrow_mut().insert(technique.to_string());
    }

    fn id(&self) -> usize {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }

    pub fn buffer(&self, handle: &BufferHandle) -> Option<BufferRecord> {
        self.buffers.borrow().get(&handle.0).cloned()
    }

    pub fn texture(&self, handle: &TextureHandle) -> Option<TextureRecord> {
        self.textures.borrow().get(&handle.0).cloned()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.borrow().len()
    }

    /// Technique names in compilation order.
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.borrow().clone()
    }
}

impl RenderBackend for RecordingBackend {
    type Buffer = BufferHandle;
    type Texture = TextureHandle;
    type Command = CommandDescriptor;

    fn create_buffer(&self, byte_length: usize) -> BufferHandle {
        let id = self.id();
        self.buffers.borrow_mut().insert(
            id,
            BufferRecord {
                byte_length,
                elements: false,
                data: None,
            },
        );
        BufferHandle(id)
    }

    fn create_element_buffer(&self, byte_length: usize) -> BufferHandle {
        let id = self.id();
        self.buffers.borrow_mut().insert(
            id,
            BufferRecord {
                byte_length,
                elements: true,
                data: None,
            },
        );
        BufferHandle(id)
    }

    fn write_buffer(&self, buffer: &BufferHandle, data: &[u8]) {
        if let Some(record) = self.buffers.borrow_mut().get_mut(&buffer.0) {
            record.data = Some(data.to_vec());
        }
    }

    fn create_texture(&self) -> TextureHandle {
        let id = self.id();
        self.textures.borrow_mut().insert(
            id,
            TextureRecord {
                size: None,
                options: None,
            },
        );
        TextureHandle(id)
    }

    fn write_texture(&self, texture: &TextureHandle, image: &image::RgbaImage, options: &TextureOptions) {
        if let Some(record) = self.textures.borrow_mut().get_mut(&texture.0) {
            record.size = Some(image.dimensions());
            record.options = Some(*options);
        }
    }

    fn compile_command(&self, descriptor: &CommandDescriptor) -> anyhow::Result<CommandDescriptor> {
        if self.failing.borrow().contains(&descriptor.technique) {
            anyhow::bail!("shader compilation failed");
        }
        self.compiled.borrow_mut().push(descriptor.technique.clone());
        Ok(descriptor.clone())
    }
}

/// Encodes a `width` x `height` PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("could not encode test image");
    bytes.into_inner()
}

/// Counts invocations of a callback from inside a `'static` closure.
#[derive(Clone, Default)]
pub struct Counter(Rc<Cell<usize>>);

impl Counter {
    pub fn hit(&self) {
        self.0.set(self.0.get() + 1);
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

/// A glTF document with one triangle mesh, an index buffer, a raw buffer
/// view and one texture, all relative to the document.
pub fn triangle_document() -> serde_json::Value {
    serde_json::json!({
        "scene": "defaultScene",
        "scenes": {
            "defaultScene": { "name": "triangle", "nodes": ["root"] }
        },
        "nodes": {
            "root": {
                "name": "root",
                "translation": [1.0, 2.0, 3.0],
                "children": ["child"]
            },
            "child": {
                "name": "child",
                "meshes": ["triangle"],
                "scale": [2.0, 2.0, 2.0]
            }
        },
        "meshes": {
            "triangle": {
                "primitives": [{
                    "attributes": { "POSITION": "positions", "NORMAL": "normals" },
                    "indices": "indices",
                    "material": "red",
                    "mode": 4
                }]
            }
        },
        "materials": {
            "red": {
                "technique": "diffuse",
                "values": { "mainTexture": "checker" }
            }
        },
        "accessors": {
            "positions": {
                "bufferView": "vertices", "byteOffset": 0, "byteStride": 12,
                "componentType": 5126, "count": 3, "type": "VEC3"
            },
            "normals": {
                "bufferView": "vertices", "byteOffset": 36, "byteStride": 12,
                "componentType": 5126, "count": 3, "type": "VEC3"
            },
            "indices": {
                "bufferView": "elements", "byteOffset": 2, "byteStride": 0,
                "componentType": 5123, "count": 3, "type": "SCALAR"
            }
        },
        "bufferViews": {
            "vertices": { "buffer": "geometry", "byteOffset": 0, "byteLength": 72, "target": 34962 },
            "elements": { "buffer": "geometry", "byteOffset": 72, "byteLength": 8, "target": 34963 },
            "extra": { "buffer": "geometry", "byteOffset": 80, "byteLength": 4 }
        },
        "buffers": {
            "geometry": { "uri": "geometry.bin", "byteLength": 84 }
        },
        "textures": {
            "checker": { "source": "checkerImage" }
        },
        "images": {
            "checkerImage": { "uri": "textures/checker.png" }
        }
    })
}

/// The 84 byte buffer of [`triangle_document`]. Byte `i` has value `i`.
pub fn triangle_buffer() -> Vec<u8> {
    (0..84).collect()
}

/// Builds a scene from `document` without loading anything: views with a
/// target get a GPU buffer, textures get a handle.
pub fn scene_from(
    document: serde_json::Value,
    backend: &RecordingBackend,
) -> flow_gltf::Scene<RecordingBackend> {
    use flow_gltf::{
        BufferSlot, Scene, SceneTree, TechniqueRegistry,
        data_structures::gltf::{Document, gl},
    };

    let document = Rc::new(Document::from_value(document).expect("invalid test document"));
    let mut scene = Scene::new(TechniqueRegistry::new());
    scene.overlay(&document);
    scene.compile_commands(backend);
    for (id, view) in &document.buffer_views {
        let slot = match view.target {
            Some(gl::ELEMENT_ARRAY_BUFFER) => BufferSlot::Gpu(backend.create_element_buffer(view.byte_length)),
            Some(_) => BufferSlot::Gpu(backend.create_buffer(view.byte_length)),
            None => BufferSlot::Raw(Vec::new()),
        };
        scene.buffers.insert(id.clone(), slot);
    }
    for id in document.textures.keys() {
        scene.textures.insert(id.clone(), backend.create_texture());
    }
    scene.set_tree(SceneTree::materialize(document));
    scene
}

static LOG_LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Logger keeping every message of the test binary in memory.
struct CapturingLogger;

impl log::Log for CapturingLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Ok(mut lines) = LOG_LINES.lock() {
            lines.push(format!("{} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static CAPTURING_LOGGER: CapturingLogger = CapturingLogger;

/// Routes `log` output of this test binary into memory. Tests run in
/// parallel, so only check for messages unique to the test.
pub fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if log::set_logger(&CAPTURING_LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
}

/// Whether a captured log line contains `fragment`.
pub fn logged(fragment: &str) -> bool {
    LOG_LINES
        .lock()
        .map(|lines| lines.iter().any(|line| line.contains(fragment)))
        .unwrap_or(false)
}
