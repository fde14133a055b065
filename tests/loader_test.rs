use std::{cell::RefCell, rc::Rc};

use flow_gltf::{
    Asset, Assets, LoadConfig, LoadError, LoadRequest, LoadSession, LoaderState, Manifest, Parser,
    RequestType, load, load_assets,
};

use crate::common::test_utils::{Counter, MockTransport, Step, png};

mod common;

/// Polls `session` up to `times` times. Returns whether it finished.
async fn pump(session: &mut LoadSession, times: usize) -> bool {
    for _ in 0..times {
        if futures::poll!(&mut *session).is_ready() {
            return true;
        }
    }
    false
}

struct Observed {
    done: Counter,
    errors: Rc<RefCell<Vec<LoadError>>>,
    assets: Rc<RefCell<Option<Assets>>>,
    progress: Rc<RefCell<Vec<(f32, String)>>>,
}

fn observe(manifest: Manifest) -> (LoadConfig, Observed) {
    let observed = Observed {
        done: Counter::default(),
        errors: Rc::default(),
        assets: Rc::default(),
        progress: Rc::default(),
    };
    let (done, assets, errors, progress) = (
        observed.done.clone(),
        observed.assets.clone(),
        observed.errors.clone(),
        observed.progress.clone(),
    );
    let config = LoadConfig::new(manifest)
        .on_done(move |loaded| {
            done.hit();
            *assets.borrow_mut() = Some(loaded);
        })
        .on_error(move |e| errors.borrow_mut().push(e))
        .on_progress(move |fraction, label| progress.borrow_mut().push((fraction, label.to_string())));
    (config, observed)
}

#[tokio::test]
async fn done_fires_once_after_every_resource_is_ready() {
    let transport = MockTransport::new()
        .with_body("a.txt", "alpha")
        .with_body("b.bin", vec![1, 2, 3, 4])
        .with_body("c.txt", "gamma");
    let manifest = Manifest::new()
        .with("a", "a.txt")
        .with("b", LoadRequest::new("b.bin").kind(RequestType::Binary))
        .with("c", "c.txt");
    let (config, observed) = observe(manifest);

    let session = load(&transport, config).unwrap();
    assert_eq!(observed.done.get(), 0);
    session.await;

    assert_eq!(observed.done.get(), 1);
    assert!(observed.errors.borrow().is_empty());
    let assets = observed.assets.borrow_mut().take().unwrap();
    assert_eq!(assets.len(), 3);
    assert_eq!(assets["a"].as_text(), Some("alpha"));
    assert_eq!(assets["b"].as_bytes(), Some(&[1u8, 2, 3, 4][..]));
    assert_eq!(assets["c"].as_text(), Some("gamma"));
    assert_eq!(transport.opened(), vec!["a.txt", "b.bin", "c.txt"]);
}

#[tokio::test]
async fn done_waits_for_a_pending_resource() {
    let transport = MockTransport::new()
        .with_body("a.txt", "alpha")
        .with_hang("slow.txt");
    let (config, observed) = observe(Manifest::new().with("a", "a.txt").with("slow", "slow.txt"));

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 50).await);

    assert_eq!(observed.done.get(), 0);
    assert_eq!(session.state(), LoaderState::Data);
    let a = session.status("a").unwrap();
    assert_eq!(a.state, LoaderState::Complete);
    assert!(a.ready);
    let slow = session.status("slow").unwrap();
    assert_eq!(slow.state, LoaderState::Data);
    assert!(!slow.ready);
}

#[tokio::test]
async fn empty_manifest_completes_after_load_returns() {
    let transport = MockTransport::new();
    let (config, observed) = observe(Manifest::new());

    let mut session = load(&transport, config).unwrap();
    assert_eq!(observed.done.get(), 0);
    assert!(futures::poll!(&mut session).is_pending());
    assert_eq!(observed.done.get(), 0);

    session.await;
    assert_eq!(observed.done.get(), 1);
    assert!(observed.assets.borrow().as_ref().unwrap().is_empty());
    assert!(transport.opened().is_empty());
}

#[tokio::test]
async fn canceling_a_finished_loader_changes_nothing() {
    let transport = MockTransport::new()
        .with_body("a.txt", "alpha")
        .with_hang("slow.txt");
    let (config, observed) = observe(Manifest::new().with("a", "a.txt").with("slow", "slow.txt"));

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 50).await);

    let before = session.status("a").unwrap();
    assert!(!session.cancel_resource("a"));
    assert_eq!(session.status("a").unwrap(), before);
    assert!(!pump(&mut session, 10).await);
    assert!(observed.errors.borrow().is_empty());
    assert_eq!(observed.done.get(), 0);

    assert!(session.cancel_resource("slow"));
    assert!(!session.cancel_resource("slow"));
    assert_eq!(session.status("slow").unwrap().state, LoaderState::Error);
    session.await;

    assert_eq!(observed.done.get(), 0);
    let errors = observed.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], LoadError::Canceled(name) if name == "slow"));
}

#[tokio::test]
async fn transport_failure_aborts_the_session() {
    let transport = MockTransport::new()
        .with_failure("broken.txt")
        .with_hang("slow.txt")
        .with_hang("slower.txt");
    let (config, observed) = observe(
        Manifest::new()
            .with("slow", "slow.txt")
            .with("broken", "broken.txt")
            .with("slower", "slower.txt"),
    );

    let session = load(&transport, config).unwrap();
    session.await;

    assert_eq!(observed.done.get(), 0);
    let errors = observed.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], LoadError::Transport { name, .. } if name == "broken"));
    let dropped = transport.dropped();
    assert!(dropped.contains(&"slow.txt".to_string()));
    assert!(dropped.contains(&"slower.txt".to_string()));
}

#[tokio::test]
async fn missing_resource_fails_like_a_transport_error() {
    let transport = MockTransport::new().with_body("a.txt", "alpha");
    let (config, observed) = observe(Manifest::new().with("a", "a.txt").with("b", "missing.txt"));

    load(&transport, config).unwrap().await;

    assert_eq!(observed.done.get(), 0);
    assert_eq!(observed.errors.borrow().len(), 1);
}

#[tokio::test]
async fn failure_without_error_callback_is_only_logged() {
    let transport = MockTransport::new().with_failure("broken.txt");
    let done = Counter::default();
    let config = LoadConfig::new(Manifest::new().with("broken", "broken.txt")).on_done({
        let done = done.clone();
        move |_| done.hit()
    });

    load(&transport, config).unwrap().await;
    assert_eq!(done.get(), 0);
}

#[tokio::test]
async fn session_cancel_reports_one_error() {
    let transport = MockTransport::new().with_hang("a.txt").with_hang("b.txt");
    let (config, observed) = observe(Manifest::new().with("a", "a.txt").with("b", "b.txt"));

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 10).await);
    session.cancel();
    session.cancel();
    assert_eq!(session.state(), LoaderState::Error);
    session.await;

    assert_eq!(observed.done.get(), 0);
    assert_eq!(observed.errors.borrow().len(), 1);
}

#[tokio::test]
async fn missing_done_callback_fails_before_any_request() {
    let transport = MockTransport::new().with_body("a.txt", "alpha");
    let result = load(&transport, LoadConfig::new(Manifest::new().with("a", "a.txt")));

    assert!(matches!(result, Err(LoadError::Config(_))));
    assert!(transport.opened().is_empty());
}

#[tokio::test]
async fn missing_src_fails_before_any_request() {
    let transport = MockTransport::new().with_body("a.txt", "alpha");
    let (config, observed) = observe(Manifest::new().with("a", "a.txt").with("b", ""));

    let result = load(&transport, config);
    assert!(matches!(result, Err(LoadError::Config(_))));
    assert!(transport.opened().is_empty());
    assert_eq!(observed.done.get(), 0);
}

#[tokio::test]
async fn non_stream_progress_is_smoothed() {
    let transport = MockTransport::new()
        .with_body("a.txt", "alpha")
        .with_script("slow.txt", vec![Step::Hang]);
    let (config, observed) = observe(Manifest::new().with("a", "a.txt").with("slow", "slow.txt"));

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 50).await);

    // headers, first chunk and completion each move progress once
    assert_eq!(session.status("a").unwrap().progress, 0.578125);
    assert_eq!(
        *observed.progress.borrow(),
        vec![
            (0.125, "a".to_string()),
            (0.21875, "a".to_string()),
            (0.2890625, "a".to_string()),
        ]
    );
    assert_eq!(session.progress(), 0.2890625);
}

#[tokio::test]
async fn buffered_progress_moves_before_the_body_completes() {
    let transport = MockTransport::new().with_script(
        "big.bin",
        vec![
            Step::Headers(Some(100)),
            Step::Chunk(vec![0; 50]),
            Step::Yield,
            Step::Chunk(vec![0; 10]),
            Step::Hang,
        ],
    );
    let chunks = Counter::default();
    let parser = {
        let chunks = chunks.clone();
        Parser::new(move |asset| {
            chunks.hit();
            Ok(asset)
        })
    };
    let manifest = Manifest::new().with(
        "big",
        LoadRequest::new("big.bin").kind(RequestType::Binary).parser(parser),
    );
    let (config, observed) = observe(manifest);

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 50).await);

    let big = session.status("big").unwrap();
    assert_eq!(big.state, LoaderState::Data);
    assert!(!big.ready);
    assert!(big.progress > 0.0);
    assert_eq!(big.progress, 0.4375);
    assert_eq!(
        *observed.progress.borrow(),
        vec![(0.25, "big".to_string()), (0.4375, "big".to_string())]
    );
    assert_eq!(chunks.get(), 0);
}

#[tokio::test]
async fn stream_resource_is_ready_before_it_completes() {
    let transport = MockTransport::new()
        .with_script(
            "live.txt",
            vec![
                Step::Headers(Some(10)),
                Step::Chunk(b"hello".to_vec()),
                Step::Hang,
            ],
        )
        .with_hang("slow.txt");
    let chunks = Rc::new(RefCell::new(Vec::new()));
    let parser = {
        let chunks = chunks.clone();
        Parser::new(move |asset| {
            chunks.borrow_mut().push(asset.as_text().unwrap_or_default().to_string());
            Ok(asset)
        })
    };
    let manifest = Manifest::new()
        .with("live", LoadRequest::new("live.txt").stream(true).parser(parser))
        .with("slow", "slow.txt");
    let (config, _observed) = observe(manifest);

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 50).await);

    let live = session.status("live").unwrap();
    assert_eq!(live.state, LoaderState::Data);
    assert!(live.ready);
    assert_eq!(live.progress, 0.5);
    assert_eq!(*chunks.borrow(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn stream_resource_alone_completes_on_first_data() {
    let transport = MockTransport::new().with_script(
        "live.txt",
        vec![Step::Headers(None), Step::Chunk(b"hi".to_vec()), Step::Hang],
    );
    let (config, observed) = observe(
        Manifest::new().with("live", LoadRequest::new("live.txt").stream(true)),
    );

    let mut session = load(&transport, config).unwrap();
    assert!(pump(&mut session, 50).await);

    assert_eq!(observed.done.get(), 1);
    let assets = observed.assets.borrow_mut().take().unwrap();
    assert_eq!(assets["live"].as_text(), Some("hi"));
    assert_eq!(session.state(), LoaderState::Complete);
}

#[tokio::test]
async fn canceling_after_the_session_completed_changes_nothing() {
    let transport = MockTransport::new().with_script(
        "live.txt",
        vec![Step::Headers(None), Step::Chunk(b"hi".to_vec()), Step::Hang],
    );
    let (config, observed) = observe(
        Manifest::new().with("live", LoadRequest::new("live.txt").stream(true)),
    );

    let mut session = load(&transport, config).unwrap();
    assert!(pump(&mut session, 50).await);
    let before = session.status("live").unwrap();
    assert_eq!(before.state, LoaderState::Data);
    assert!(before.ready);

    assert!(!session.cancel_resource("live"));
    session.cancel();

    assert_eq!(session.status("live").unwrap(), before);
    assert_eq!(session.state(), LoaderState::Complete);
    assert!(observed.errors.borrow().is_empty());
    assert_eq!(observed.done.get(), 1);
}

#[tokio::test]
async fn media_waits_for_metadata_and_can_play() {
    let transport = MockTransport::new().with_script(
        "clip.mp4",
        vec![
            Step::Headers(Some(4)),
            Step::Chunk(vec![0, 1, 2, 3]),
            Step::Metadata,
            Step::Hang,
        ],
    );
    let (config, observed) = observe(
        Manifest::new().with("clip", LoadRequest::new("clip.mp4").kind(RequestType::Video)),
    );

    let mut session = load(&transport, config).unwrap();
    assert!(!pump(&mut session, 50).await);
    assert!(!session.status("clip").unwrap().ready);
    assert_eq!(observed.done.get(), 0);
}

#[tokio::test]
async fn media_completes_with_signals_in_any_order() {
    let transport = MockTransport::new().with_script(
        "song.ogg",
        vec![
            Step::Headers(Some(4)),
            Step::Chunk(vec![0, 1, 2, 3]),
            Step::CanPlay,
            Step::Yield,
            Step::Metadata,
        ],
    );
    let (config, observed) = observe(
        Manifest::new().with("song", LoadRequest::new("song.ogg").kind(RequestType::Audio)),
    );

    load(&transport, config).unwrap().await;

    assert_eq!(observed.done.get(), 1);
    let assets = observed.assets.borrow_mut().take().unwrap();
    assert!(matches!(&assets["song"], Asset::Media(bytes) if bytes == &vec![0, 1, 2, 3]));
}

#[tokio::test]
async fn parser_failure_aborts_the_session() {
    let transport = MockTransport::new()
        .with_body("a.txt", "alpha")
        .with_hang("slow.txt");
    let manifest = Manifest::new()
        .with(
            "a",
            LoadRequest::new("a.txt").parser(Parser::new(|_| anyhow::bail!("unexpected token"))),
        )
        .with("slow", "slow.txt");
    let (config, observed) = observe(manifest);

    load(&transport, config).unwrap().await;

    assert_eq!(observed.done.get(), 0);
    let errors = observed.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], LoadError::Parser { name, .. } if name == "a"));
    assert!(transport.dropped().contains(&"slow.txt".to_string()));
}

#[tokio::test]
async fn parser_done_hook_replaces_the_asset() {
    let transport = MockTransport::new().with_body("a.txt", "alpha");
    let parser = Parser::new(|asset| match asset {
        Asset::Text(text) => Ok(Asset::Text(text.to_uppercase())),
        other => Ok(other),
    })
    .on_done(|asset| {
        let text = asset.as_text().unwrap_or_default();
        Ok(Asset::Text(format!("{text}!")))
    });
    let (config, observed) = observe(
        Manifest::new().with("a", LoadRequest::new("a.txt").parser(parser)),
    );

    load(&transport, config).unwrap().await;

    let assets = observed.assets.borrow_mut().take().unwrap();
    assert_eq!(assets["a"].as_text(), Some("ALPHA!"));
}

#[tokio::test]
async fn json_parser_produces_json() {
    let transport = MockTransport::new().with_json("doc.json", serde_json::json!({ "answer": 42 }));
    let manifest = Manifest::new().with("doc", LoadRequest::new("doc.json").parser(Parser::json()));

    let assets = load_assets(&transport, manifest).await.unwrap();
    let json = assets.get("doc").cloned().and_then(Asset::into_json).unwrap();
    assert_eq!(json["answer"], 42);
}

#[tokio::test]
async fn images_are_decoded() {
    let transport = MockTransport::new().with_body("image.png", png(3, 2));
    let manifest = Manifest::new().with("image", LoadRequest::new("image.png").kind(RequestType::Image));

    let mut assets = load_assets(&transport, manifest).await.unwrap();
    let image = assets.remove("image").and_then(Asset::into_image).unwrap();
    assert_eq!((image.width(), image.height()), (3, 2));
}

#[tokio::test]
async fn undecodable_images_fail() {
    let transport = MockTransport::new().with_body("image.png", b"not an image".to_vec());
    let manifest = Manifest::new().with("image", LoadRequest::new("image.png").kind(RequestType::Image));

    let result = load_assets(&transport, manifest).await;
    assert!(matches!(result, Err(LoadError::Decode { name, .. }) if name == "image"));
}

#[tokio::test]
async fn load_assets_reports_the_first_failure() {
    let transport = MockTransport::new()
        .with_body("a.txt", "alpha")
        .with_failure("b.txt");
    let manifest = Manifest::new().with("a", "a.txt").with("b", "b.txt");

    let result = load_assets(&transport, manifest).await;
    assert!(matches!(result, Err(LoadError::Transport { name, .. }) if name == "b"));
}
