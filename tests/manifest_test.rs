use flow_gltf::{LoadError, LoadRequest, Manifest, RequestType};
use serde_json::json;

#[test]
fn string_entries_expand_to_text_requests() {
    let manifest = Manifest::from_json(&json!({ "readme": "docs/readme.txt" })).unwrap();

    let request = manifest.get("readme").unwrap();
    assert_eq!(request.src, "docs/readme.txt");
    assert_eq!(request.kind, RequestType::Text);
    assert!(!request.stream);
    assert!(!request.credentials);
}

#[test]
fn object_entries_keep_their_fields() {
    let manifest = Manifest::from_json(&json!({
        "clip": { "type": "video", "src": "clip.mp4", "stream": true, "credentials": true },
        "mesh": { "type": "binary", "src": "mesh.bin" }
    }))
    .unwrap();

    assert_eq!(manifest.len(), 2);
    let clip = manifest.get("clip").unwrap();
    assert_eq!(clip.kind, RequestType::Video);
    assert!(clip.stream);
    assert!(clip.credentials);
    assert_eq!(manifest.get("mesh").unwrap().kind, RequestType::Binary);
}

#[test]
fn unknown_keys_are_rejected() {
    let result = Manifest::from_json(&json!({ "a": { "src": "a.txt", "sorce": "typo" } }));
    assert!(matches!(result, Err(LoadError::Config(message)) if message.contains("sorce")));
}

#[test]
fn missing_src_is_rejected() {
    let result = Manifest::from_json(&json!({ "a": { "type": "text" } }));
    assert!(matches!(result, Err(LoadError::Config(message)) if message.contains("missing src")));
}

#[test]
fn unknown_types_are_rejected() {
    let result = Manifest::from_json(&json!({ "a": { "type": "model", "src": "a.obj" } }));
    assert!(matches!(result, Err(LoadError::Config(message)) if message.contains("text,binary,image,video,audio")));
}

#[test]
fn non_boolean_flags_are_rejected() {
    let result = Manifest::from_json(&json!({ "a": { "src": "a.txt", "stream": "yes" } }));
    assert!(matches!(result, Err(LoadError::Config(_))));
}

#[test]
fn a_manifest_must_be_an_object() {
    assert!(matches!(Manifest::from_json(&json!(["a.txt"])), Err(LoadError::Config(_))));
    assert!(matches!(Manifest::from_json(&json!({ "a": 42 })), Err(LoadError::Config(_))));
}

#[test]
fn inserting_a_name_twice_replaces_the_request() {
    let mut manifest = Manifest::new();
    manifest.insert("a", "first.txt");
    manifest.insert("b", LoadRequest::new("b.png").kind(RequestType::Image));
    manifest.insert("a", "second.txt");

    let names: Vec<_> = manifest.iter().map(|request| request.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(manifest.get("a").unwrap().src, "second.txt");
}

#[test]
fn request_types_round_trip_through_their_names() {
    for kind in RequestType::ALL {
        assert_eq!(RequestType::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(RequestType::parse("model"), None);
    assert!(RequestType::Image.is_element());
    assert!(!RequestType::Image.is_playable());
    assert!(RequestType::Audio.is_playable());
    assert!(!RequestType::Binary.is_element());
}
