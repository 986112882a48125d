use maintdb_core::config::EmbeddingSettings;
use maintdb_embed::{get_default_embedder, resolve_model_dir, FakeEmbedder};
use maintdb_core::traits::Embedder;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn fake_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { use_fake: true, ..Default::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    assert_eq!(embedder.embedder_id(), "fake:xxhash:d384");

    let texts = vec!["Ortega smoke detector intermittent fault".to_string(), "Ortega smoke detector intermittent fault".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 384, "embedding dim is 384");

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn fake_embedder_places_shared_words_closer() {
    let embedder = FakeEmbedder::new(384);
    let query = embedder.embed("smoke detector fault").expect("embed");
    let near = embedder.embed("Ortega smoke detector intermittent fault").expect("embed");
    let far = embedder.embed("hydraulic pump leaking fluid").expect("embed");
    assert!(cosine(&query, &near) > cosine(&query, &far));
}

#[test]
fn missing_configured_model_dir_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope");
    let settings = EmbeddingSettings { model_dir: Some(missing.display().to_string()), ..Default::default() };
    let err = resolve_model_dir(&settings).expect_err("missing dir");
    assert!(err.to_string().contains("does not exist"));
}
