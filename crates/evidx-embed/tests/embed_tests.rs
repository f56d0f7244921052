use evidx_core::config::EmbeddingSettings;
use evidx_core::traits::EmbeddingProvider;
use evidx_embed::{provider_from_settings, DigestEmbedder, TokenHashEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[test]
fn token_hash_shapes_and_determinism() {
    let embedder = TokenHashEmbedder::new(384);
    let texts = vec!["hello world".to_string(), "hello world".to_string(), "other".to_string()];
    let embs = embedder.embed(&texts).expect("embed");
    assert_eq!(embs.vectors.len(), 3);
    assert_eq!(embs.model, "token-hash-d384");
    assert_eq!(embs.vectors[0].len(), 384);
    assert!((norm(&embs.vectors[0]) - 1.0).abs() <= 1e-3, "vector is L2-normalized");
    for (a, b) in embs.vectors[0].iter().zip(embs.vectors[1].iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[test]
fn token_hash_rewards_shared_vocabulary() {
    let embedder = TokenHashEmbedder::new(256);
    let query = embedder.embed_one("CD73 adenosine");
    let related = embedder.embed_one("CD73 converts AMP to adenosine");
    let unrelated = embedder.embed_one("PD-1 checkpoint receptor");
    assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    assert!(cosine(&query, &related) > 0.3);
}

#[test]
fn token_hash_is_case_insensitive() {
    let embedder = TokenHashEmbedder::new(64);
    assert_eq!(embedder.embed_one("Adenosine"), embedder.embed_one("adenosine"));
}

#[test]
fn digest_embedder_is_stable_and_normalized() {
    let embedder = DigestEmbedder::new(100);
    let a = embedder.embed_one("same text");
    let b = embedder.embed_one("same text");
    assert_eq!(a, b);
    assert_eq!(a.len(), 100);
    assert!((norm(&a) - 1.0).abs() <= 1e-3);
    assert_eq!(embedder.model_name(), "digest-sha256-d100");
}

#[test]
fn empty_batch_yields_no_vectors() {
    let embs = TokenHashEmbedder::new(8).embed(&[]).expect("embed");
    assert!(embs.vectors.is_empty());
}

#[test]
fn provider_from_settings_selects_backend() {
    let digest = EmbeddingSettings { provider: "digest".into(), dim: 32, model_dir: None };
    let provider = provider_from_settings(&digest).expect("provider");
    assert_eq!(provider.model_name(), "digest-sha256-d32");

    let token = EmbeddingSettings { provider: "token-hash".into(), dim: 16, model_dir: None };
    assert_eq!(provider_from_settings(&token).expect("provider").dim(), 16);

    let unknown = EmbeddingSettings { provider: "nope".into(), dim: 32, model_dir: None };
    assert!(matches!(provider_from_settings(&unknown), Err(evidx_core::Error::InvalidConfig(_))));
}
