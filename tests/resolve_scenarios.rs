//! End-to-end resolution tests.
//!
//! These tests drive a [`Resolver`] over the in-memory store and verify:
//! - The documented scenarios (fallback, exact hit, phonetic hit, AI seeding, upstream failure)
//! - Idempotence of repeated resolutions
//! - Deduplication and phonetic-key derivation across arbitrary query sequences
//! - Convergence when many threads race on the same unseen query

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use entity_canon::normalize::{HttpResponse, Sleeper, Transport, TransportError};
use entity_canon::{
    CanonicalEntity, EntityStore, InMemoryEntityStore, LowercaseEncoder, MatchTier,
    NormalizationClient, NormalizationOutcome, Normalizer, NormalizerConfig, PhoneticEncoder,
    Resolver, CATEGORY_UNKNOWN,
};

struct FixedNormalizer(NormalizationOutcome);

impl Normalizer for FixedNormalizer {
    fn normalize(&self, _query: &str) -> NormalizationOutcome {
        self.0.clone()
    }
}

/// Transport that counts calls and replays scripted replies.
struct CountingTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    calls: Arc<AtomicUsize>,
}

impl Transport for CountingTransport {
    fn post_json(
        &self,
        _url: &str,
        _bearer: &str,
        _body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("connection refused".to_string())))
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

fn client_resolver(
    replies: Vec<Result<HttpResponse, TransportError>>,
) -> (Resolver, Arc<InMemoryEntityStore>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport {
        replies: Mutex::new(replies.into()),
        calls: Arc::clone(&calls),
    };
    let client = NormalizationClient::with_parts(
        NormalizerConfig::with_api_key("test-key"),
        transport,
        NoSleep,
    );
    let store = Arc::new(InMemoryEntityStore::new());
    (Resolver::new(store.clone(), Arc::new(client)), store, calls)
}

fn no_match_resolver() -> (Resolver, Arc<InMemoryEntityStore>) {
    let store = Arc::new(InMemoryEntityStore::new());
    let resolver = Resolver::new(
        store.clone(),
        Arc::new(FixedNormalizer(NormalizationOutcome::NoMatch)),
    );
    (resolver, store)
}

fn assert_invariants(entity: &CanonicalEntity) {
    let unique: HashSet<&String> = entity.variations.iter().collect();
    assert_eq!(unique.len(), entity.variations.len(), "duplicate variation in {entity:?}");

    for v in &entity.variations {
        for key in LowercaseEncoder.keys(v) {
            assert!(
                entity.phonetic_keys.contains(&key),
                "key {key:?} of variation {v:?} missing from {entity:?}"
            );
        }
    }
}

#[test]
fn scenario_a_fallback_on_empty_store() {
    let (resolver, store) = no_match_resolver();

    let entity = resolver.resolve("apple").unwrap();
    assert_eq!(entity.canonical_name, "apple");
    assert_eq!(entity.variations, vec!["apple"]);
    assert_eq!(entity.category, CATEGORY_UNKNOWN);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn scenario_b_exact_hit_adds_nothing() {
    let (resolver, store) = no_match_resolver();
    let first = resolver.resolve("apple").unwrap();

    let again = resolver.resolve_detailed("apple").unwrap();
    assert_eq!(again.tier, MatchTier::Variation);
    assert_eq!(again.entity.id, first.id);
    assert_eq!(again.entity.variations, vec!["apple"]);
    assert_eq!(again.entity.version, first.version);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn scenario_c_phonetic_hit_merges_spelling() {
    let (resolver, store) = no_match_resolver();
    let first = resolver.resolve("apple").unwrap();

    let r = resolver.resolve_detailed("Apple").unwrap();
    assert_eq!(r.tier, MatchTier::Phonetic);
    assert_eq!(r.entity.id, first.id);
    assert!(r.entity.has_variation("apple"));
    assert!(r.entity.has_variation("Apple"));
    assert_eq!(store.len().unwrap(), 1);

    // The merged spelling is now an exact hit.
    assert_eq!(
        resolver.resolve_detailed("Apple").unwrap().tier,
        MatchTier::Variation
    );
}

#[test]
fn scenario_d_normalized_answer_seeds_entity() {
    let content = r#"{"match": true, "canonicalName": "Entity X", "variations": ["a b", "c"], "category": "Cat"}"#;
    let body = serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    });
    let (resolver, store, calls) = client_resolver(vec![Ok(HttpResponse {
        status: 200,
        body: body.to_string(),
    })]);

    let r = resolver.resolve_detailed("entity x?").unwrap();
    assert_eq!(r.tier, MatchTier::NormalizedCreated);
    assert_eq!(r.entity.canonical_name, "Entity X");
    assert_eq!(r.entity.category, "Cat");
    assert_eq!(r.entity.variations, vec!["ab", "c", "entity x?"]);
    assert_invariants(&r.entity);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len().unwrap(), 1);

    // A seeded variation is now an exact hit without another call.
    let hit = resolver.resolve_detailed("ab").unwrap();
    assert_eq!(hit.tier, MatchTier::Variation);
    assert_eq!(hit.entity.id, r.entity.id);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn scenario_e_transport_failure_falls_back_without_retry() {
    let (resolver, store, calls) = client_resolver(vec![]);

    let r = resolver.resolve_detailed("q").unwrap();
    assert_eq!(r.tier, MatchTier::Fallback);
    assert_eq!(r.entity.canonical_name, "q");
    assert_eq!(r.entity.variations, vec!["q"]);
    assert_eq!(r.entity.category, CATEGORY_UNKNOWN);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn rate_limited_service_falls_back_after_three_attempts() {
    let limited = || {
        Ok(HttpResponse {
            status: 429,
            body: String::new(),
        })
    };
    let (resolver, _, calls) = client_resolver(vec![limited(), limited(), limited(), limited()]);

    let r = resolver.resolve_detailed("q").unwrap();
    assert_eq!(r.tier, MatchTier::Fallback);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn repeated_resolution_is_idempotent() {
    let (resolver, store) = no_match_resolver();
    let a = resolver.resolve("banana").unwrap();
    let b = resolver.resolve("banana").unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(b.variations, vec!["banana"]);
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn invariants_hold_across_mixed_queries() {
    let normalizer = FixedNormalizer(NormalizationOutcome::Matched {
        canonical_name: "Fruit".to_string(),
        variations: vec!["Apple".to_string(), "ap ple".to_string(), "Apple".to_string()],
        category: Some("unknown".to_string()),
    });
    let store = Arc::new(InMemoryEntityStore::new());
    let resolver = Resolver::new(store.clone(), Arc::new(normalizer));

    let queries = ["pear", "PEAR", "Pear", "apple", "APPLE", "fruit", "pear", "Fruit "];
    let mut ids = HashSet::new();
    for q in queries {
        let e = resolver.resolve(q).unwrap();
        assert!(e.has_variation(q));
        assert_invariants(&e);
        ids.insert(e.id);
    }

    let fruit = store.find_by_canonical_name("Fruit").unwrap().unwrap();
    assert_eq!(fruit.category, "Uncategorized");
    assert_invariants(&fruit);
    assert_eq!(store.len().unwrap(), ids.len());
}

#[test]
fn concurrent_resolutions_converge() {
    const THREADS: usize = 16;
    let (resolver, store) = no_match_resolver();
    let resolver = Arc::new(resolver);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                resolver.resolve("cherry").unwrap()
            })
        })
        .collect();

    let results: Vec<CanonicalEntity> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = results[0].id;
    assert!(results.iter().all(|e| e.id == first));
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.get(first).unwrap().unwrap().variations, vec!["cherry"]);
}

#[test]
fn concurrent_normalized_seeding_converges() {
    const THREADS: usize = 8;
    let store = Arc::new(InMemoryEntityStore::new());
    let resolver = Arc::new(Resolver::new(
        store.clone(),
        Arc::new(FixedNormalizer(NormalizationOutcome::Matched {
            canonical_name: "Tel Aviv".to_string(),
            variations: vec!["תלאביב".to_string()],
            category: Some("City".to_string()),
        })),
    ));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let resolver = Arc::clone(&resolver);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                resolver.resolve(&format!("tlv-{i}")).unwrap()
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.len().unwrap(), 1);
    let entity = store.find_by_canonical_name("Tel Aviv").unwrap().unwrap();
    assert_eq!(entity.category, "City");
    for i in 0..THREADS {
        assert!(entity.has_variation(&format!("tlv-{i}")));
    }
    assert_invariants(&entity);
}
