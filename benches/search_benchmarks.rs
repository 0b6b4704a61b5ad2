//! Hybrid search benchmarks
//!
//! Ranks a synthetic catalog with an in-memory index and a hashing embedder,
//! so only filtering, similarity and merging are measured.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::runtime::Runtime;

use multimodal_rag::search::{cosine_similarity, Comparator, Embedding};
use multimodal_rag::{
    Embedder, FilterPredicate, HybridSearch, Indexer, MemoryVectorIndex, MetadataStore, Modality,
    ProductRecord, Result,
};

const DIM: usize = 384;
const CATEGORIES: [&str; 4] = ["footwear", "furniture", "electronics", "accessories"];
const COLORS: [&str; 5] = ["red", "white", "black", "brown", "gray"];

/// Seeds a random unit-ish vector from the text hash.
struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        Ok((0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect())
    }
}

fn synthetic_catalog(size: usize) -> Vec<ProductRecord> {
    (0..size)
        .map(|i| ProductRecord {
            id: format!("product_{:05}", i),
            name: format!("Product {}", i),
            category: CATEGORIES[i % CATEGORIES.len()].to_string(),
            color: COLORS[i % COLORS.len()].to_string(),
            price: (i % 50) as f64 * 25.0,
            description: format!("Synthetic product number {}", i),
            image_ref: Some(format!("product_{:05}.jpg", i)),
        })
        .collect()
}

fn engine(rt: &Runtime, size: usize) -> HybridSearch {
    let store = Arc::new(MetadataStore::from_records(synthetic_catalog(size)).unwrap());
    let snapshot = rt
        .block_on(
            Indexer::new(Arc::new(HashEmbedder))
                .build(store, Box::new(MemoryVectorIndex::new(DIM))),
        )
        .unwrap();
    HybridSearch::new(snapshot, Arc::new(HashEmbedder))
}

fn benchmark_hybrid_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let unfiltered = FilterPredicate::default();
    let filtered = FilterPredicate::new()
        .with_category("electronics")
        .with_price(Comparator::Lt, 600.0);

    let mut group = c.benchmark_group("hybrid_search");
    for size in [100, 1_000, 5_000] {
        let search = engine(&rt, size);
        group.bench_with_input(BenchmarkId::new("unfiltered", size), &size, |b, _| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    search
                        .search("red running shoes", &unfiltered, 3, &[Modality::Text])
                        .await
                        .unwrap(),
                )
            })
        });
        group.bench_with_input(BenchmarkId::new("filtered", size), &size, |b, _| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    search
                        .search("red running shoes", &filtered, 3, &[Modality::Text])
                        .await
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn benchmark_filter_apply(c: &mut Criterion) {
    let store = MetadataStore::from_records(synthetic_catalog(10_000)).unwrap();
    let filter = FilterPredicate::new()
        .with_color("white")
        .with_price(Comparator::Gte, 300.0);

    c.bench_function("filter_apply_10k", |b| {
        b.iter(|| black_box(filter.apply(store.records())))
    });
}

fn benchmark_cosine(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let a: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let b: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();

    c.bench_function("cosine_similarity_384", |bench| {
        bench.iter(|| black_box(cosine_similarity(black_box(&a), black_box(&b))))
    });
}

criterion_group!(
    benches,
    benchmark_hybrid_search,
    benchmark_filter_apply,
    benchmark_cosine
);
criterion_main!(benches);
