//! Performance benchmarks for the graph transformers.
//!
//! Run with: `cargo bench --bench validation`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Full validation | <10ms for 1000 words | Every layer checked |
//! | Offset generation | Linear in anchors | Chains with gaps |
//! | Merge | <50ms for 1000 words | Windowed edit paths |

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use ag_kernel::{
    Anchor, Annotation, Confidence, DefaultOffsetGenerator, Graph, GraphTransformer, Merger, OffsetGeneratorConfig,
    Schema, Validator, ValidatorConfig,
};

/// A transcript of `words` chained words in turns of twenty, every
/// `gap`-th anchor without an offset (0 for none).
fn make_transcript(id: &str, words: usize, gap: usize) -> Graph {
    let mut g = Graph::new(id, Schema::transcript());
    for i in 0..=words {
        let known = gap == 0 || i % gap != 0 || i % 20 == 0 || i == words;
        let anchor = if known {
            Anchor::new(format!("a{i}"), Some(i as f64 * 0.3), Some(Confidence::MANUAL))
        } else {
            Anchor::new(format!("a{i}"), None, None)
        };
        g.add_anchor(anchor).expect("anchor");
    }
    g.add_annotation(Annotation::new("p", "participant", "Speaker", "a0", format!("a{words}")))
        .expect("participant");
    for (t, first) in (0..words).step_by(20).enumerate() {
        let last = (first + 20).min(words);
        let turn = format!("t{t}");
        g.add_annotation(
            Annotation::new(turn.as_str(), "turn", "Speaker", format!("a{first}"), format!("a{last}")).with_parent("p"),
        )
        .expect("turn");
        g.add_annotation(
            Annotation::new(format!("u{t}"), "utterance", "", format!("a{first}"), format!("a{last}"))
                .with_parent(turn.as_str()),
        )
        .expect("utterance");
        for i in first..last {
            let word = Annotation::new(format!("w{i}"), "word", format!("word{}", i % 50), format!("a{i}"), format!("a{}", i + 1))
                .with_parent(turn.as_str());
            g.add_annotation(word).expect("word");
        }
    }
    g.commit();
    g
}

/// Benchmark full validation of an unchanged transcript.
fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    for words in [100, 1000] {
        let graph = make_transcript("bench", words, 0);
        let config = ValidatorConfig::default().with_full_validation(true);

        group.throughput(Throughput::Elements(words as u64));
        group.bench_with_input(BenchmarkId::new("words", words), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut g| {
                    let mut validator = Validator::new(config.clone());
                    validator.transform(black_box(&mut g)).expect("validation");
                    g
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark interpolation over chains with missing offsets.
fn bench_offsets(c: &mut Criterion) {
    let mut group = c.benchmark_group("offsets");

    for gap in [2, 5] {
        let graph = make_transcript("bench", 1000, gap);

        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(BenchmarkId::new("every_nth_missing", gap), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut g| {
                    let mut generator = DefaultOffsetGenerator::new(OffsetGeneratorConfig::default());
                    generator.transform(black_box(&mut g)).expect("offsets");
                    g
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark merging an edited copy with relabelled and moved words.
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for words in [100, 1000] {
        let original = make_transcript("original", words, 0);
        let mut edited = make_transcript("edited", words, 0);
        for i in (0..words).step_by(7) {
            edited.set_label(&format!("w{i}").into(), "edited");
        }
        for i in (1..words).step_by(11) {
            if i % 20 != 0 {
                edited.set_offset(&format!("a{i}").into(), Some(i as f64 * 0.3 + 0.05));
            }
        }

        group.throughput(Throughput::Elements(words as u64));
        group.bench_with_input(BenchmarkId::new("words", words), &edited, |b, edited| {
            b.iter_batched(
                || original.clone(),
                |mut g| {
                    Merger::default().merge(black_box(&mut g), edited).expect("merge");
                    g
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_validation, bench_offsets, bench_merge);
criterion_main!(benches);
