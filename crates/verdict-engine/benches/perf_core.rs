use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;
use verdict_core::ScoreRecord;
use verdict_engine::llm::decode_object;
use verdict_engine::scoring::aggregate;

const CATEGORIES: [&str; 6] = [
    "clarity",
    "relevance",
    "structure",
    "vocabulary",
    "fluency",
    "engagement",
];

fn synthetic_payload(padding: usize) -> String {
    let scores = CATEGORIES
        .iter()
        .enumerate()
        .map(|(i, key)| format!("\"{key}\": {},", 8 + i))
        .collect::<String>();
    format!(
        "Here is my assessment. {}\n```json\n{{\"categoryScores\": {{{}}}, \"holisticScore\": 64, \"critique\": \"{}\",}}\n```\nLet me know if you need more.",
        "Some preamble. ".repeat(padding),
        scores,
        "Solid answer with minor slips. ".repeat(padding),
    )
}

fn synthetic_records(count: usize) -> Vec<ScoreRecord> {
    (0..count)
        .map(|i| {
            ScoreRecord::new(
                i + 1,
                format!("answer {i}"),
                CATEGORIES
                    .iter()
                    .map(|key| (key.to_string(), ((i * 7) % 21) as f64)),
                ((i * 13) % 101) as f64,
                "critique",
            )
        })
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let direct = "{\"categoryScores\": {\"clarity\": 12}, \"holisticScore\": 55}".to_string();
    c.bench_function("decode_direct", |b| {
        b.iter(|| black_box(decode_object(black_box(&direct)).is_ok()));
    });

    // Worst case: fenced and brace-span parses fail, cleanup succeeds.
    let cleaned = synthetic_payload(40);
    c.bench_function("decode_fenced_trailing_commas", |b| {
        b.iter(|| black_box(decode_object(black_box(&cleaned)).is_ok()));
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let records = synthetic_records(500);
    c.bench_function("aggregate_500_items", |b| {
        b.iter(|| {
            let report = aggregate::aggregate(Uuid::nil(), black_box(records.clone()), None);
            black_box(report.corrected_holistic);
        });
    });
}

criterion_group!(perf_core, bench_decode, bench_aggregate);
criterion_main!(perf_core);
