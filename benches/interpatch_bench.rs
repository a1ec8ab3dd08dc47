use criterion::{black_box, criterion_group, criterion_main, Criterion};
use interpatch::{inter_diff, mixed_mode_file, parse_file_diffs};

// --- Fixture Generators ---

/// A diff with `hunks` single-line replacements spaced ten lines apart.
/// `marker` distinguishes the replacement text between the two versions.
fn generated_diff(hunks: usize, marker: &str) -> String {
    let mut diff = "--- large.txt\n+++ large.txt\n".to_string();
    for i in 0..hunks {
        let line = i * 10 + 5;
        diff.push_str(&format!(
            "@@ -{line},3 +{line},3 @@\n line {}\n-line {line}\n+{marker} {line}\n line {}\n",
            line - 1,
            line + 1,
        ));
    }
    diff
}

/// A source of `n` lines `line 1\n..line n\n`.
fn generated_source(n: usize) -> String {
    (1..=n).map(|i| format!("line {i}\n")).collect()
}

// --- Parsing Benchmarks ---

fn parsing_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");

    let simple_diff = "--- a.txt\n+++ a.txt\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
    group.bench_function("simple_diff", |b| {
        b.iter(|| parse_file_diffs(black_box(simple_diff)).unwrap())
    });

    let large_diff = generated_diff(100, "changed");
    group.bench_function("large_diff_100_hunks", |b| {
        b.iter(|| parse_file_diffs(black_box(&large_diff)).unwrap())
    });

    group.finish();
}

// --- Interdiff Benchmarks ---

fn interdiff_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Interdiff");

    // Every hunk pair overlaps, so each goes through the merge walk.
    let old_diff = generated_diff(100, "old");
    let new_diff = generated_diff(100, "new");
    group.bench_function("overlapping_100_hunks", |b| {
        b.iter(|| {
            inter_diff(
                black_box(old_diff.as_bytes()),
                black_box(new_diff.as_bytes()),
            )
            .unwrap()
        })
    });

    // Identical patches exercise the same walk but produce no output.
    group.bench_function("identical_100_hunks", |b| {
        b.iter(|| {
            inter_diff(
                black_box(old_diff.as_bytes()),
                black_box(old_diff.as_bytes()),
            )
            .unwrap()
        })
    });

    group.finish();
}

// --- Mixed Mode Benchmarks ---

fn mixed_mode_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("MixedMode");

    let source = generated_source(2000);
    let old_diff = generated_diff(50, "old");
    let new_diff = generated_diff(50, "new");
    group.bench_function("two_thousand_lines_50_hunks", |b| {
        b.iter(|| {
            mixed_mode_file(
                black_box(source.as_bytes()),
                black_box(source.as_bytes()),
                black_box(old_diff.as_bytes()),
                black_box(new_diff.as_bytes()),
            )
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, parsing_benches, interdiff_benches, mixed_mode_benches);
criterion_main!(benches);
