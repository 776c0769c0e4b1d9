//! # Validation Benchmarks
//!
//! Performance of the validation gate on wide and tall frames.
//!
//! Run with: `cargo bench -p vigil-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use vigil_core::{Cell, Column, Frame, ValidationGate};

/// `cols` columns of `rows` cells; every 7th cell is missing.
fn make_frame(rows: usize, cols: usize) -> Frame {
    let columns = (0..cols)
        .map(|c| {
            Column::new(
                format!("col{}", c),
                (0..rows)
                    .map(|r| {
                        if (r + c) % 7 == 0 {
                            Cell::Missing
                        } else {
                            Cell::Number(((r * 31 + c) % 97) as f64)
                        }
                    })
                    .collect(),
            )
        })
        .collect();
    Frame::new(columns).expect("frame")
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    let gate = ValidationGate::new(0.2);

    for rows in [100usize, 1_000, 10_000].iter() {
        let reference = make_frame(*rows, 30);
        let candidate = make_frame(*rows, 30);
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| black_box(gate.validate(&reference, &candidate, "train")));
        });
    }
    group.finish();
}

fn bench_drift(c: &mut Criterion) {
    let mut group = c.benchmark_group("drift");

    for cols in [10usize, 50, 200].iter() {
        let reference = make_frame(2_000, *cols);
        let candidate = make_frame(2_000, *cols);
        group.bench_with_input(BenchmarkId::from_parameter(cols), cols, |b, _| {
            b.iter(|| black_box(ValidationGate::drift(&reference, &candidate)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate, bench_drift);
criterion_main!(benches);
