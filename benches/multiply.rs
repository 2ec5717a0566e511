use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use weft::{Coordinator, ExecConfig, MatrixBuffer};

fn fill(m: &MatrixBuffer, seed: u64) {
    let mut state = seed;
    let n = m.size();
    let view = m.cpu_write();
    for i in 0..n {
        for j in 0..n {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            view.store(i, j, ((state >> 33) % 2001) as i32 - 1000);
        }
    }
    m.release_cpu_access();
}

fn bench_multiply(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiply");
    group.sample_size(10);
    for n in [64usize, 128, 256] {
        group.bench_with_input(BenchmarkId::new("default_split", n), &n, |b, &n| {
            let coordinator = Coordinator::new(ExecConfig::default());
            let a = Arc::new(MatrixBuffer::new(n).unwrap());
            let m = Arc::new(MatrixBuffer::new(n).unwrap());
            let r = Arc::new(MatrixBuffer::new(n).unwrap());
            fill(&a, 1);
            fill(&m, 2);
            b.iter(|| {
                coordinator
                    .execute_matrix_multiplication(black_box(&a), black_box(&m), &r)
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_gpu_only(c: &mut Criterion) {
    let config = ExecConfig {
        gpu_only: true,
        gpu_share: 100,
    };
    c.bench_function("multiply/gpu_only_128", |b| {
        let coordinator = Coordinator::new(config.clone());
        let a = Arc::new(MatrixBuffer::new(128).unwrap());
        let m = Arc::new(MatrixBuffer::new(128).unwrap());
        let r = Arc::new(MatrixBuffer::new(128).unwrap());
        fill(&a, 3);
        fill(&m, 4);
        b.iter(|| {
            coordinator
                .execute_matrix_multiplication(&a, &m, &r)
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_multiply, bench_gpu_only);
criterion_main!(benches);
