use criterion::{black_box, criterion_group, Criterion};

use cosmosph::sph::smoothing_kernel::{CubicSpline, Kernel, WendlandC2};
use cosmosph::units::Real;

fn bench_kernel_evaluation(c: &mut Criterion) {
    let cubic = CubicSpline::new(1.0);
    let wendland = WendlandC2::new(1.0);
    let radii: Vec<Real> = (0..1000).map(|i| i as Real / 1000.0).collect();

    c.bench_function("cubic spline evaluate + derivative over support", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &r in &radii {
                acc += cubic.evaluate(r * r, black_box(r)) + cubic.derivative(r);
            }
            acc
        })
    });
    c.bench_function("wendland c2 evaluate + derivative over support", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &r in &radii {
                acc += wendland.evaluate(r * r, black_box(r)) + wendland.derivative(r);
            }
            acc
        })
    });
}

criterion_group!(smoothing_kernel, bench_kernel_evaluation);
