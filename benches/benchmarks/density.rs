use criterion::{criterion_group, Criterion};

use cosmosph::sph::{density_pass, DomainBounds, NeighborGrid, ParticleStore, PeriodicBox, SimulationConfig, SoloComm};
use cosmosph::units::{Point, Real, Vector};

fn lattice_world(n_axis: usize) -> (ParticleStore, PeriodicBox) {
    let spacing: Real = 1.0;
    let boxm = PeriodicBox::new(n_axis as Real * spacing);
    let mut store = ParticleStore::new();
    let mut id = 0;
    for ix in 0..n_axis {
        for iy in 0..n_axis {
            for iz in 0..n_axis {
                let p = Point::new(
                    (ix as Real + 0.5) * spacing,
                    (iy as Real + 0.5) * spacing,
                    (iz as Real + 0.5) * spacing,
                );
                store.push_gas(id, p, Vector::new(0.0, 0.0, 0.0), 1.0, 2.0, 1.0);
                id += 1;
            }
        }
    }
    (store, boxm)
}

fn bench_density_pass(c: &mut Criterion) {
    let (store, boxm) = lattice_world(12);
    let cfg = SimulationConfig::default();

    c.bench_function(
        &format!("density_pass over a uniform lattice of {} particles", store.len()),
        |b| {
            b.iter(|| {
                let mut world = store.clone();
                let grid = NeighborGrid::build(&world, &boxm, 2.0);
                let domains = [DomainBounds::enclosing(&world.positions)];
                let mut comm = SoloComm;
                density_pass(&cfg, &mut world, &grid, &boxm, &domains, &mut comm).unwrap()
            })
        },
    );
}

criterion_group!(density, bench_density_pass);
