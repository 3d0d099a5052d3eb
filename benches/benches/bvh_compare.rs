// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::hash::{Hash, Hasher};

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use overstory_bvh::glam::DVec3;
use overstory_bvh::{Aabb3, Entity, Tree};

#[derive(Debug)]
struct Particle {
    id: u32,
    position: DVec3,
}

impl PartialEq for Particle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Particle {}

impl Hash for Particle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Entity for Particle {
    fn position(&self) -> DVec3 {
        self.position
    }

    fn radius(&self) -> f64 {
        1.0
    }
}

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn coord(&mut self, extent: u64) -> f64 {
        (self.next_u64() % extent) as f64
    }
}

fn gen_particles(count: u32, extent: u64) -> Vec<Particle> {
    let mut rng = Rng::new(1_313_131_313);
    (0..count)
        .map(|id| Particle {
            id,
            position: DVec3::new(
                rng.coord(extent),
                rng.coord(extent),
                rng.coord(extent),
            ),
        })
        .collect()
}

fn build_tree(particles: &[Particle]) -> Tree<&Particle> {
    let mut tree = Tree::new();
    for p in particles {
        tree.add(p);
    }
    tree
}

struct Ray {
    pos: DVec3,
    dir: DVec3,
}

impl Ray {
    fn intersects(&self, aabb: &Aabb3) -> bool {
        let inv = self.dir.recip();
        let t1 = (aabb.min.x - self.pos.x) * inv.x;
        let t2 = (aabb.max.x - self.pos.x) * inv.x;
        let t3 = (aabb.min.y - self.pos.y) * inv.y;
        let t4 = (aabb.max.y - self.pos.y) * inv.y;
        let t5 = (aabb.min.z - self.pos.z) * inv.z;
        let t6 = (aabb.max.z - self.pos.z) * inv.z;

        let tmin = t1.min(t2).max(t3.min(t4)).max(t5.min(t6));
        let tmax = t1.max(t2).min(t3.max(t4)).min(t5.max(t6));

        tmax >= 0.0 && tmin <= tmax
    }
}

const GUNSHOT: Ray = Ray {
    pos: DVec3::ZERO,
    dir: DVec3::new(45.0, 45.0, 0.0),
};

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for &n in &[1_000_u32, 10_000] {
        let particles = gen_particles(n, 10_000);
        group.throughput(Throughput::Elements(u64::from(n)));
        group.bench_function(format!("insert_n{}", n), |b| {
            b.iter_batched(
                || (),
                |()| {
                    let tree = build_tree(&particles);
                    black_box(tree.len());
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_ray_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("ray_traversal");
    for &n in &[1_000_u32, 10_000, 100_000] {
        let particles = gen_particles(n, 10_000);
        let tree = build_tree(&particles);
        group.throughput(Throughput::Elements(u64::from(n)));

        group.bench_function(format!("bvh_n{}", n), |b| {
            b.iter(|| {
                let hits = tree.traverse(|aabb| GUNSHOT.intersects(aabb));
                black_box(hits.len());
            })
        });

        group.bench_function(format!("linear_scan_n{}", n), |b| {
            b.iter(|| {
                let hits = particles
                    .iter()
                    .filter(|p| GUNSHOT.intersects(&Aabb3::from_entity(p)))
                    .count();
                black_box(hits);
            })
        });
    }
    group.finish();
}

fn bench_parallel_traverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_traverse");
    let particles = gen_particles(100_000, 10_000);
    let tree = build_tree(&particles);
    // A fat region so both subtrees contribute real work.
    let region = Aabb3::new(DVec3::splat(2_000.0), DVec3::splat(8_000.0));

    group.bench_function("serial", |b| {
        b.iter(|| {
            let hits = tree.traverse(|aabb| aabb.intersects(&region));
            black_box(hits.len());
        })
    });

    group.bench_function("concurrent", |b| {
        b.iter(|| {
            let hits = tree.concurrent_traverse(|aabb| aabb.intersects(&region));
            black_box(hits.len());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_ray_traversal,
    bench_parallel_traverse,
);
criterion_main!(benches);
