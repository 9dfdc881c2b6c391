use criterion::{Criterion, criterion_group, criterion_main};
use kurbo::Point;
use std::hint::black_box;

use core_zones::{InteractionZone, ZoneRegistry, ZoneShape};

fn build_registry() -> ZoneRegistry {
    let mut registry = ZoneRegistry::new();
    registry
        .add(InteractionZone::new(
            "head",
            ZoneShape::circle(Point::new(100.0, 60.0), 40.0).unwrap(),
        ))
        .unwrap();
    registry
        .add(InteractionZone::new(
            "body",
            ZoneShape::rect(Point::new(40.0, 100.0), 120.0, 140.0).unwrap(),
        ))
        .unwrap();
    registry
        .add(InteractionZone::new(
            "tail",
            ZoneShape::polygon(vec![
                Point::new(160.0, 200.0),
                Point::new(220.0, 180.0),
                Point::new(230.0, 230.0),
                Point::new(180.0, 240.0),
            ])
            .unwrap(),
        ))
        .unwrap();
    registry
}

fn bench_zones_at(c: &mut Criterion) {
    let registry = build_registry();
    let probe = [
        Point::new(100.0, 60.0),
        Point::new(100.0, 170.0),
        Point::new(200.0, 210.0),
        Point::new(400.0, 400.0),
    ];
    c.bench_function("zones_at_mixed_shapes", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for p in probe {
                hits += registry.zones_at(black_box(p)).len();
            }
            black_box(hits)
        })
    });
}

fn bench_polygon_containment(c: &mut Criterion) {
    let poly = ZoneShape::polygon(
        (0..64)
            .map(|i| {
                let angle = i as f64 / 64.0 * std::f64::consts::TAU;
                Point::new(100.0 + 80.0 * angle.cos(), 100.0 + 80.0 * angle.sin())
            })
            .collect(),
    )
    .unwrap();
    c.bench_function("polygon_contains_64_vertices", |b| {
        b.iter(|| poly.contains(black_box(Point::new(120.0, 90.0))))
    });
}

criterion_group!(benches, bench_zones_at, bench_polygon_containment);
criterion_main!(benches);
