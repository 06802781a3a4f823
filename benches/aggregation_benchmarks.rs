//! Aggregation benchmarks: point reads, roll-ups, cache hits, area writes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cuboid::Database;

/// datatypes{Actual, Plan} x 5 years x 12 months x 50 products, fully
/// populated on the Plan slice.
fn build_db() -> Database {
    let db = Database::new("bench");

    db.add_dimension("datatypes").expect("dim");
    {
        let mut edit = db.edit_dimension("datatypes").expect("edit");
        edit.add_member("Actual", None, 1.0).expect("member");
        edit.add_member("Plan", None, 1.0).expect("member");
        edit.commit().expect("commit");
    }

    db.add_dimension("years").expect("dim");
    {
        let mut edit = db.edit_dimension("years").expect("edit");
        for year in 2020..2025 {
            edit.add_member(&year.to_string(), None, 1.0).expect("member");
        }
        edit.commit().expect("commit");
    }

    db.add_dimension("months").expect("dim");
    {
        let mut edit = db.edit_dimension("months").expect("edit");
        edit.add_member("Year", None, 1.0).expect("member");
        for month in 1..=12 {
            edit.add_member(&format!("M{month:02}"), Some("Year"), 1.0)
                .expect("member");
        }
        edit.commit().expect("commit");
    }

    db.add_dimension("products").expect("dim");
    {
        let mut edit = db.edit_dimension("products").expect("edit");
        edit.add_member("Total", None, 1.0).expect("member");
        for product in 0..50 {
            edit.add_member(&format!("P{product:03}"), Some("Total"), 1.0)
                .expect("member");
        }
        edit.commit().expect("commit");
    }

    let cube = db
        .add_cube("sales", &["datatypes", "years", "months", "products"])
        .expect("cube");

    for year in 2020..2025 {
        let year = year.to_string();
        for month in 1..=12 {
            let month = format!("M{month:02}");
            for product in 0..50u32 {
                let name = format!("P{product:03}");
                cube.write(&["Plan", &year, &month, &name], f64::from(product + 1))
                    .expect("write");
            }
        }
    }
    db
}

fn bench_point_read(c: &mut Criterion) {
    let db = build_db();
    let cube = db.cube("sales").expect("cube");
    c.bench_function("point_read", |b| {
        b.iter(|| {
            black_box(
                cube.read(black_box(&["Plan", "2022", "M06", "P025"]))
                    .expect("read"),
            )
        })
    });
}

fn bench_rollup_cold(c: &mut Criterion) {
    let db = build_db();
    let cube = db.cube("sales").expect("cube");
    c.bench_function("rollup_cold", |b| {
        b.iter(|| {
            // invalidate the cache, then aggregate the full Plan year
            cube.write(&["Plan", "2020", "M01", "P000"], 1.0).expect("write");
            black_box(
                cube.read(black_box(&["Plan", "2022", "Year", "products:Total"]))
                    .expect("read"),
            )
        })
    });
}

fn bench_rollup_cached(c: &mut Criterion) {
    let db = build_db();
    let cube = db.cube("sales").expect("cube");
    // warm the cache once
    cube.read(&["Plan", "2022", "Year", "products:Total"]).expect("read");
    c.bench_function("rollup_cached", |b| {
        b.iter(|| {
            black_box(
                cube.read(black_box(&["Plan", "2022", "Year", "products:Total"]))
                    .expect("read"),
            )
        })
    });
}

fn bench_area_write(c: &mut Criterion) {
    let db = build_db();
    let cube = db.cube("sales").expect("cube");
    c.bench_function("area_write_year", |b| {
        b.iter(|| {
            cube.area(&["Plan", "2023"])
                .expect("area")
                .set_value(black_box(7.0), true)
                .expect("set")
        })
    });
}

criterion_group!(
    benches,
    bench_point_read,
    bench_rollup_cold,
    bench_rollup_cached,
    bench_area_write
);
criterion_main!(benches);
