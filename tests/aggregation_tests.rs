//! Aggregation Engine Integration Tests
//!
//! Tests for:
//! - Hierarchical roll-ups over sparse facts
//! - Weighted aggregation (negative edge weights)
//! - Diamond hierarchies (path-weight summation)
//! - Cache correctness under writes and structural edits
//! - Boundary behaviors (single-leaf cubes, empty areas)

use cuboid::{CellValue, Database};

// ============================================================================
// Test Helpers
// ============================================================================

/// The planning database: datatypes x years x periods x regions x products.
fn tesla_db() -> Database {
    let db = Database::new("tesla");

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
        for year in ["2021", "2022", "2023"] {
            edit.add_member(year, None, 1.0).expect("member");
        }
        edit.commit().expect("commit");
    }

    db.add_dimension("periods").expect("dim");
    {
        let mut edit = db.edit_dimension("periods").expect("edit");
        edit.add_member("Year", None, 1.0).expect("member");
        for quarter in ["Q1", "Q2", "Q3", "Q4"] {
            edit.add_member(quarter, Some("Year"), 1.0).expect("member");
        }
        edit.commit().expect("commit");
    }

    db.add_dimension("regions").expect("dim");
    {
        let mut edit = db.edit_dimension("regions").expect("edit");
        edit.add_member("Total", None, 1.0).expect("member");
        for region in ["North", "South", "West", "East"] {
            edit.add_member(region, Some("Total"), 1.0).expect("member");
        }
        edit.commit().expect("commit");
    }

    db.add_dimension("products").expect("dim");
    {
        let mut edit = db.edit_dimension("products").expect("edit");
        edit.add_member("Total", None, 1.0).expect("member");
        for product in ["Model S", "Model 3", "Model X", "Model Y"] {
            edit.add_member(product, Some("Total"), 1.0).expect("member");
        }
        edit.commit().expect("commit");
    }

    db.add_cube(
        "sales",
        &["datatypes", "years", "periods", "regions", "products"],
    )
    .expect("cube");
    db
}

// ============================================================================
// Scenario: five-dimension roll-up
// ============================================================================

#[test]
fn test_five_dimension_rollup() {
    let db = tesla_db();
    let sales = db.cube("sales").expect("cube");

    sales
        .write(&["Plan", "2021", "Q1", "North", "Model S"], 400.0)
        .expect("write");
    sales
        .write(&["Plan", "2021", "Q1", "North", "Model X"], 200.0)
        .expect("write");

    assert_eq!(
        sales
            .read(&["Plan", "2021", "Q1", "North", "products:Total"])
            .expect("read"),
        600.0
    );
    assert_eq!(
        sales
            .read(&["Plan", "2021", "Year", "regions:Total", "products:Total"])
            .expect("read"),
        600.0
    );
    // nothing stored for 2022: aggregations default to zero
    assert_eq!(
        sales.read(&["Plan", "2022", "*", "*", "*"]).expect("read"),
        0.0
    );
}

#[test]
fn test_base_reads_come_back_verbatim() {
    let db = tesla_db();
    let sales = db.cube("sales").expect("cube");

    sales
        .write(&["Actual", "2021", "Q2", "South", "Model 3"], 123.5)
        .expect("write");
    assert_eq!(
        sales
            .read(&["Actual", "2021", "Q2", "South", "Model 3"])
            .expect("read"),
        123.5
    );
    // an unwritten base cell reads as zero
    assert_eq!(
        sales
            .read(&["Actual", "2021", "Q2", "South", "Model Y"])
            .expect("read"),
        0.0
    );
}

#[test]
fn test_zero_write_removes_fact() {
    let db = tesla_db();
    let sales = db.cube("sales").expect("cube");
    let addr = ["Plan", "2021", "Q1", "North", "Model S"];

    sales.write(&addr, 400.0).expect("write");
    assert_eq!(sales.fact_count(), 1);
    sales.write(&addr, 0.0).expect("write");
    assert_eq!(sales.fact_count(), 0);
    assert_eq!(sales.read(&addr).expect("read"), 0.0);
}

// ============================================================================
// Scenario: weighted aggregation
// ============================================================================

fn delta_db() -> Database {
    let db = Database::new("delta");
    db.add_dimension("datatypes").expect("dim");
    {
        let mut edit = db.edit_dimension("datatypes").expect("edit");
        edit.add_member("Actual", None, 1.0).expect("member");
        edit.add_member("Plan", None, 1.0).expect("member");
        edit.add_member("Delta", None, 1.0).expect("member");
        edit.add_child_edge("Delta", "Actual", 1.0).expect("edge");
        edit.add_child_edge("Delta", "Plan", -1.0).expect("edge");
        edit.commit().expect("commit");
    }

    db.add_dimension("years").expect("dim");
    {
        let mut edit = db.edit_dimension("years").expect("edit");
        edit.add_member("Y1", None, 1.0).expect("member");
        edit.commit().expect("commit");
    }

    db.add_cube("facts", &["datatypes", "years"]).expect("cube");
    db
}

#[test]
fn test_weighted_aggregation() {
    let db = delta_db();
    let cube = db.cube("facts").expect("cube");

    cube.write(&["Actual", "Y1"], 150.0).expect("write");
    cube.write(&["Plan", "Y1"], 100.0).expect("write");

    assert_eq!(cube.read(&["Delta", "Y1"]).expect("read"), 50.0);
}

#[test]
fn test_weight_change_is_a_structural_edit() {
    let db = delta_db();
    let cube = db.cube("facts").expect("cube");
    cube.write(&["Actual", "Y1"], 150.0).expect("write");
    cube.write(&["Plan", "Y1"], 100.0).expect("write");
    assert_eq!(cube.read(&["Delta", "Y1"]).expect("read"), 50.0);

    {
        let mut edit = db.edit_dimension("datatypes").expect("edit");
        edit.set_weight("Delta", "Plan", 1.0).expect("weight");
        edit.commit().expect("commit");
    }

    assert_eq!(cube.read(&["Delta", "Y1"]).expect("read"), 250.0);
}

// ============================================================================
// Scenario: diamond hierarchies
// ============================================================================

fn diamond_db() -> Database {
    let db = Database::new("diamond");
    db.add_dimension("regions").expect("dim");
    {
        let mut edit = db.edit_dimension("regions").expect("edit");
        edit.add_member("Total", None, 1.0).expect("member");
        edit.add_member("North", Some("Total"), 1.0).expect("member");
        edit.add_member("Coastal", Some("Total"), 1.0).expect("member");
        edit.add_member("NewYork", Some("North"), 1.0).expect("member");
        edit.add_child_edge("Coastal", "NewYork", 1.0).expect("edge");
        edit.commit().expect("commit");
    }
    db.add_cube("population", &["regions"]).expect("cube");
    db
}

#[test]
fn test_diamond_counts_both_paths() {
    let db = diamond_db();
    let cube = db.cube("population").expect("cube");

    cube.write(&["NewYork"], 10.0).expect("write");
    assert_eq!(cube.read(&["Total"]).expect("read"), 20.0);
    // the intermediate parents each see it once
    assert_eq!(cube.read(&["North"]).expect("read"), 10.0);
    assert_eq!(cube.read(&["Coastal"]).expect("read"), 10.0);
}

// ============================================================================
// Scenario: cache invalidation under structural edits
// ============================================================================

#[test]
fn test_cache_invalidation_on_structural_edit() {
    let db = diamond_db();
    let cube = db.cube("population").expect("cube");

    cube.write(&["NewYork"], 10.0).expect("write");
    assert_eq!(cube.read(&["Total"]).expect("read"), 20.0);
    // the repeat read is served from cache
    assert_eq!(cube.read(&["Total"]).expect("read"), 20.0);

    {
        let mut edit = db.edit_dimension("regions").expect("edit");
        edit.add_member("NY2", Some("Total"), 1.0).expect("member");
        edit.commit().expect("commit");
    }

    cube.write(&["NY2"], 5.0).expect("write");
    assert_eq!(cube.read(&["Total"]).expect("read"), 25.0);
}

#[test]
fn test_cache_invalidation_on_write() {
    let db = diamond_db();
    let cube = db.cube("population").expect("cube");

    cube.write(&["NewYork"], 10.0).expect("write");
    assert_eq!(cube.read(&["Total"]).expect("read"), 20.0);
    cube.write(&["NewYork"], 11.0).expect("write");
    assert_eq!(cube.read(&["Total"]).expect("read"), 22.0);

    let stats = cube.cube_stats();
    assert!(stats.cache_misses >= 2);
}

#[test]
fn test_parent_equals_weighted_child_sum() {
    let db = tesla_db();
    let sales = db.cube("sales").expect("cube");
    for (region, value) in [("North", 10.0), ("South", 20.0), ("West", 40.0), ("East", 80.0)] {
        sales
            .write(&["Plan", "2021", "Q1", region, "Model S"], value)
            .expect("write");
    }
    let total = sales
        .read(&["Plan", "2021", "Q1", "regions:Total", "Model S"])
        .expect("read");
    let mut by_children = 0.0;
    for region in ["North", "South", "West", "East"] {
        by_children += sales
            .read(&["Plan", "2021", "Q1", region, "Model S"])
            .expect("read")
            .as_f64();
    }
    assert_eq!(total, by_children);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn test_single_leaf_cube_root_equals_leaf() {
    let db = Database::new("tiny");
    db.add_dimension("only").expect("dim");
    {
        let mut edit = db.edit_dimension("only").expect("edit");
        edit.add_member("Root", None, 1.0).expect("member");
        edit.add_member("Leaf", Some("Root"), 1.0).expect("member");
        edit.commit().expect("commit");
    }
    let cube = db.add_cube("tiny", &["only"]).expect("cube");

    cube.write(&["Leaf"], 7.0).expect("write");
    assert_eq!(cube.read(&["Root"]).expect("read"), 7.0);
    assert_eq!(cube.read(&["Leaf"]).expect("read"), 7.0);
}

#[test]
fn test_empty_aggregation_is_zero_not_none() {
    let db = diamond_db();
    let cube = db.cube("population").expect("cube");
    let value = cube.read(&["Total"]).expect("read");
    assert_eq!(value, CellValue::Value(0.0));
    assert!(!value.is_none());
}

#[test]
fn test_write_to_aggregated_member_rejected() {
    let db = diamond_db();
    let cube = db.cube("population").expect("cube");
    let err = cube.write(&["Total"], 1.0).expect_err("aggregated");
    assert!(matches!(err, cuboid::EngineError::NotBaseAddress(_)));
}
