//! Integration tests for the document store.

use serde_json::{json, Value};
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use timesheet_store::{DeleteOutcome, LoadOutcome, Query, Store, StoreConfig};

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("data"),
        debounce: Duration::from_millis(50),
        ..Default::default()
    }
}

fn test_store(dir: &TempDir) -> Store {
    Store::open(test_config(dir)).unwrap()
}

fn on_disk(store: &Store) -> Value {
    serde_json::from_slice(&fs::read(store.document_path()).unwrap()).unwrap()
}

// --- Realistic Workflow Tests ---

#[test]
fn test_hours_registration_workflow() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    {
        let store = Store::open(config.clone()).unwrap();

        let jan = store.create("werknemers", json!({"naam": "Jan"})).unwrap();
        let jan_id = jan.id().unwrap().to_string();

        let hours = store
            .create(
                "uren",
                json!({"werknemerId": jan_id, "datum": "2025-03-04", "uren": 8}),
            )
            .unwrap();
        let hours_id = hours.id().unwrap().to_string();

        store
            .update("uren", &hours_id, json!({"uren": 7.5}))
            .unwrap()
            .unwrap();
        store.force_save().unwrap();
    }

    let store = Store::open(config).unwrap();
    assert_eq!(store.load_outcome(), &LoadOutcome::Clean);

    let hours = store.get("uren");
    assert_eq!(hours.len(), 1);
    assert_eq!(hours[0].get("uren"), Some(&json!(7.5)));

    let employees = store.get("werknemers");
    assert_eq!(employees.len(), 1);
    assert_eq!(employees[0].get("naam"), Some(&json!("Jan")));
    assert_eq!(employees[0].get("actief"), Some(&json!(true)));
    assert_eq!(hours[0].get("werknemerId"), Some(&json!(employees[0].id().unwrap())));
}

#[test]
fn test_monthly_overview_query() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    for (emp, datum, uren) in [
        ("e1", "2025-03-04", 8),
        ("e1", "2025-03-18", 6),
        ("e2", "2025-03-05", 4),
        ("e1", "2025-04-01", 7),
    ] {
        store
            .create("uren", json!({"werknemerId": emp, "datum": datum, "uren": uren}))
            .unwrap();
    }

    let march = store.query(
        "uren",
        &Query::new()
            .eq("werknemerId", "e1")
            .month("datum", "2025-03")
            .sort_desc("datum"),
    );

    let dates: Vec<&Value> = march.iter().map(|r| r.get("datum").unwrap()).collect();
    assert_eq!(dates, vec![&json!("2025-03-18"), &json!("2025-03-04")]);
}

#[test]
fn test_absence_type_filter() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store
        .create("afwezigheden", json!({"werknemerId": "e1", "startDatum": "2025-07-01", "type": "VAKANTIE"}))
        .unwrap();
    store
        .create("afwezigheden", json!({"werknemerId": "e1", "startDatum": "2025-07-10", "type": "ZIEKTE"}))
        .unwrap();

    let sick = store.query("afwezigheden", &Query::new().eq("type", "ZIEKTE"));
    assert_eq!(sick.len(), 1);
    assert_eq!(sick[0].get("startDatum"), Some(&json!("2025-07-10")));
}

#[test]
fn test_soft_delete_keeps_history_resolvable() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let jan = store.create("werknemers", json!({"naam": "Jan"})).unwrap();
    let jan_id = jan.id().unwrap().to_string();
    store
        .create("uren", json!({"werknemerId": jan_id, "datum": "2025-03-04", "uren": 8}))
        .unwrap();
    store
        .create("kilometers", json!({"werknemerId": jan_id, "datum": "2025-03-04", "kilometers": 30}))
        .unwrap();

    assert_eq!(store.delete("werknemers", &jan_id), DeleteOutcome::Deactivated);

    // Still in the underlying sequence, flagged inactive.
    let all = store.get("werknemers");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("actief"), Some(&json!(false)));

    // Hidden from active listings.
    assert!(store.query("werknemers", &Query::new().active("actief")).is_empty());

    // Dependent records still resolve their employee.
    for table in ["uren", "kilometers"] {
        let rows = store.get(table);
        let employee_id = rows[0].get("werknemerId").and_then(Value::as_str).unwrap();
        assert!(store.get_by_id("werknemers", employee_id).is_some());
    }
}

#[test]
fn test_delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let record = store.create("uren", json!({"uren": 3})).unwrap();
    let id = record.id().unwrap();

    assert_eq!(store.delete("uren", id), DeleteOutcome::Removed);
    assert_eq!(store.delete("uren", id), DeleteOutcome::Unchanged);
    assert_eq!(store.delete("onbekend", id), DeleteOutcome::Unchanged);
}

#[test]
fn test_import_upserts_by_employee_and_date() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let backup = store.begin_import("uren").unwrap().unwrap();
    assert!(backup
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("-before-import-uren.json"));

    for uren in [8, 6] {
        store
            .upsert(
                "uren",
                &["werknemerId", "datum"],
                json!({"werknemerId": "e1", "datum": "2025-03-04", "uren": uren}),
            )
            .unwrap();
    }

    let rows = store.get("uren");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("uren"), Some(&json!(6)));
}

#[test]
fn test_replace_table() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store.create("gratisCola", json!({"gratis": 1})).unwrap();
    let count = store
        .replace_table(
            "gratisCola",
            vec![json!({"gratis": 2, "verkocht": 5}), json!({"gratis": 0, "verkocht": 3})],
        )
        .unwrap();

    assert_eq!(count, 2);
    let rows = store.get("gratisCola");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.id().is_some()));
}

// --- Persistence Tests ---

#[test]
fn test_debounce_coalesces_writes() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let before = store.save_stats().writes;

    for i in 0..25 {
        store.create("uren", json!({"uren": i})).unwrap();
    }
    assert!(store.has_pending_save());

    thread::sleep(Duration::from_millis(400));

    assert_eq!(store.save_stats().writes, before + 1);
    assert!(!store.has_pending_save());
    assert_eq!(on_disk(&store)["uren"].as_array().unwrap().len(), 25);
}

#[test]
fn test_force_save_bypasses_debounce() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        debounce: Duration::from_millis(200),
        ..test_config(&dir)
    };
    let store = Store::open(config).unwrap();
    let before = store.save_stats().writes;

    store.create("uren", json!({"uren": 8})).unwrap();
    store.force_save().unwrap();

    assert_eq!(store.save_stats().writes, before + 1);
    assert_eq!(on_disk(&store)["uren"].as_array().unwrap().len(), 1);

    // The cancelled timer must not produce a second write.
    thread::sleep(Duration::from_millis(500));
    assert_eq!(store.save_stats().writes, before + 1);
}

#[test]
fn test_persisted_document_shape() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let record = store.create("kilometers", json!({"kilometers": 12.5})).unwrap();
    store.force_save().unwrap();

    let document = on_disk(&store);
    let row = &document["kilometers"][0];
    assert_eq!(row["id"], json!(record.id().unwrap()));
    assert!(row["createdAt"].as_str().unwrap().ends_with('Z'));
    assert!(row["updatedAt"].is_string());
    assert_eq!(row["kilometers"], json!(12.5));

    // Pretty-printed.
    let text = fs::read_to_string(store.document_path()).unwrap();
    assert!(text.contains("\n  "));
}

#[test]
fn test_float_fields_survive_reload_exactly() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let values = [
        7.5,
        90.16994374947419,
        3.262379212492639e-14,
        0.1 + 0.2,
        123.456789012345,
        f64::MAX,
        f64::MIN_POSITIVE,
    ];

    let expected = {
        let store = Store::open(config.clone()).unwrap();
        let rows = values.iter().map(|v| json!({"kilometers": v})).collect();
        store.replace_table("kilometers", rows).unwrap();
        store.force_save().unwrap();
        store.get("kilometers")
    };

    let store = Store::open(config).unwrap();
    let reloaded = store.get("kilometers");
    assert_eq!(reloaded, expected);
    for (row, value) in reloaded.iter().zip(values) {
        assert_eq!(row.get("kilometers").and_then(Value::as_f64), Some(value));
    }
}
