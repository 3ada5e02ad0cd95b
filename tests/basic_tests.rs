use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use fsdb::{FieldDescriptor, FieldType, Manager, Value, Values};

fn dt(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn open_manager(root: &std::path::Path) -> Result<Manager> {
    let mut manager = Manager::new(root);
    manager.create_database("test_db")?;
    manager.open_database("test_db")?;
    Ok(manager)
}

fn test_table_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("id", FieldType::Int),
        FieldDescriptor::new("val1", FieldType::Str),
        FieldDescriptor::new("val2", FieldType::Datetime),
        FieldDescriptor::new("val3", FieldType::List),
    ]
}

#[test]
fn create_reopen_and_read_back() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut manager = open_manager(root.path())?;

    manager.create_table("test_table", test_table_fields())?;
    let rec1_id = manager
        .create_record(
            "test_table",
            Values::from([
                ("val1".to_string(), Value::from("test_val1-1")),
                ("val2".to_string(), Value::from(dt(2000, 1, 1))),
            ]),
        )?
        .id()?;
    let rec2_id = manager
        .create_record(
            "test_table",
            Values::from([
                ("val1".to_string(), Value::from("test_val1-2")),
                ("val2".to_string(), Value::from(dt(2000, 1, 2))),
            ]),
        )?
        .id()?;

    assert_eq!(rec1_id, Value::Int(1));
    assert_eq!(rec2_id, Value::Int(2));

    // reopen the database and confirm the data came back from disk
    manager.close_database()?;
    manager.open_database("test_db")?;

    let records = manager.search_records("test_table", &[], None, None)?;
    assert_eq!(records.len(), 2);

    let rec1 = manager.browse_record("test_table", &rec1_id)?.expect("record 1 exists");
    let rec2 = manager.browse_record("test_table", &rec2_id)?.expect("record 2 exists");

    let rec1_data = rec1.read(None)?;
    assert_eq!(rec1_data["val1"], Value::from("test_val1-1"));
    assert_eq!(rec1_data["val2"], Value::from(dt(2000, 1, 1)));
    assert_eq!(rec1_data["val3"], Value::Null);
    assert!(rec1_data["create_datetime"].as_datetime().is_some());
    assert!(rec1_data["modify_datetime"].as_datetime().is_some());

    let rec2_data = rec2.read(None)?;
    assert_eq!(rec2_data["val1"], Value::from("test_val1-2"));
    assert_eq!(rec2_data["val2"], Value::from(dt(2000, 1, 2)));
    assert_eq!(rec2_data["val3"], Value::Null);
    Ok(())
}

#[test]
fn write_persists_and_bumps_modify_datetime() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut manager = open_manager(root.path())?;
    manager.create_table("test_table", test_table_fields())?;

    let rec = manager.create_record(
        "test_table",
        Values::from([("val1".to_string(), Value::from("test_val1-1"))]),
    )?;
    let rec_id = rec.id()?;
    let before = rec.read(None)?["modify_datetime"].as_datetime().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(2));
    rec.write(Values::from([
        ("val1".to_string(), Value::from("edited_1")),
        ("val2".to_string(), Value::from(dt(2000, 10, 1))),
    ]))?;

    manager.close_database()?;
    manager.open_database("test_db")?;

    let rec = manager.browse_record("test_table", &rec_id)?.expect("record exists");
    let data = rec.read(None)?;
    assert_eq!(data["val1"], Value::from("edited_1"));
    assert_eq!(data["val2"], Value::from(dt(2000, 10, 1)));
    assert!(data["modify_datetime"].as_datetime().unwrap() > before);
    Ok(())
}

#[test]
fn record_document_is_canonical_json() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", test_table_fields())?;
    manager.create_record(
        "test_table",
        Values::from([("val1".to_string(), Value::from("x"))]),
    )?;

    let doc_path = root.path().join("test_db").join("test_table").join("1").join("data.json");
    let text = std::fs::read_to_string(&doc_path)?;
    // sorted keys, 2-space indent
    assert!(text.starts_with("{\n  \"create_datetime\""));
    let keys: Vec<String> = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text)?
        .keys()
        .cloned()
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(
        keys,
        vec!["create_datetime", "id", "modify_datetime", "val1", "val2", "val3"]
    );
    Ok(())
}

#[test]
fn unknown_fields_are_dropped_with_the_valid_subset_applied() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", test_table_fields())?;

    let rec = manager.create_record(
        "test_table",
        Values::from([
            ("val1".to_string(), Value::from("kept")),
            ("nope".to_string(), Value::from("dropped")),
        ]),
    )?;
    let data = rec.read(None)?;
    assert_eq!(data["val1"], Value::from("kept"));
    assert!(!data.contains_key("nope"));

    rec.write(Values::from([
        ("val1".to_string(), Value::from("kept2")),
        ("also_nope".to_string(), Value::Int(1)),
    ]))?;
    let data = rec.read(Some(&["val1", "ghost"]))?;
    assert_eq!(data.len(), 1);
    assert_eq!(data["val1"], Value::from("kept2"));
    Ok(())
}

#[test]
fn id_is_immutable_and_unique() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", test_table_fields())?;

    let rec = manager.create_record(
        "test_table",
        Values::from([("id".to_string(), Value::Int(7))]),
    )?;
    assert_eq!(rec.id()?, Value::Int(7));
    assert!(rec.write(Values::from([("id".to_string(), Value::Int(8))])).is_err());

    // same custom id again violates uniqueness
    let dup = manager.create_record(
        "test_table",
        Values::from([("id".to_string(), Value::Int(7))]),
    );
    assert!(dup.is_err());

    // generation continues past the injected id
    let next = manager.create_record("test_table", Values::new())?;
    assert_eq!(next.id()?, Value::Int(8));
    Ok(())
}

#[test]
fn table_creation_rules() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = {
        let mut manager = Manager::new(root.path());
        manager.create_database("test_db")?;
        manager.open_database("test_db")?;
        manager
    };

    // names must survive sanitization unchanged
    assert!(manager.create_table("bad name", vec![]).is_err());
    // reserved field names are rejected
    assert!(manager
        .create_table("t1", vec![FieldDescriptor::new("id_str", FieldType::Str)])
        .is_err());
    assert!(manager
        .create_table("t1", vec![FieldDescriptor::new("create_datetime", FieldType::Datetime)])
        .is_err());
    // the id override only allows int and datetime
    assert!(manager
        .create_table("t1", vec![FieldDescriptor::new("id", FieldType::Str)])
        .is_err());

    let table = manager.create_table("t1", vec![FieldDescriptor::new("val1", FieldType::Str)])?;
    assert!(manager.create_table("t1", vec![]).is_err(), "table already exists");

    // system fields got appended, id is required and unique
    let fields = table.fields()?;
    assert_eq!(
        fields.keys().cloned().collect::<Vec<_>>(),
        vec!["create_datetime", "id", "modify_datetime", "val1"]
    );
    assert_eq!(fields["id"].field_type(), FieldType::Int);
    assert!(fields["id"].is_required());
    assert!(fields["id"].is_unique());
    Ok(())
}

#[test]
fn ids_convert_both_ways() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", test_table_fields())?;
    let table = manager.database().unwrap().table("test_table")?;

    assert_eq!(table.id2str(&Value::Int(42))?, "42");
    assert_eq!(table.str2id("42")?, Value::Int(42));
    assert_eq!(
        table.ids2str(&[Value::Int(1), Value::Int(2)])?,
        vec!["1".to_string(), "2".to_string()]
    );
    assert_eq!(table.str2ids(&["1", "2"])?, vec![Value::Int(1), Value::Int(2)]);
    Ok(())
}

#[test]
fn write_records_applies_to_matching_subset() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", test_table_fields())?;
    for tag in ["a", "b", "a"] {
        manager.create_record(
            "test_table",
            Values::from([("val1".to_string(), Value::from(tag))]),
        )?;
    }

    let domain = [fsdb::DomainItem::filter("val1", fsdb::CompareOp::Eq, "a")];
    let touched = manager.write_records(
        "test_table",
        &Values::from([("val1".to_string(), Value::from("z"))]),
        &domain,
    )?;
    assert_eq!(touched.len(), 2);

    let left = manager.search_records("test_table", &domain, None, None)?;
    assert!(left.is_empty());

    let deleted = manager
        .delete_records("test_table", &[fsdb::DomainItem::filter("val1", fsdb::CompareOp::Eq, "z")])?;
    assert_eq!(deleted, 2);
    assert_eq!(manager.search_records("test_table", &[], None, None)?.len(), 1);
    Ok(())
}

#[test]
fn values_are_plain_btreemaps() {
    // Values is an alias the public API leans on; keep it boring
    let values: Values = BTreeMap::from([("x".to_string(), Value::Int(1))]);
    assert_eq!(values.len(), 1);
}
