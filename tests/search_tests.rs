use std::thread::sleep;
use std::time::Duration;

use anyhow::Result;
use fsdb::{CompareOp, DomainItem, FieldDescriptor, FieldType, FsdbError, Manager, Value, Values};

fn open_manager(root: &std::path::Path) -> Result<Manager> {
    let mut manager = Manager::new(root);
    manager.create_database("test_db")?;
    manager.open_database("test_db")?;
    Ok(manager)
}

#[test]
fn datetime_id_domains() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut manager = open_manager(root.path())?;
    manager.create_table(
        "test_table_datetime",
        vec![FieldDescriptor::new("id", FieldType::Datetime)],
    )?;

    // sequential creates; the sleep keeps generated datetime ids distinct
    manager.create_record("test_table_datetime", Values::new())?;
    sleep(Duration::from_millis(2));
    let d = manager.create_record("test_table_datetime", Values::new())?.id()?;
    sleep(Duration::from_millis(2));
    manager.create_record("test_table_datetime", Values::new())?;

    // reopen: ids come back from directory names
    manager.close_database()?;
    manager.open_database("test_db")?;

    let all = manager.search_records("test_table_datetime", &[], None, None)?;
    assert_eq!(all.len(), 3);

    let ge = manager.search_records(
        "test_table_datetime",
        &[DomainItem::filter("id", CompareOp::Ge, d.clone())],
        None,
        None,
    )?;
    assert_eq!(ge.len(), 2);

    let gt = manager.search_records(
        "test_table_datetime",
        &[DomainItem::filter("id", CompareOp::Gt, d.clone())],
        None,
        None,
    )?;
    assert_eq!(gt.len(), 1);

    // & (id != D) | (id < D) (id > D)  -> everything but D
    let either_side = manager.search_records(
        "test_table_datetime",
        &[
            DomainItem::and(),
            DomainItem::filter("id", CompareOp::Ne, d.clone()),
            DomainItem::or(),
            DomainItem::filter("id", CompareOp::Lt, d.clone()),
            DomainItem::filter("id", CompareOp::Gt, d.clone()),
        ],
        None,
        None,
    )?;
    assert_eq!(either_side.len(), 2);
    Ok(())
}

#[test]
fn field_filters_and_membership() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table(
        "test_table",
        vec![
            FieldDescriptor::new("val1", FieldType::Str),
            FieldDescriptor::new("num", FieldType::Int),
        ],
    )?;
    for (tag, num) in [("a", 1), ("b", 2), ("c", 3)] {
        manager.create_record(
            "test_table",
            Values::from([
                ("val1".to_string(), Value::from(tag)),
                ("num".to_string(), Value::Int(num)),
            ]),
        )?;
    }

    let eq = manager.search_records(
        "test_table",
        &[DomainItem::filter("val1", CompareOp::Eq, "b")],
        None,
        None,
    )?;
    assert_eq!(eq.len(), 1);
    assert_eq!(eq[0].read(Some(&["num"]))?["num"], Value::Int(2));

    let within = manager.search_records(
        "test_table",
        &[DomainItem::filter(
            "num",
            CompareOp::In,
            Value::List(vec![Value::Int(1), Value::Int(3)]),
        )],
        None,
        None,
    )?;
    assert_eq!(within.len(), 2);

    let outside = manager.search_records(
        "test_table",
        &[DomainItem::filter(
            "num",
            CompareOp::NotIn,
            Value::List(vec![Value::Int(1), Value::Int(3)]),
        )],
        None,
        None,
    )?;
    assert_eq!(outside.len(), 1);

    // implicit conjunction between adjacent filters
    let both = manager.search_records(
        "test_table",
        &[
            DomainItem::filter("num", CompareOp::Ge, Value::Int(2)),
            DomainItem::filter("val1", CompareOp::Ne, "c"),
        ],
        None,
        None,
    )?;
    assert_eq!(both.len(), 1);
    Ok(())
}

#[test]
fn malformed_domains_are_rejected() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", vec![FieldDescriptor::new("val1", FieldType::Str)])?;
    manager.create_record("test_table", Values::new())?;

    // unknown field
    let err = manager.search_records(
        "test_table",
        &[DomainItem::filter("ghost", CompareOp::Eq, Value::Int(1))],
        None,
        None,
    );
    assert!(matches!(err, Err(FsdbError::Domain(_))));

    // in with a non-list value
    let err = manager.search_records(
        "test_table",
        &[DomainItem::filter("val1", CompareOp::In, Value::Int(1))],
        None,
        None,
    );
    assert!(matches!(err, Err(FsdbError::Domain(_))));

    // dangling operator
    let err = manager.search_records(
        "test_table",
        &[DomainItem::and(), DomainItem::filter("val1", CompareOp::Eq, "x")],
        None,
        None,
    );
    assert!(matches!(err, Err(FsdbError::Domain(_))));
    Ok(())
}

#[test]
fn ordering_and_limit() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table(
        "test_table",
        vec![
            FieldDescriptor::new("group", FieldType::Str),
            FieldDescriptor::new("rank", FieldType::Int),
        ],
    )?;
    for (group, rank) in [("b", 1), ("a", 2), ("b", 3), ("a", 1)] {
        manager.create_record(
            "test_table",
            Values::from([
                ("group".to_string(), Value::from(group)),
                ("rank".to_string(), Value::Int(rank)),
            ]),
        )?;
    }

    // leftmost clause is the primary key
    let ordered =
        manager.search_records("test_table", &[], Some("group asc, rank desc"), None)?;
    let snapshot: Vec<(String, i64)> = ordered
        .iter()
        .map(|rec| {
            let data = rec.read(Some(&["group", "rank"])).unwrap();
            (data["group"].as_str().unwrap().to_string(), data["rank"].as_i64().unwrap())
        })
        .collect();
    assert_eq!(
        snapshot,
        vec![
            ("a".to_string(), 2),
            ("a".to_string(), 1),
            ("b".to_string(), 3),
            ("b".to_string(), 1),
        ]
    );

    // unknown order field
    let err = manager.search_records("test_table", &[], Some("ghost asc"), None);
    assert!(matches!(err, Err(FsdbError::Order(_))));

    // malformed order strings
    let err = manager.search_records("test_table", &[], Some("rank sideways"), None);
    assert!(matches!(err, Err(FsdbError::Order(_))));

    // limit without a domain slices the id list
    let limited = manager.search_records("test_table", &[], None, Some(2))?;
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id()?, Value::Int(1));
    assert_eq!(limited[1].id()?, Value::Int(2));

    // limit with a domain bounds the filtered result
    let limited = manager.search_records(
        "test_table",
        &[DomainItem::filter("group", CompareOp::Eq, "b")],
        None,
        Some(1),
    )?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

#[test]
fn browse_skips_missing_ids() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", vec![FieldDescriptor::new("val1", FieldType::Str)])?;
    manager.create_record("test_table", Values::new())?;
    manager.create_record("test_table", Values::new())?;

    let records =
        manager.browse_records("test_table", &[Value::Int(1), Value::Int(99), Value::Int(2)])?;
    assert_eq!(records.len(), 2);

    assert!(manager.browse_record("test_table", &Value::Int(99))?.is_none());
    assert!(manager.browse_record("test_table", &Value::Int(1))?.is_some());
    Ok(())
}

#[test]
fn legacy_wire_domains_still_parse() -> Result<()> {
    let root = tempfile::tempdir()?;
    let manager = open_manager(root.path())?;
    manager.create_table("test_table", vec![FieldDescriptor::new("num", FieldType::Int)])?;
    for num in 1..=4 {
        manager.create_record(
            "test_table",
            Values::from([("num".to_string(), Value::Int(num))]),
        )?;
    }

    let raw = serde_json::json!(["|", ["num", "<", 2], ["num", ">=", 4]]);
    let domain = fsdb::domain::domain_from_json(&raw)?;
    let hits = manager.search_records("test_table", &domain, None, None)?;
    assert_eq!(hits.len(), 2);
    Ok(())
}
