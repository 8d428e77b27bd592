#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use tangerine::{Result, Tangerine, Value};

fn round_trip(value: &Value) -> Result<Value> {
    Tangerine::from_bytes(&Tangerine::to_bytes(value)?)
}

#[test]
fn primitives_round_trip() -> Result<()> {
    for value in [
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(-40),
        Value::Int(i64::MAX),
        Value::UInt(u64::MAX),
        Value::Float(2.5),
        Value::Float(-0.125),
        Value::Char('ß'),
    ] {
        assert_eq!(round_trip(&value)?, value);
    }
    Ok(())
}

#[test]
fn strings_round_trip_exactly() -> Result<()> {
    for text in ["", "hello", "  padded  ", "snö & <tags> \"quoted\"", "日本語"] {
        let value = Value::string(text);
        let back = round_trip(&value)?;
        assert_eq!(back.as_str().as_deref(), Some(text));
    }
    Ok(())
}

#[test]
fn arrays_round_trip() -> Result<()> {
    let value = Value::array(vec![
        Value::Int(1),
        Value::string("two"),
        Value::array(vec![Value::Bool(true), Value::Bool(false)]),
    ]);
    assert_eq!(round_trip(&value)?, value);

    let empty = Value::array(Vec::new());
    assert_eq!(round_trip(&empty)?, empty);
    Ok(())
}

#[test]
fn mappings_round_trip_in_order() -> Result<()> {
    let value = Value::map(vec![
        (Value::Int(1), Value::string("one")),
        (Value::Int(2), Value::string("two")),
    ]);
    assert_eq!(round_trip(&value)?, value);
    Ok(())
}

#[test]
fn records_and_objects_round_trip() -> Result<()> {
    let value = Value::record(
        "Save",
        vec![
            ("turn", Value::UInt(9)),
            (
                "hero",
                Value::object(
                    "Player",
                    vec![("name", Value::string("ada")), ("hp", Value::Int(40))],
                ),
            ),
        ],
    );
    assert_eq!(round_trip(&value)?, value);
    Ok(())
}

#[test]
fn enums_aliases_and_nulls_round_trip() -> Result<()> {
    for value in [
        Value::enumeration("Color", "1"),
        Value::enumeration("Mode", "Fast"),
        Value::alias("Meters", Value::Int(120)),
        Value::null("Widget"),
    ] {
        assert_eq!(round_trip(&value)?, value);
    }
    Ok(())
}

#[test]
fn owning_pointers_round_trip() -> Result<()> {
    let value = Value::record("P", vec![("p", Value::pointer(Value::Int(7)))]);
    assert_eq!(round_trip(&value)?, value);
    Ok(())
}

#[test]
fn deep_nesting_round_trips() -> Result<()> {
    let mut value = Value::Int(0);
    for depth in 0..64 {
        value = Value::record("Nest", vec![("n", Value::Int(depth)), ("inner", value)]);
    }
    assert_eq!(round_trip(&value)?, value);
    Ok(())
}

#[test]
fn file_save_and_load_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("save.tngr");
    let value = Value::record("Save", vec![("turn", Value::UInt(3))]);

    Tangerine::save(&path, &value)?;
    let loaded = Tangerine::load(&path)?;

    assert_eq!(loaded, value);
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
enum Difficulty {
    Easy,
    Brutal,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Campaign {
    title: String,
    completed: Vec<String>,
    difficulty: Difficulty,
    checkpoint: Option<u32>,
}

#[test]
fn typed_values_round_trip_through_the_bridge() -> Result<()> {
    let campaign = Campaign {
        title: "Winter March".into(),
        completed: vec!["tutorial".into(), "bridge".into()],
        difficulty: Difficulty::Brutal,
        checkpoint: None,
    };
    let bytes = Tangerine::encode(&campaign)?;
    let back: Campaign = Tangerine::decode(&bytes)?;
    assert_eq!(back, campaign);
    Ok(())
}

#[test]
fn inspector_reports_document_structure() -> Result<()> {
    let shared = Value::object("A", vec![]);
    let value = Value::record(
        "Pair",
        vec![("first", shared.clone()), ("second", shared)],
    );
    let bytes = Tangerine::to_bytes(&value)?;

    let report = tangerine::DocumentInspector::inspect(&bytes)?;
    assert_eq!(report.version, "1.0.0");
    assert_eq!(report.archive_type, "org.dsource.orange.xml");
    assert_eq!(report.reference_count, 1);
    assert_eq!(report.roots.len(), 1);

    let rendered = report.to_string();
    assert!(rendered.contains("struct"));
    assert!(rendered.contains("reference"));
    Ok(())
}
