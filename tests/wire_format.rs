#![allow(missing_docs)]

//! Pins the on-the-wire shape of the reference XML backend.

use tangerine::value::ArrayValue;
use tangerine::{Serializer, Value};

fn to_xml(value: &Value) -> String {
    let mut serializer = Serializer::with_xml_archive();
    let bytes = serializer.serialize(value, None).expect("serializes");
    String::from_utf8(bytes).expect("utf-8 document")
}

#[test]
fn empty_object_document_is_literal() {
    let value = Value::object("A", vec![]);
    assert_eq!(
        to_xml(&value),
        "<archive version=\"1.0.0\" type=\"org.dsource.orange.xml\">\
         <data><object runtimeType=\"A\" type=\"A\" key=\"0\" id=\"0\"/></data></archive>"
    );
}

#[test]
fn primitive_int_document_is_literal() {
    assert_eq!(
        to_xml(&Value::Int(42)),
        "<archive version=\"1.0.0\" type=\"org.dsource.orange.xml\">\
         <data><int key=\"0\" id=\"0\">42</int></data></archive>"
    );
}

#[test]
fn object_fields_carry_names_and_ids() {
    let value = Value::object("B", vec![("value", Value::Int(7))]);
    assert_eq!(
        to_xml(&value),
        "<archive version=\"1.0.0\" type=\"org.dsource.orange.xml\">\
         <data><object runtimeType=\"B\" type=\"B\" key=\"0\" id=\"0\">\
         <int key=\"value\" id=\"1\">7</int></object></data></archive>"
    );
}

#[test]
fn second_occurrence_becomes_a_reference() {
    let shared = Value::object("A", vec![]);
    let value = Value::record(
        "Pair",
        vec![("first", shared.clone()), ("second", shared)],
    );
    let xml = to_xml(&value);
    assert!(xml.contains("<object runtimeType=\"A\" type=\"A\" key=\"first\" id=\"1\"/>"));
    assert!(xml.contains("<reference key=\"second\">1</reference>"));
}

#[test]
fn sub_range_arrays_post_process_to_slices() {
    let full = ArrayValue::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let sub = full.slice(1, 2).expect("in range");
    let value = Value::record(
        "Holder",
        vec![("arr", Value::Array(full)), ("sub", Value::Array(sub))],
    );
    let xml = to_xml(&value);
    assert!(xml.contains("<array type=\"int\" length=\"3\" key=\"arr\" id=\"1\">"));
    assert!(xml.contains("<slice key=\"sub\" id=\"5\" offset=\"1\" length=\"2\">1</slice>"));
}

#[test]
fn cycles_emit_one_node_and_a_back_reference() {
    let node = Value::object("Node", vec![("next", Value::null("Node"))]);
    let next = node.field("next").expect("declared");
    *next.borrow_mut() = node.clone();

    assert_eq!(
        to_xml(&node),
        "<archive version=\"1.0.0\" type=\"org.dsource.orange.xml\">\
         <data><object runtimeType=\"Node\" type=\"Node\" key=\"0\" id=\"0\">\
         <reference key=\"next\">0</reference></object></data></archive>"
    );
}

#[test]
fn interior_pointers_post_process_to_reference_edges() {
    let object = Value::object("Holder", vec![("x", Value::Int(5))]);
    let x = object.field("x").expect("declared");
    let value = Value::record(
        "R",
        vec![("obj", object), ("p", Value::pointer_to(x))],
    );
    let xml = to_xml(&value);
    assert!(xml.contains("<pointer key=\"p\" id=\"3\"><reference key=\"x\">2</reference></pointer>"));
}

#[test]
fn null_and_enum_nodes_carry_their_types() {
    let value = Value::record(
        "Mixed",
        vec![
            ("gone", Value::null("Widget")),
            ("color", Value::enumeration("Color", "2")),
        ],
    );
    let xml = to_xml(&value);
    assert!(xml.contains("<null type=\"Widget\" key=\"gone\"/>"));
    assert!(xml.contains("<enum type=\"Color\" key=\"color\" id=\"1\">2</enum>"));
}

#[test]
fn mapping_entries_alternate_key_and_value_wrappers() {
    let value = Value::map(vec![(Value::Int(1), Value::string("one"))]);
    let xml = to_xml(&value);
    assert!(xml.contains(
        "<associativeArray keyType=\"int\" valueType=\"string\" length=\"1\" key=\"0\" id=\"0\">"
    ));
    assert!(xml.contains("<key key=\"0\">"));
    assert!(xml.contains("<value key=\"1\">"));
}
