#![allow(missing_docs)]

//! Sharing, cycles, slices, and pointer aliasing must survive the round
//! trip: positions that shared storage before serialization share storage
//! in the reconstructed graph.

use std::rc::Rc;

use tangerine::value::ArrayValue;
use tangerine::{Result, Serializer, Tangerine, TypeDescriptor, Value, register_type};

fn round_trip(value: &Value) -> Result<Value> {
    Tangerine::from_bytes(&Tangerine::to_bytes(value)?)
}

#[test]
fn shared_objects_keep_their_identity() -> Result<()> {
    let shared = Value::object("Player", vec![("hp", Value::Int(40))]);
    let value = Value::record(
        "Duel",
        vec![("attacker", shared.clone()), ("defender", shared)],
    );

    let back = round_trip(&value)?;
    let attacker = back.field("attacker").expect("present");
    let defender = back.field("defender").expect("present");
    let attacker = attacker.borrow();
    let defender = defender.borrow();
    let (Value::Object(a), Value::Object(d)) = (&*attacker, &*defender) else {
        panic!("expected objects");
    };
    assert!(Rc::ptr_eq(a, d));
    Ok(())
}

#[test]
fn shared_mappings_keep_their_identity() -> Result<()> {
    let shared = Value::map(vec![(Value::Int(1), Value::string("one"))]);
    let value = Value::record(
        "Two",
        vec![("left", shared.clone()), ("right", shared)],
    );

    let back = round_trip(&value)?;
    let left = back.field("left").expect("present");
    let right = back.field("right").expect("present");
    let left = left.borrow();
    let right = right.borrow();
    let (Value::Map(l), Value::Map(r)) = (&*left, &*right) else {
        panic!("expected mappings");
    };
    assert!(Rc::ptr_eq(&l.entries, &r.entries));
    Ok(())
}

#[test]
fn self_cycles_reconstruct_without_nontermination() -> Result<()> {
    let node = Value::object("Node", vec![("next", Value::null("Node"))]);
    let next = node.field("next").expect("declared");
    *next.borrow_mut() = node.clone();

    let back = round_trip(&node)?;
    let Value::Object(outer) = &back else {
        panic!("expected object");
    };
    let next = back.field("next").expect("present");
    let next = next.borrow();
    let Value::Object(inner) = &*next else {
        panic!("expected cyclic object");
    };
    assert!(Rc::ptr_eq(outer, inner));
    assert!(back.equal_to_depth(&node, 16));
    Ok(())
}

#[test]
fn two_node_cycles_keep_their_shape() -> Result<()> {
    let a = Value::object("Node", vec![("next", Value::null("Node"))]);
    let b = Value::object("Node", vec![("next", a.clone())]);
    *a.field("next").expect("declared").borrow_mut() = b.clone();

    let back = round_trip(&a)?;
    let Value::Object(start) = &back else {
        panic!("expected object");
    };
    let forward = back.field("next").expect("present");
    let back_again = forward.borrow().field("next").expect("present");
    let back_again = back_again.borrow();
    let Value::Object(around) = &*back_again else {
        panic!("expected object");
    };
    assert!(Rc::ptr_eq(start, around));
    Ok(())
}

#[test]
fn slices_share_storage_after_reconstruction() -> Result<()> {
    let full = ArrayValue::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let sub = full.slice(1, 2).expect("in range");
    let value = Value::record(
        "Holder",
        vec![("arr", Value::Array(full)), ("sub", Value::Array(sub))],
    );

    let back = round_trip(&value)?;
    let arr = back.field("arr").expect("present");
    let sub = back.field("sub").expect("present");
    let arr = arr.borrow();
    let sub = sub.borrow();
    let (Value::Array(arr), Value::Array(sub)) = (&*arr, &*sub) else {
        panic!("expected arrays");
    };
    assert!(arr.shares_storage_with(sub));
    assert_eq!(sub.offset, 1);
    assert_eq!(sub.len, 2);

    // A write through the parent is visible through the slice.
    *arr.get(1).expect("in range").borrow_mut() = Value::Int(99);
    assert_eq!(*sub.get(0).expect("in range").borrow(), Value::Int(99));
    Ok(())
}

#[test]
fn slice_declared_before_its_parent_still_resolves() -> Result<()> {
    let full = ArrayValue::new(vec![Value::Int(4), Value::Int(5), Value::Int(6)]);
    let sub = full.slice(0, 1).expect("in range");
    // The slice is visited first, so the reader sees the slice node before
    // the full array and must defer it to the post-pass.
    let value = Value::record(
        "Holder",
        vec![("sub", Value::Array(sub)), ("arr", Value::Array(full))],
    );

    let back = round_trip(&value)?;
    let arr = back.field("arr").expect("present");
    let sub = back.field("sub").expect("present");
    let arr = arr.borrow();
    let sub = sub.borrow();
    let (Value::Array(arr), Value::Array(sub)) = (&*arr, &*sub) else {
        panic!("expected arrays");
    };
    assert!(arr.shares_storage_with(sub));
    Ok(())
}

#[test]
fn duplicate_string_views_share_one_buffer() -> Result<()> {
    let shared = Value::string("shared text");
    let value = Value::record(
        "S",
        vec![("first", shared.clone()), ("second", shared)],
    );

    let back = round_trip(&value)?;
    let first = back.field("first").expect("present");
    let second = back.field("second").expect("present");
    let first = first.borrow();
    let second = second.borrow();
    let (Value::Str(f), Value::Str(s)) = (&*first, &*second) else {
        panic!("expected strings");
    };
    assert!(Rc::ptr_eq(&f.buf, &s.buf));
    assert_eq!(s.as_str(), "shared text");
    Ok(())
}

#[test]
fn pointers_alias_the_field_they_target() -> Result<()> {
    let object = Value::object("Holder", vec![("x", Value::Int(5))]);
    let x = object.field("x").expect("declared");
    let value = Value::record(
        "R",
        vec![("obj", object), ("p", Value::pointer_to(x))],
    );

    let back = round_trip(&value)?;
    let obj = back.field("obj").expect("present");
    let x_back = obj.borrow().field("x").expect("present");
    let p = back.field("p").expect("present");
    let p = p.borrow();
    let Value::Pointer(p) = &*p else {
        panic!("expected pointer");
    };
    assert!(Rc::ptr_eq(&p.target, &x_back));

    // A write through the field is visible through the pointer.
    *x_back.borrow_mut() = Value::Int(11);
    assert_eq!(*p.target.borrow(), Value::Int(11));
    Ok(())
}

#[test]
fn pointer_declared_before_its_target_still_resolves() -> Result<()> {
    let object = Value::object("Holder", vec![("x", Value::Int(5))]);
    let x = object.field("x").expect("declared");
    let value = Value::record(
        "R",
        vec![("p", Value::pointer_to(x)), ("obj", object)],
    );

    let back = round_trip(&value)?;
    let obj = back.field("obj").expect("present");
    let x_back = obj.borrow().field("x").expect("present");
    let p = back.field("p").expect("present");
    let p = p.borrow();
    let Value::Pointer(p) = &*p else {
        panic!("expected pointer");
    };
    assert!(Rc::ptr_eq(&p.target, &x_back));
    Ok(())
}

#[test]
fn reset_makes_serialization_idempotent() -> Result<()> {
    let value = Value::record(
        "Save",
        vec![
            ("hero", Value::object("Player", vec![("hp", Value::Int(40))])),
            ("label", Value::string("quick")),
        ],
    );
    let mut serializer = Serializer::with_xml_archive();
    let first = serializer.serialize(&value, None)?;
    serializer.reset();
    let second = serializer.serialize(&value, None)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn field_order_in_the_document_does_not_matter() -> Result<()> {
    register_type(
        TypeDescriptor::record("identity.Point")
            .with_field("x", "int")
            .with_field("y", "int"),
    );

    let forward = "<archive version=\"1.0.0\" type=\"org.dsource.orange.xml\"><data>\
                   <struct type=\"identity.Point\" key=\"0\" id=\"0\">\
                   <int key=\"x\" id=\"1\">3</int><int key=\"y\" id=\"2\">4</int>\
                   </struct></data></archive>";
    let reversed = "<archive version=\"1.0.0\" type=\"org.dsource.orange.xml\"><data>\
                    <struct type=\"identity.Point\" key=\"0\" id=\"0\">\
                    <int key=\"y\" id=\"2\">4</int><int key=\"x\" id=\"1\">3</int>\
                    </struct></data></archive>";

    let a = Tangerine::from_bytes(forward.as_bytes())?;
    let b = Tangerine::from_bytes(reversed.as_bytes())?;
    assert_eq!(a, b);
    Ok(())
}
