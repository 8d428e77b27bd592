#![allow(missing_docs)]

//! Custom (de)serializers, lifecycle events, base-class walks, and the
//! non-serialized field filter.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tangerine::{Result, Serializer, Tangerine, TypeDescriptor, Value, register_type};

#[test]
fn custom_hooks_replace_the_field_walk() -> Result<()> {
    let mut serializer = Serializer::with_xml_archive();
    serializer.register_serializer(
        "hooks.Temperature",
        Rc::new(|ctx, value| {
            let celsius = value
                .field("celsius")
                .map(|slot| slot.borrow().clone())
                .unwrap_or(Value::Int(0));
            ctx.serialize_value(&celsius, Some("celsius"))
        }),
    );
    serializer.register_deserializer(
        "hooks.Temperature",
        Rc::new(|ctx| {
            let celsius = ctx.deserialize_value(Some("celsius"))?;
            Ok(Value::object("hooks.Temperature", vec![("celsius", celsius)]))
        }),
    );

    let value = Value::object(
        "hooks.Temperature",
        vec![
            ("celsius", Value::Int(21)),
            ("scratch", Value::string("not for the wire")),
        ],
    );
    let bytes = serializer.serialize(&value, None)?;
    let xml = String::from_utf8(bytes.clone()).expect("utf-8");
    assert!(xml.contains("key=\"celsius\""));
    assert!(!xml.contains("scratch"));

    let back = serializer.deserialize(&bytes, None)?;
    let celsius = back.field("celsius").expect("present");
    assert_eq!(*celsius.borrow(), Value::Int(21));
    assert!(back.field("scratch").is_none());
    Ok(())
}

#[test]
fn lifecycle_events_fire_around_every_action() -> Result<()> {
    let serializing = Arc::new(AtomicUsize::new(0));
    let serialized = Arc::new(AtomicUsize::new(0));
    let deserializing = Arc::new(AtomicUsize::new(0));
    let deserialized = Arc::new(AtomicUsize::new(0));

    let counter = |c: &Arc<AtomicUsize>| {
        let c = Arc::clone(c);
        Arc::new(move |_: &Value| {
            c.fetch_add(1, Ordering::SeqCst);
        }) as Arc<dyn Fn(&Value) + Send + Sync>
    };

    register_type(
        TypeDescriptor::record("hooks.Audited")
            .with_field("n", "int")
            .on_serializing(counter(&serializing))
            .on_serialized(counter(&serialized))
            .on_deserializing(counter(&deserializing))
            .on_deserialized(counter(&deserialized)),
    );

    let value = Value::record("hooks.Audited", vec![("n", Value::Int(1))]);
    let bytes = Tangerine::to_bytes(&value)?;
    assert_eq!(serializing.load(Ordering::SeqCst), 1);
    assert_eq!(serialized.load(Ordering::SeqCst), 1);

    let _back = Tangerine::from_bytes(&bytes)?;
    assert_eq!(deserializing.load(Ordering::SeqCst), 1);
    assert_eq!(deserialized.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn base_class_fields_travel_in_base_nodes() -> Result<()> {
    register_type(TypeDescriptor::object("hooks.Entity").with_field("id", "int"));
    register_type(
        TypeDescriptor::object("hooks.Player")
            .with_base("hooks.Entity")
            .with_field("name", "string"),
    );

    let value = Value::object(
        "hooks.Player",
        vec![("name", Value::string("ada")), ("id", Value::Int(7))],
    );
    let bytes = Tangerine::to_bytes(&value)?;
    let xml = String::from_utf8(bytes.clone()).expect("utf-8");
    assert!(xml.contains("<base type=\"hooks.Entity\""));

    let back = Tangerine::from_bytes(&bytes)?;
    let name = back.field("name").expect("own field");
    let id = back.field("id").expect("base field");
    assert_eq!(name.borrow().as_str().as_deref(), Some("ada"));
    assert_eq!(*id.borrow(), Value::Int(7));
    Ok(())
}

#[test]
fn custom_hooks_can_walk_the_base_chain() -> Result<()> {
    register_type(TypeDescriptor::object("hooks.Animal").with_field("legs", "int"));
    register_type(
        TypeDescriptor::object("hooks.Dog")
            .with_base("hooks.Animal")
            .with_field("name", "string"),
    );

    let mut serializer = Serializer::with_xml_archive();
    serializer.register_serializer(
        "hooks.Dog",
        Rc::new(|ctx, value| {
            let name = value
                .field("name")
                .map(|slot| slot.borrow().clone())
                .unwrap_or(Value::string(""));
            ctx.serialize_value(&name, Some("name"))?;
            ctx.serialize_base(value)
        }),
    );
    serializer.register_deserializer(
        "hooks.Dog",
        Rc::new(|ctx| {
            let name = ctx.deserialize_value(Some("name"))?;
            let dog = Value::object("hooks.Dog", vec![("name", name)]);
            ctx.deserialize_base(&dog)?;
            Ok(dog)
        }),
    );

    let value = Value::object(
        "hooks.Dog",
        vec![("name", Value::string("rex")), ("legs", Value::Int(4))],
    );
    let bytes = serializer.serialize(&value, None)?;
    let back = serializer.deserialize(&bytes, None)?;

    let legs = back.field("legs").expect("base field");
    assert_eq!(*legs.borrow(), Value::Int(4));
    let name = back.field("name").expect("own field");
    assert_eq!(name.borrow().as_str().as_deref(), Some("rex"));
    Ok(())
}

#[test]
fn non_serialized_fields_stay_off_the_wire() -> Result<()> {
    register_type(
        TypeDescriptor::object("hooks.Cached")
            .with_field("real", "int")
            .with_field("cache", "string")
            .non_serialized("cache"),
    );

    let value = Value::object(
        "hooks.Cached",
        vec![("real", Value::Int(5)), ("cache", Value::string("tmp"))],
    );
    let bytes = Tangerine::to_bytes(&value)?;
    let xml = String::from_utf8(bytes.clone()).expect("utf-8");
    assert!(!xml.contains("cache"));

    let back = Tangerine::from_bytes(&bytes)?;
    assert_eq!(*back.field("real").expect("kept").borrow(), Value::Int(5));
    let cache = back.field("cache").expect("defaulted");
    assert_eq!(cache.borrow().as_str().as_deref(), Some(""));
    Ok(())
}

#[test]
fn factories_control_polymorphic_reconstruction() -> Result<()> {
    register_type(
        TypeDescriptor::object("hooks.Shape")
            .with_field("sides", "int")
            .with_factory(Arc::new(|| {
                Value::object(
                    "hooks.Shape",
                    vec![("sides", Value::Int(0)), ("tag", Value::string("made"))],
                )
            })),
    );

    let value = Value::object("hooks.Shape", vec![("sides", Value::Int(3))]);
    let back = Tangerine::from_bytes(&Tangerine::to_bytes(&value)?)?;
    assert_eq!(*back.field("sides").expect("walked").borrow(), Value::Int(3));
    // The extra field proves the registered factory built the shell.
    assert_eq!(
        back.field("tag").expect("factory field").borrow().as_str().as_deref(),
        Some("made")
    );
    Ok(())
}
