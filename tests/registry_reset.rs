#![allow(missing_docs)]

//! Runs alone in its own binary: clearing the process-wide registry would
//! race with registrations made by other test threads.

use tangerine::{TypeDescriptor, lookup_type, register_type, reset_registered_types};

#[test]
fn reset_registered_types_clears_the_registry() {
    register_type(TypeDescriptor::object("reset.Widget").with_field("x", "int"));
    assert!(lookup_type("reset.Widget").is_some());

    reset_registered_types();
    assert!(lookup_type("reset.Widget").is_none());

    // Registration works again after a reset.
    register_type(TypeDescriptor::object("reset.Widget"));
    assert!(lookup_type("reset.Widget").is_some());
}
