//! The sample object shared by `integra serve`.

use integra::handler::{arg_i64, arg_str};
use integra::{Fault, MethodTable, Value};
use rand::Rng;

/// Name the demo object is registered under unless `--name` is given.
pub const DEFAULT_NAME: &str = "democlass";

/// Build the demo object.
///
/// `some_var` is picked at random once, so clients can tell two servers apart.
pub fn demo_object(name: &str) -> MethodTable {
    let some_var: i64 = rand::rng().random_range(0..=65535);

    MethodTable::new(name)
        .method("awesome_method", |_| Ok(Value::from("QWERTY")))
        .method("reverse", |args| {
            Ok(Value::from(arg_str(&args, 0)?.chars().rev().collect::<String>()))
        })
        .method("some_var", move |_| Ok(Value::Int(some_var)))
        .method("add", |args| {
            let a = arg_i64(&args, 0)?;
            let b = arg_i64(&args, 1)?;
            a.checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| Fault::invalid_arguments("integer overflow"))
        })
}
