//! Functions served by the `funix` binary out of the box.

use funix_schema::{Annotation, FunctionConfig, LayoutItem, Param, RateLimit, Role, Signature};
use serde_json::{Value, json};

use crate::error::{FunctionError, RegistryError};
use crate::function::{CallContext, CallTarget, Kwargs, Output, ReturnValue};
use crate::registry::Registry;

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_fn(
        &Signature::new("vector_add")
            .arg("a", Annotation::int())
            .arg("b", Annotation::int())
            .param(Param::new("is_add", Annotation::bool()).with_default(json!(true)))
            .returns(Annotation::int()),
        &FunctionConfig::new()
            .title("Vector add")
            .description("Adds or subtracts two integer lists element by element.")
            .treat_as(["a", "b"], Role::Cell),
        vector_add,
    )?;

    registry.register_fn(
        &Signature::new("calc_add")
            .arg("a", Annotation::list_of(Annotation::int()))
            .arg("b", Annotation::list_of(Annotation::int()))
            .returns(Annotation::mapping()),
        &FunctionConfig::new()
            .title("Column sums")
            .widget(["a", "b"], "sheet")
            .input_row(vec![LayoutItem::Markdown {
                content: "Edit the table, then run.".to_string(),
            }]),
        calc_add,
    )?;

    let (_, greet) = registry.register_fn(
        &Signature::new("greet")
            .param(Param::new("name", Annotation::str()).with_default(json!("world")))
            .param(Param::new("excited", Annotation::optional(Annotation::bool())))
            .returns(Annotation::named("Markdown")),
        &FunctionConfig::new()
            .examples("name", json!(["Ada", "Grace"]))
            .rate_limit(RateLimit::per_ip(30, 60.0)),
        greet,
    )?;

    registry.register_fn(
        &Signature::new("counter").returns(Annotation::int()),
        &FunctionConfig::new().description("Counts calls made from this browser session."),
        counter,
    )?;

    registry.register_fn(
        &Signature::new("countdown")
            .arg("n", Annotation::int())
            .returns(Annotation::iterator(Annotation::str())),
        &FunctionConfig::new().widget("n", "slider"),
        countdown,
    )?;

    registry.register_fn(
        &Signature::new("jump")
            .arg("name", Annotation::str())
            .returns(Annotation::Callable),
        &FunctionConfig::new().description("Links to the greeting page with the name filled in."),
        move |_: Kwargs, _: &mut CallContext| {
            Ok(Output::Value(ReturnValue::Call(
                CallTarget::function(&greet).bind_local("name", "name"),
            )))
        },
    )?;

    Ok(())
}

fn vector_add(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
    let a: i64 = args.get("a")?;
    let b: i64 = args.get("b")?;
    let is_add: bool = args.get("is_add")?;
    Ok(Output::json(json!(if is_add { a + b } else { a - b })))
}

fn calc_add(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
    let a: Vec<i64> = args.get("a")?;
    let b: Vec<i64> = args.get("b")?;
    if a.len() != b.len() {
        return Err(FunctionError::msg("columns must have the same length"));
    }
    let output: Vec<i64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
    Ok(Output::json(json!({ "output": output })))
}

fn greet(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
    let name: String = args.get("name")?;
    let excited: Option<bool> = args.get("excited")?;
    let mark = if excited.unwrap_or(false) { "!" } else { "." };
    Ok(Output::json(json!(format!("Hello, **{name}**{mark}"))))
}

fn counter(_: Kwargs, ctx: &mut CallContext) -> Result<Output, FunctionError> {
    let count = ctx.global("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
    ctx.set_global("count", json!(count));
    Ok(Output::json(json!(count)))
}

fn countdown(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
    let n: i64 = args.get("n")?;
    if n < 0 {
        return Err(FunctionError::bad_argument("n", "must not be negative"));
    }
    Ok(Output::stream((0..=n).rev().map(|i| {
        let line = match i {
            0 => "liftoff".to_string(),
            i => i.to_string(),
        };
        Ok(ReturnValue::Json(Value::String(line)))
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn demo_functions_register() {
        let mut registry = Registry::default();
        register(&mut registry).unwrap();
        assert_eq!(registry.len(), 6);
        assert!(registry.lookup("countdown").unwrap().schema.streaming);
        assert!(registry.lookup("vector_add").unwrap().schema.plan.has_cells());
    }

    #[test]
    fn counter_keeps_state_in_the_session() {
        let mut ctx = CallContext::new(Some(Arc::default()));
        counter(Kwargs::new(), &mut ctx).unwrap();
        let second = counter(Kwargs::new(), &mut ctx).unwrap();
        let Output::Value(ReturnValue::Json(second)) = second else {
            panic!("counter returns json");
        };
        assert_eq!(second, 2);
    }
}
