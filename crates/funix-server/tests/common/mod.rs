#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use funix_schema::{Annotation, FunctionConfig, Param, Role, Signature};
use funix_server::{
    AppState, CallContext, Dispatcher, DispatcherBuilder, FunctionError, Kwargs, Output, Registry,
    app_router,
};
use serde_json::json;

pub fn server(dispatcher: Dispatcher) -> TestServer {
    TestServer::builder()
        .save_cookies()
        .build(app_router(AppState::new(dispatcher)))
        .unwrap()
}

pub fn builder(registry: Registry) -> DispatcherBuilder {
    Dispatcher::builder(Arc::new(registry))
}

pub fn vector_add(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
    let a: i64 = args.get("a")?;
    let b: i64 = args.get("b")?;
    let is_add: bool = args.get("is_add")?;
    Ok(Output::json(json!(if is_add { a + b } else { a - b })))
}

pub fn register_vector_add(registry: &mut Registry) {
    let signature = Signature::new("vector_add")
        .arg("a", Annotation::int())
        .arg("b", Annotation::int())
        .param(Param::new("is_add", Annotation::bool()).with_default(json!(true)));
    registry
        .register_fn(
            &signature,
            &FunctionConfig::new().treat_as(["a", "b"], Role::Cell),
            vector_add,
        )
        .unwrap();
}
