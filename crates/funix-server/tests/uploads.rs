mod common;

use bytes::Bytes;
use funix_schema::{Annotation, FunctionConfig, Role, Signature};
use funix_server::{CallContext, Kwargs, Output, Registry};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sizes(args: Kwargs, _: &mut CallContext) -> Result<Output, funix_server::FunctionError> {
    let photo = args.bytes("photo")?.len();
    let attachments: Vec<usize> = args.files("attachments")?.iter().map(|b| b.len()).collect();
    Ok(Output::json(json!({"photo": photo, "attachments": attachments})))
}

fn registry() -> Registry {
    let mut registry = Registry::default();
    registry
        .register_fn(
            &Signature::new("sizes")
                .arg("photo", Annotation::named("Image"))
                .arg("attachments", Annotation::list_of(Annotation::named("File"))),
            &FunctionConfig::new(),
            sizes,
        )
        .unwrap();
    registry
        .register_fn(
            &Signature::new("photo_sizes").arg("photo", Annotation::named("Image")),
            &FunctionConfig::new().treat_as("photo", Role::Cell),
            |args: Kwargs, _: &mut CallContext| -> Result<Output, funix_server::FunctionError> {
                Ok(Output::json(json!(args.bytes("photo")?.len())))
            },
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn uploads_are_fetched_before_the_call() {
    let remote = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cat.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 128]))
        .expect(1)
        .mount(&remote)
        .await;

    let dispatcher = common::builder(registry()).build().unwrap();
    let stored = dispatcher.files().put(Bytes::from_static(b"hello"), "text/plain");
    let server = common::server(dispatcher);

    let response = server
        .post("/call/sizes")
        .json(&json!({
            "photo": format!("{}/cat.png", remote.uri()),
            "attachments": [format!("/file/{stored}"), "data:text/plain;base64,aGk="],
        }))
        .await;
    assert_eq!(
        response.json::<Value>(),
        json!({"photo": 128, "attachments": [5, 2]})
    );
}

#[tokio::test]
async fn failed_fetches_are_wrapper_errors() {
    let remote = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&remote)
        .await;
    let server = common::server(common::builder(registry()).build().unwrap());

    let response = server
        .post("/call/sizes")
        .json(&json!({"photo": format!("{}/gone.png", remote.uri()), "attachments": []}))
        .await
        .json::<Value>();
    assert_eq!(response["error_type"], "wrapper");
    assert!(response["error_body"].as_str().unwrap().contains("photo"));
}

#[tokio::test]
async fn empty_upload_lists_reach_the_function() {
    let server = common::server(common::builder(registry()).build().unwrap());

    let response = server
        .post("/call/sizes")
        .json(&json!({"photo": "data:,ab", "attachments": []}))
        .await;
    assert_eq!(response.json::<Value>(), json!({"photo": 2, "attachments": []}));
}

#[tokio::test]
async fn sheet_upload_columns_fan_out_per_file() {
    let server = common::server(common::builder(registry()).build().unwrap());

    let response = server
        .post("/call/photo_sizes")
        .json(&json!({"photo": ["data:,ab", "data:,abc"]}))
        .await;
    assert_eq!(response.json::<Value>(), json!({"result": [2, 3]}));
}
