//! Raw return values → render-ready JSON.

use std::sync::Arc;

use funix_schema::{ReturnDescriptor, Tag, TypeDescriptor};
use serde_json::Value;

use crate::error::RenderError;
use crate::files::FileStore;
use crate::function::{Binding, CallContext, CallTarget, DataFrame, ReturnValue, Target};
use crate::registry::Registry;

const PNG: &str = "image/png";

pub struct Renderer {
    files: Arc<FileStore>,
    figure_to_image: bool,
}

impl Renderer {
    pub fn new(files: Arc<FileStore>, figure_to_image: bool) -> Self {
        Self { files, figure_to_image }
    }

    /// Render one return value against the declared return descriptor(s).
    ///
    /// `figure_to_image` overrides the engine-wide figure mode when set.
    pub fn render(
        &self,
        registry: &Registry,
        ctx: &CallContext,
        value: ReturnValue,
        returns: &ReturnDescriptor,
        figure_to_image: Option<bool>,
    ) -> Result<Value, RenderError> {
        let pass = Pass {
            files: &self.files,
            registry,
            ctx,
            figure_to_image: figure_to_image.unwrap_or(self.figure_to_image),
        };
        match returns {
            ReturnDescriptor::None => pass.one(value, None),
            ReturnDescriptor::Single(descriptor) => pass.one(value, Some(descriptor)),
            ReturnDescriptor::Tuple(members) => {
                let items = match value {
                    ReturnValue::Tuple(items) => items,
                    ReturnValue::Json(Value::Array(items)) => {
                        items.into_iter().map(ReturnValue::Json).collect()
                    }
                    other => vec![other],
                };
                if items.len() != members.len() {
                    return Err(RenderError::Arity {
                        expected: members.len(),
                        found: items.len(),
                    });
                }
                items
                    .into_iter()
                    .zip(members)
                    .map(|(item, member)| pass.one(item, Some(member)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
        }
    }
}

/// One rendering pass with its dependencies borrowed.
struct Pass<'a> {
    files: &'a FileStore,
    registry: &'a Registry,
    ctx: &'a CallContext,
    figure_to_image: bool,
}

impl Pass<'_> {
    fn one(
        &self,
        value: ReturnValue,
        descriptor: Option<&TypeDescriptor>,
    ) -> Result<Value, RenderError> {
        let tag = descriptor.map(|d| d.tag).unwrap_or_default();
        match (tag, value) {
            (_, ReturnValue::Figure(figure)) => {
                if self.figure_to_image {
                    let png = figure.to_png().map_err(|e| RenderError::Figure(e.to_string()))?;
                    Ok(Value::String(FileStore::url(&self.files.put(png, PNG))))
                } else {
                    figure.to_embed().map_err(|e| RenderError::Figure(e.to_string()))
                }
            }
            (_, ReturnValue::Frame(frame)) => records(&frame),
            (Tag::Dataframe, ReturnValue::Json(value @ Value::Object(_))) => {
                let frame = DataFrame::from_columns(&value)
                    .ok_or_else(|| RenderError::Frame("columns must be lists".to_string()))?;
                records(&frame)
            }
            (_, ReturnValue::Call(target)) => self.link(&target).map(Value::String),
            (_, ReturnValue::Media { bytes, mime }) => {
                Ok(Value::String(FileStore::url(&self.files.put(bytes, mime))))
            }
            (_, ReturnValue::Tuple(items)) => {
                let members = descriptor.and_then(|d| d.members.as_deref());
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.one(item, members.and_then(|m| m.get(i))))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            (_, ReturnValue::Json(value)) => Ok(value),
        }
    }

    /// Markdown link to the target's page, with bound arguments in the query.
    fn link(&self, call: &CallTarget) -> Result<String, RenderError> {
        let function = match &call.target {
            Target::Function(callable) => self.registry.identify(callable),
            Target::Path(path) => self.registry.lookup(path),
        }
        .ok_or(RenderError::UnknownCallTarget)?;

        let mut query = Vec::with_capacity(call.bindings.len());
        for (name, binding) in &call.bindings {
            let value = match binding {
                Binding::Value(value) => value.clone(),
                Binding::Local(local) => self
                    .ctx
                    .local(local)
                    .cloned()
                    .ok_or_else(|| RenderError::MissingLocal(local.clone()))?,
            };
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            query.push((name.as_str(), text));
        }

        let schema = &function.schema;
        let mut url = format!("/{}", schema.path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&serde_urlencoded::to_string(&query)?);
        }
        Ok(format!("[{}]({url})", schema.title))
    }
}

fn records(frame: &DataFrame) -> Result<Value, RenderError> {
    if !frame.is_rectangular() {
        return Err(RenderError::Frame("columns have different lengths".to_string()));
    }
    Ok(Value::Array(frame.to_records()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use funix_schema::{Annotation, FunctionConfig, Kind, Signature};
    use serde_json::json;

    use crate::error::FunctionError;
    use crate::function::{Callable, Kwargs, Output, StaticFigure};

    fn renderer() -> (Renderer, Arc<FileStore>) {
        let files = Arc::new(FileStore::new());
        (Renderer::new(files.clone(), false), files)
    }

    fn single(tag: Tag) -> ReturnDescriptor {
        ReturnDescriptor::Single(TypeDescriptor::object().with_tag(tag))
    }

    #[test]
    fn figures_embed_or_flatten() {
        let (renderer, files) = renderer();
        let registry = Registry::default();
        let ctx = CallContext::default();
        let figure =
            || ReturnValue::figure(StaticFigure::new(json!({"data": []})).with_png(&b"png"[..]));
        let descriptor = single(Tag::Figure);

        let embedded = renderer.render(&registry, &ctx, figure(), &descriptor, None).unwrap();
        assert_eq!(embedded, json!({"data": []}));

        let flat = renderer.render(&registry, &ctx, figure(), &descriptor, Some(true)).unwrap();
        let key = FileStore::key_of(flat.as_str().unwrap()).unwrap();
        assert_eq!(files.get(key).unwrap().mime, "image/png");

        let no_png = ReturnValue::figure(StaticFigure::new(json!({})));
        assert!(matches!(
            renderer.render(&registry, &ctx, no_png, &single(Tag::Figure), Some(true)),
            Err(RenderError::Figure(_))
        ));
    }

    #[test]
    fn dataframes_become_records() {
        let (renderer, _) = renderer();
        let registry = Registry::default();
        let ctx = CallContext::default();
        let columns = ReturnValue::Json(json!({"a": [1, 2], "b": ["x", "y"]}));
        assert_eq!(
            renderer.render(&registry, &ctx, columns, &single(Tag::Dataframe), None).unwrap(),
            json!([{"a": 1, "b": "x"}, {"a": 2, "b": "y"}])
        );
        let ragged = ReturnValue::Frame(
            DataFrame::new().with_column("a", vec![json!(1)]).with_column("b", vec![]),
        );
        assert!(renderer.render(&registry, &ctx, ragged, &ReturnDescriptor::None, None).is_err());
    }

    #[test]
    fn callables_link_to_their_registration() {
        let (renderer, _) = renderer();
        let mut registry = Registry::default();
        let (_, target) = registry
            .register_fn(
                &Signature::new("detail")
                    .arg("item", Annotation::str())
                    .arg("page", Annotation::int()),
                &FunctionConfig::new().title("Item detail"),
                |_: Kwargs, _: &mut CallContext| Ok(Output::json(json!(null))),
            )
            .unwrap();
        let mut ctx = CallContext::default();
        ctx.set_local("chosen", json!("a b"));

        let call = CallTarget::function(&target)
            .bind_local("item", "chosen")
            .bind("page", json!(2));
        let rendered = renderer
            .render(&registry, &ctx, ReturnValue::Call(call), &single(Tag::Callable), None)
            .unwrap();
        assert_eq!(rendered, json!("[Item detail](/detail?item=a+b&page=2)"));

        let stranger: Arc<dyn Callable> =
            Arc::new(|_: Kwargs, _: &mut CallContext| -> Result<Output, FunctionError> {
                Ok(Output::json(json!(null)))
            });
        let untracked = ReturnValue::Call(CallTarget::function(&stranger));
        assert!(matches!(
            renderer.render(&registry, &ctx, untracked, &ReturnDescriptor::None, None),
            Err(RenderError::UnknownCallTarget)
        ));
        let unbound = CallTarget::path("detail").bind_local("item", "nothing");
        assert!(matches!(
            renderer.render(
                &registry,
                &ctx,
                ReturnValue::Call(unbound),
                &ReturnDescriptor::None,
                None,
            ),
            Err(RenderError::MissingLocal(_))
        ));
    }

    #[test]
    fn tuples_render_positionally() {
        let (renderer, _) = renderer();
        let registry = Registry::default();
        let ctx = CallContext::default();
        let returns = ReturnDescriptor::Tuple(vec![
            TypeDescriptor::new(Kind::String, "Markdown").with_tag(Tag::Markdown),
            TypeDescriptor::new(Kind::String, "Image").with_tag(Tag::Image),
        ]);
        let value = ReturnValue::Tuple(vec![
            ReturnValue::Json(json!("**hi**")),
            ReturnValue::media(&b"gif"[..], "image/gif"),
        ]);
        let rendered = renderer.render(&registry, &ctx, value, &returns, None).unwrap();
        assert_eq!(rendered[0], "**hi**");
        assert!(rendered[1].as_str().unwrap().starts_with("/file/"));

        assert!(matches!(
            renderer.render(&registry, &ctx, ReturnValue::Json(json!([1])), &returns, None),
            Err(RenderError::Arity { expected: 2, found: 1 })
        ));
    }
}
