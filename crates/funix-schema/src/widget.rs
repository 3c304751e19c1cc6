//! Widget property synthesis: descriptor + overrides + theme → UI node.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::{Kind, TypeDescriptor};
use crate::theme::Theme;

/// Literal sets smaller than this render as a choice widget.
pub const CHOICE_LIMIT: usize = 8;

pub const SHEET: &str = "sheet";

/// Widgets whose submitted value is a URI to dereference.
pub const UPLOAD_WIDGETS: [&str; 4] = ["image", "video", "audio", "file"];

/// A named UI control plus optional configuration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WidgetRepr")]
pub struct Widget {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WidgetRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        config: Option<Value>,
    },
}

impl From<WidgetRepr> for Widget {
    fn from(repr: WidgetRepr) -> Self {
        match repr {
            WidgetRepr::Name(name) => Widget { name, config: None },
            WidgetRepr::Full { name, config } => Widget { name, config },
        }
    }
}

impl Widget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn is_upload(&self) -> bool {
        UPLOAD_WIDGETS.contains(&self.name.as_str())
    }
}

impl From<&str> for Widget {
    fn from(name: &str) -> Self {
        Widget::new(name)
    }
}

impl From<String> for Widget {
    fn from(name: String) -> Self {
        Widget::new(name)
    }
}

/// An explicit override: one widget, or one per list nesting level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetChoice {
    Single(Widget),
    Levels(Vec<Widget>),
}

impl WidgetChoice {
    /// The override for one nesting level. Missing levels get none.
    pub fn at(&self, position: usize) -> Option<&Widget> {
        match self {
            WidgetChoice::Single(widget) => (position == 0).then_some(widget),
            WidgetChoice::Levels(levels) => levels.get(position),
        }
    }

    pub fn top(&self) -> Option<&Widget> {
        self.at(0)
    }
}

impl From<Widget> for WidgetChoice {
    fn from(widget: Widget) -> Self {
        WidgetChoice::Single(widget)
    }
}

impl From<&str> for WidgetChoice {
    fn from(name: &str) -> Self {
        WidgetChoice::Single(Widget::new(name))
    }
}

impl From<String> for WidgetChoice {
    fn from(name: String) -> Self {
        WidgetChoice::Single(Widget::new(name))
    }
}

impl From<Vec<Widget>> for WidgetChoice {
    fn from(levels: Vec<Widget>) -> Self {
        WidgetChoice::Levels(levels)
    }
}

impl From<Vec<&str>> for WidgetChoice {
    fn from(levels: Vec<&str>) -> Self {
        WidgetChoice::Levels(levels.into_iter().map(Widget::new).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiNode {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub widget: String,
    #[serde(rename = "widgetConfig", skip_serializing_if = "Option::is_none")]
    pub widget_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<UiNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, UiNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<Value>>,
}

impl UiNode {
    /// Effective widget of the innermost element, for upload detection.
    pub fn leaf_widget(&self) -> &str {
        match &self.items {
            Some(items) if self.kind == Kind::Array => items.leaf_widget(),
            _ => &self.widget,
        }
    }
}

/// Build the UI node for one descriptor.
///
/// Precedence: the explicit override for this nesting level, then the theme
/// entry for the resolved type name, then the structural default.
pub fn synthesize(
    descriptor: &TypeDescriptor,
    explicit: Option<&WidgetChoice>,
    theme: &Theme,
    position: usize,
) -> UiNode {
    let chosen = explicit
        .and_then(|choice| choice.at(position))
        .or_else(|| theme.widget_for(&descriptor.type_name));
    let (widget, widget_config) = match chosen {
        Some(widget) => (widget.name.clone(), widget.config.clone()),
        None => (structural_default(descriptor).to_string(), None),
    };

    let items = match (&descriptor.kind, &descriptor.element) {
        (Kind::Array, Some(element)) => {
            Some(Box::new(synthesize(element, explicit, theme, position + 1)))
        }
        _ => None,
    };
    let properties = descriptor.fields.as_ref().map(|fields| {
        fields
            .iter()
            .map(|(name, field)| (name.clone(), synthesize(field, explicit, theme, position + 1)))
            .collect()
    });

    UiNode {
        kind: descriptor.kind,
        widget,
        widget_config,
        items,
        properties,
        whitelist: descriptor.whitelist.clone(),
    }
}

fn structural_default(descriptor: &TypeDescriptor) -> &str {
    if let Some(whitelist) = &descriptor.whitelist {
        return if whitelist.len() < CHOICE_LIMIT {
            "radio"
        } else {
            "inputbox"
        };
    }
    if let Some(widget) = &descriptor.widget {
        return widget;
    }
    match descriptor.kind {
        Kind::Boolean => "switch",
        Kind::Integer | Kind::Number | Kind::String => "inputbox",
        Kind::Array => match descriptor.element.as_deref() {
            Some(element) if element.whitelist.as_ref().is_some_and(|w| w.len() < CHOICE_LIMIT) => {
                "checkbox"
            }
            _ => "list",
        },
        Kind::Object if descriptor.fields.is_some() => "form",
        Kind::Object => "json",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int() -> TypeDescriptor {
        TypeDescriptor::new(Kind::Integer, "int")
    }

    #[test]
    fn explicit_beats_theme_beats_structure() {
        let theme = Theme::new("t").with_widget("int", "slider");
        let plain = Theme::new("plain");

        let explicit = WidgetChoice::from("inputbox");
        assert_eq!(synthesize(&int(), Some(&explicit), &theme, 0).widget, "inputbox");
        assert_eq!(synthesize(&int(), None, &theme, 0).widget, "slider");
        assert_eq!(synthesize(&int(), None, &plain, 0).widget, "inputbox");
    }

    #[test]
    fn literal_size_picks_choice_or_text() {
        let theme = Theme::new("t");
        let mut small = TypeDescriptor::new(Kind::String, "str");
        small.whitelist = Some((0..7).map(|i| json!(i.to_string())).collect());
        assert_eq!(synthesize(&small, None, &theme, 0).widget, "radio");

        let mut large = small.clone();
        large.whitelist = Some((0..8).map(|i| json!(i.to_string())).collect());
        assert_eq!(synthesize(&large, None, &theme, 0).widget, "inputbox");
    }

    #[test]
    fn override_levels_are_consumed_positionally() {
        let theme = Theme::new("t");
        let nested = TypeDescriptor::array(Some(TypeDescriptor::array(Some(int()))));
        let choice = WidgetChoice::from(vec!["sheet", "list"]);

        let node = synthesize(&nested, Some(&choice), &theme, 0);
        assert_eq!(node.widget, "sheet");
        let inner = node.items.as_ref().unwrap();
        assert_eq!(inner.widget, "list");
        // Override list too short for the innermost level: structural default.
        assert_eq!(inner.items.as_ref().unwrap().widget, "inputbox");
        assert_eq!(node.leaf_widget(), "inputbox");
    }

    #[test]
    fn widget_config_travels_with_the_widget() {
        let theme = Theme::new("t");
        let choice =
            WidgetChoice::from(Widget::new("slider").with_config(json!({"min": 0, "max": 10})));
        let node = synthesize(&int(), Some(&choice), &theme, 0);
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"type": "integer", "widget": "slider", "widgetConfig": {"min": 0, "max": 10}})
        );
    }

    #[test]
    fn choice_deserializes_from_string_object_or_list() {
        let single: WidgetChoice = serde_json::from_value(json!("switch")).unwrap();
        assert_eq!(single.top().unwrap().name, "switch");
        let full: WidgetChoice =
            serde_json::from_value(json!({"name": "slider", "config": {"step": 2}})).unwrap();
        assert_eq!(full.top().unwrap().config, Some(json!({"step": 2})));
        let levels: WidgetChoice = serde_json::from_value(json!(["sheet", "slider"])).unwrap();
        assert_eq!(levels.at(1).unwrap().name, "slider");
    }
}
