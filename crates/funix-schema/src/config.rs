//! Decoration-time configuration bundle for one function.
//!
//! Every per-argument table is keyed by an [`ArgTarget`]: a single argument
//! name or an ordered group configured together. Entries keep insertion
//! order; the builder applies them layer by layer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::widget::WidgetChoice;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgTarget {
    One(String),
    Group(Vec<String>),
}

impl ArgTarget {
    pub fn names(&self) -> &[String] {
        match self {
            ArgTarget::One(name) => std::slice::from_ref(name),
            ArgTarget::Group(names) => names,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ArgTarget::Group(names) if names.len() > 1)
    }

    pub fn describe(&self) -> String {
        self.names().join(", ")
    }
}

impl From<&str> for ArgTarget {
    fn from(name: &str) -> Self {
        ArgTarget::One(name.to_string())
    }
}

impl From<String> for ArgTarget {
    fn from(name: String) -> Self {
        ArgTarget::One(name)
    }
}

impl<const N: usize> From<[&str; N]> for ArgTarget {
    fn from(names: [&str; N]) -> Self {
        ArgTarget::Group(names.iter().map(|n| n.to_string()).collect())
    }
}

impl From<Vec<String>> for ArgTarget {
    fn from(names: Vec<String>) -> Self {
        ArgTarget::Group(names)
    }
}

/// How an argument's value is shaped in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Config,
    Column,
    Cell,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Config => "config",
            Role::Column => "column",
            Role::Cell => "cell",
        }
    }
}

/// Legacy combined per-argument block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArgumentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treat_as: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Value>,
    #[serde(default, rename = "example", skip_serializing_if = "Option::is_none")]
    pub examples: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutItem {
    Argument {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<f64>,
    },
    Markdown {
        content: String,
    },
    Html {
        content: String,
    },
    Divider {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl LayoutItem {
    pub fn argument(name: impl Into<String>) -> Self {
        LayoutItem::Argument {
            name: name.into(),
            width: None,
        }
    }
}

/// Show the listed arguments only while every `when` argument equals its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRule {
    pub when: IndexMap<String, Value>,
    pub show: Vec<String>,
}

/// Output panel placement relative to the input panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    #[default]
    Row,
    Column,
    Sheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    #[default]
    Ip,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: usize,
    /// Window length in seconds.
    pub period: f64,
    #[serde(default)]
    pub source: LimitSource,
}

impl RateLimit {
    pub fn per_ip(max_calls: usize, period: f64) -> Self {
        Self {
            max_calls,
            period,
            source: LimitSource::Ip,
        }
    }

    pub fn per_session(max_calls: usize, period: f64) -> Self {
        Self {
            max_calls,
            period,
            source: LimitSource::Session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum Selector {
    #[default]
    Result,
    Index(usize),
    Key(String),
}

/// Take an argument's initial value from another function's last result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreFill {
    /// Path or name of the source function.
    pub function: String,
    #[serde(default)]
    pub selector: Selector,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub title: Option<String>,
    pub description: Option<String>,
    pub path: Option<String>,
    pub theme: Option<String>,
    #[serde(default)]
    pub widgets: Vec<(ArgTarget, WidgetChoice)>,
    #[serde(default)]
    pub treat_as: Vec<(ArgTarget, Role)>,
    #[serde(default)]
    pub whitelist: Vec<(ArgTarget, Value)>,
    #[serde(default)]
    pub examples: Vec<(ArgTarget, Value)>,
    #[serde(default)]
    pub labels: Vec<(ArgTarget, String)>,
    #[serde(default)]
    pub argument_config: Vec<(ArgTarget, ArgumentConfig)>,
    #[serde(default)]
    pub input_layout: Vec<Vec<LayoutItem>>,
    #[serde(default)]
    pub output_layout: Vec<Vec<LayoutItem>>,
    #[serde(default)]
    pub conditional_visible: Vec<VisibilityRule>,
    #[serde(default)]
    pub destination: Destination,
    pub figure_to_image: Option<bool>,
    pub secret: Option<String>,
    #[serde(default)]
    pub rate_limit: Vec<RateLimit>,
    #[serde(default)]
    pub pre_fill: Vec<(String, PreFill)>,
    #[serde(default)]
    pub autorun: bool,
}

impl FunctionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn widget(mut self, target: impl Into<ArgTarget>, widget: impl Into<WidgetChoice>) -> Self {
        self.widgets.push((target.into(), widget.into()));
        self
    }

    pub fn treat_as(mut self, target: impl Into<ArgTarget>, role: Role) -> Self {
        self.treat_as.push((target.into(), role));
        self
    }

    pub fn whitelist(mut self, target: impl Into<ArgTarget>, values: Value) -> Self {
        self.whitelist.push((target.into(), values));
        self
    }

    pub fn examples(mut self, target: impl Into<ArgTarget>, values: Value) -> Self {
        self.examples.push((target.into(), values));
        self
    }

    pub fn label(mut self, target: impl Into<ArgTarget>, label: impl Into<String>) -> Self {
        self.labels.push((target.into(), label.into()));
        self
    }

    pub fn argument_config(mut self, target: impl Into<ArgTarget>, block: ArgumentConfig) -> Self {
        self.argument_config.push((target.into(), block));
        self
    }

    pub fn input_row(mut self, row: Vec<LayoutItem>) -> Self {
        self.input_layout.push(row);
        self
    }

    pub fn output_row(mut self, row: Vec<LayoutItem>) -> Self {
        self.output_layout.push(row);
        self
    }

    pub fn show_when(mut self, when: IndexMap<String, Value>, show: Vec<&str>) -> Self {
        self.conditional_visible.push(VisibilityRule {
            when,
            show: show.into_iter().map(str::to_string).collect(),
        });
        self
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn figure_to_image(mut self, enabled: bool) -> Self {
        self.figure_to_image = Some(enabled);
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit.push(limit);
        self
    }

    pub fn pre_fill(
        mut self,
        argument: impl Into<String>,
        function: impl Into<String>,
        selector: Selector,
    ) -> Self {
        self.pre_fill.push((
            argument.into(),
            PreFill {
                function: function.into(),
                selector,
            },
        ));
        self
    }

    pub fn autorun(mut self, enabled: bool) -> Self {
        self.autorun = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_loads_from_json_with_groups() {
        let config: FunctionConfig = serde_json::from_value(json!({
            "title": "Vector add",
            "widgets": [[["a", "b"], "sheet"], ["op", ["radio"]]],
            "treat_as": [[["a", "b"], "cell"]],
            "argument_config": [["op", { "label": "Operation", "example": ["+"] }]],
            "rate_limit": [{ "max_calls": 5, "period": 60 }],
            "pre_fill": [["x", { "function": "source", "selector": { "type": "index", "key": 1 } }]]
        }))
        .unwrap();

        assert_eq!(config.widgets[0].0.names(), ["a".to_string(), "b".to_string()]);
        assert!(config.widgets[0].0.is_group());
        assert_eq!(config.treat_as[0].1, Role::Cell);
        assert_eq!(config.argument_config[0].1.label.as_deref(), Some("Operation"));
        assert_eq!(config.rate_limit[0].source, LimitSource::Ip);
        assert_eq!(config.pre_fill[0].1.selector, Selector::Index(1));
    }
}
