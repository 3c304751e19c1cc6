//! Named theme tables: resolved type name → default widget.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchemaError, SchemaResult};
use crate::widget::Widget;

pub const DEFAULT_THEME: &str = "default";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub widgets: IndexMap<String, Widget>,
    /// Style properties passed through untouched to the front end.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub style: Value,
}

impl Theme {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            widgets: IndexMap::new(),
            style: Value::Null,
        }
    }

    pub fn with_widget(mut self, type_name: impl Into<String>, widget: impl Into<Widget>) -> Self {
        self.widgets.insert(type_name.into(), widget.into());
        self
    }

    pub fn widget_for(&self, type_name: &str) -> Option<&Widget> {
        self.widgets.get(type_name)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// All themes known to one registry.
#[derive(Debug, Clone)]
pub struct ThemeSet {
    themes: HashMap<String, Theme>,
    default: String,
}

impl Default for ThemeSet {
    fn default() -> Self {
        let mut themes = HashMap::new();
        themes.insert(DEFAULT_THEME.to_string(), Theme::new(DEFAULT_THEME));
        Self {
            themes,
            default: DEFAULT_THEME.to_string(),
        }
    }
}

impl ThemeSet {
    pub fn insert(&mut self, theme: Theme) {
        self.themes.insert(theme.name.clone(), theme);
    }

    /// Make a registered theme the fallback for functions that name none.
    pub fn set_default(&mut self, name: &str) -> SchemaResult<()> {
        if !self.themes.contains_key(name) {
            return Err(SchemaError::UnknownTheme(name.to_string()));
        }
        self.default = name.to_string();
        Ok(())
    }

    pub fn get(&self, name: Option<&str>) -> SchemaResult<&Theme> {
        let name = name.unwrap_or(&self.default);
        self.themes
            .get(name)
            .ok_or_else(|| SchemaError::UnknownTheme(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_parses_string_and_object_widgets() {
        let theme = Theme::from_json(
            r##"{
                "name": "sunset",
                "widgets": {
                    "int": "slider",
                    "str": { "name": "textarea", "config": { "rows": 4 } }
                },
                "style": { "palette": { "primary": "#ff6b00" } }
            }"##,
        )
        .unwrap();

        assert_eq!(theme.widget_for("int").unwrap().name, "slider");
        let textarea = theme.widget_for("str").unwrap();
        assert_eq!(textarea.name, "textarea");
        assert_eq!(textarea.config.as_ref().unwrap()["rows"], 4);
        assert!(theme.widget_for("float").is_none());
        assert_eq!(theme.style["palette"]["primary"], "#ff6b00");
    }

    #[test]
    fn unknown_theme_is_an_error() {
        let mut themes = ThemeSet::default();
        assert!(themes.get(None).is_ok());
        assert_eq!(
            themes.get(Some("missing")).unwrap_err(),
            SchemaError::UnknownTheme("missing".into())
        );
        assert!(themes.set_default("missing").is_err());

        themes.insert(Theme::new("dark"));
        themes.set_default("dark").unwrap();
        assert_eq!(themes.get(None).unwrap().name, "dark");
    }
}
