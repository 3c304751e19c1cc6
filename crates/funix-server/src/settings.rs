use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use config::{Config, ConfigError, Environment as ConfigEnvironment, File};
use funix_schema::{RateLimit, Theme, ThemeSet};
use secrecy::Secret;
use tracing::info;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Read caller addresses from `x-forwarded-for` instead of the peer.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct EngineSettings {
    /// Flatten figures to stored PNGs instead of embedding them.
    #[serde(default)]
    pub figure_to_image: bool,
    /// JSON theme files loaded at startup, in order.
    #[serde(default)]
    pub theme_files: Vec<PathBuf>,
    #[serde(default)]
    pub default_theme: Option<String>,
    /// Secret for every function that does not define its own.
    #[serde(default)]
    pub secret: Option<Secret<String>>,
    /// Limits applied to every function.
    #[serde(default)]
    pub rate_limit: Vec<RateLimit>,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            figure_to_image: false,
            theme_files: Vec::new(),
            default_theme: None,
            secret: None,
            rate_limit: Vec::new(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl EngineSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Read every configured theme file into `themes`, then apply the
    /// default theme. Relative paths resolve against `base`.
    pub fn load_themes(&self, base: &Path, themes: &mut ThemeSet) -> anyhow::Result<()> {
        for file in &self.theme_files {
            let path = base.join(file);
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading theme {}", path.display()))?;
            let theme = Theme::from_json(&text)
                .with_context(|| format!("parsing theme {}", path.display()))?;
            info!(theme = %theme.name, path = %path.display(), "theme loaded");
            themes.insert(theme);
        }
        if let Some(name) = &self.default_theme {
            themes.set_default(name)?;
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

/// `base.yaml`, then `{environment}.yaml`, then `APP_*` variables
/// (`APP_ENGINE__FIGURE_TO_IMAGE=true`). Missing files are skipped.
pub fn get_configuration(dir: &Path) -> Result<Settings, ConfigError> {
    let environment: AppEnvironment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = Config::builder()
        .add_source(File::from(dir.join("base.yaml")).required(false))
        .add_source(File::from(dir.join(&environment_filename)).required(false))
        .add_source(
            ConfigEnvironment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Settings>()?;

    info!(
        environment = environment.as_str(),
        host = %settings.application.host,
        port = settings.application.port,
        "configuration loaded"
    );
    Ok(settings)
}

pub enum AppEnvironment {
    Local,
    Production,
}

impl AppEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnvironment::Local => "local",
            AppEnvironment::Production => "production",
        }
    }
}

impl TryFrom<String> for AppEnvironment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funix_schema::LimitSource;
    use secrecy::ExposeSecret;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("funix-settings-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let settings = get_configuration(&scratch("empty")).unwrap();
        assert_eq!(settings.application.port, 3000);
        assert!(!settings.application.trust_forwarded_for);
        assert_eq!(settings.engine.fetch_timeout(), Duration::from_secs(10));
        assert!(settings.engine.secret.is_none());
    }

    #[test]
    fn base_yaml_configures_the_engine() {
        let dir = scratch("base");
        std::fs::write(
            dir.join("base.yaml"),
            r#"
application:
  port: 8080
  trust_forwarded_for: true
engine:
  figure_to_image: true
  secret: "s3cret"
  default_theme: sunset
  theme_files: [sunset.json]
  rate_limit:
    - { max_calls: 5, period: 60 }
    - { max_calls: 1, period: 1.5, source: session }
"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("sunset.json"),
            r#"{"name": "sunset", "widgets": {"int": "slider"}}"#,
        )
        .unwrap();

        let settings = get_configuration(&dir).unwrap();
        assert_eq!(settings.application.port, 8080);
        assert!(settings.application.trust_forwarded_for);
        assert!(settings.engine.figure_to_image);
        assert_eq!(settings.engine.secret.as_ref().unwrap().expose_secret(), "s3cret");
        assert_eq!(settings.engine.rate_limit[1].source, LimitSource::Session);

        let mut themes = ThemeSet::default();
        settings.engine.load_themes(&dir, &mut themes).unwrap();
        assert_eq!(themes.get(None).unwrap().name, "sunset");
    }

    #[test]
    fn unknown_default_theme_is_an_error() {
        let engine = EngineSettings {
            default_theme: Some("nope".to_string()),
            ..EngineSettings::default()
        };
        assert!(engine.load_themes(Path::new("."), &mut ThemeSet::default()).is_err());
    }
}
