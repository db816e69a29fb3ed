//! Settings with deprecation tracking.
//!
//! Reading a deprecated setting that is explicitly present emits a deprecation
//! warning into the current request, if there is one. Keys can be deprecated
//! individually on a [`Setting`] or by glob pattern in a [`SettingsRegistry`].

use crate::config::WarningConfig;
use crate::emitter::DeprecationLogger;
use crate::error::{Result, WarningError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Message emitted when a deprecated setting is read.
pub const DEPRECATED_SETTING_TEMPLATE: &str = "[{}] setting was deprecated in Zentinel and will be \
    removed in a future release! See the breaking changes documentation for the next major \
    version.";

/// Flat `key -> value` settings map.
#[derive(Debug, Clone)]
pub struct Settings {
    values: BTreeMap<String, String>,
    logger: DeprecationLogger,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            logger: DeprecationLogger::new("settings"),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML, flattening nested mappings with `.`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(yaml)?;
        let mut settings = Self::new();
        match root {
            Value::Null => {}
            Value::Mapping(_) => flatten("", &root, &mut settings.values),
            _ => {
                return Err(WarningError::Config(
                    "settings document must be a mapping".to_string(),
                ))
            }
        }
        Ok(settings)
    }

    /// Replace the logger used for deprecated reads.
    pub fn with_logger(mut self, logger: DeprecationLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn logger(&self) -> &DeprecationLogger {
        &self.logger
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = scalar_to_string(k) else {
                    continue;
                };
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&full, v, out);
            }
        }
        Value::Sequence(items) => {
            let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            out.insert(prefix.to_string(), joined.join(","));
        }
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out),
        other => {
            if let Some(s) = scalar_to_string(other) {
                out.insert(prefix.to_string(), s);
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A typed setting with a default value.
#[derive(Debug, Clone)]
pub struct Setting<T> {
    key: String,
    default: T,
    deprecated: bool,
}

impl<T> Setting<T>
where
    T: FromStr + Clone,
    T::Err: fmt::Display,
{
    pub fn new(key: impl Into<String>, default: T) -> Self {
        Self {
            key: key.into(),
            default,
            deprecated: false,
        }
    }

    /// Mark this setting deprecated.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Whether `settings` explicitly sets this key.
    pub fn exists(&self, settings: &Settings) -> bool {
        settings.contains(&self.key)
    }

    /// Read the value, falling back to the default.
    ///
    /// Reading an explicitly set deprecated setting emits a deprecation warning.
    pub fn get(&self, settings: &Settings) -> Result<T> {
        let Some(raw) = settings.get_raw(&self.key) else {
            return Ok(self.default.clone());
        };
        if self.deprecated {
            settings
                .logger()
                .deprecated(DEPRECATED_SETTING_TEMPLATE, &[&self.key]);
        }
        raw.parse().map_err(|e: T::Err| WarningError::InvalidSetting {
            key: self.key.clone(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Known settings and deprecated key patterns.
#[derive(Debug, Default)]
pub struct SettingsRegistry {
    known: HashSet<String>,
    deprecated: HashSet<String>,
    patterns: Option<GlobSet>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry whose deprecated patterns come from `config`.
    pub fn from_config(config: &WarningConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.set_patterns(&config.deprecated_patterns)?;
        Ok(registry)
    }

    pub fn set_patterns(&mut self, patterns: &[String]) -> Result<()> {
        if patterns.is_empty() {
            self.patterns = None;
            return Ok(());
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.patterns = Some(builder.build()?);
        Ok(())
    }

    pub fn register<T>(&mut self, setting: &Setting<T>)
    where
        T: FromStr + Clone,
        T::Err: fmt::Display,
    {
        self.known.insert(setting.key().to_string());
        if setting.is_deprecated() {
            self.deprecated.insert(setting.key().to_string());
        }
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.known.contains(key)
    }

    pub fn is_deprecated(&self, key: &str) -> bool {
        self.deprecated.contains(key)
            || self
                .patterns
                .as_ref()
                .is_some_and(|patterns| patterns.is_match(key))
    }

    /// Read the raw value of `key`, emitting a deprecation if it is set and deprecated.
    pub fn access<'a>(&self, settings: &'a Settings, key: &str) -> Option<&'a str> {
        let raw = settings.get_raw(key)?;
        if self.is_deprecated(key) {
            settings
                .logger()
                .deprecated(DEPRECATED_SETTING_TEMPLATE, &[&key]);
        }
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;

    fn quiet(settings: Settings) -> Settings {
        settings.with_logger(DeprecationLogger::new("settings").with_logging(false))
    }

    #[test]
    fn test_from_yaml_flattens() {
        let settings = Settings::from_yaml(
            r#"
transport:
  tcp:
    compress: true
    port: 9300
node.name: alpha
hosts: [a, b]
"#,
        )
        .unwrap();

        assert_eq!(settings.get_raw("transport.tcp.compress"), Some("true"));
        assert_eq!(settings.get_raw("transport.tcp.port"), Some("9300"));
        assert_eq!(settings.get_raw("node.name"), Some("alpha"));
        assert_eq!(settings.get_raw("hosts"), Some("a,b"));
    }

    #[test]
    fn test_from_yaml_rejects_scalar_root() {
        assert!(Settings::from_yaml("just a string").is_err());
        assert!(Settings::from_yaml("").unwrap().is_empty());
    }

    #[test]
    fn test_get_default_and_parse_error() {
        let setting = Setting::new("index.refresh", true);
        assert!(setting.get(&Settings::new()).unwrap());

        let settings = Settings::new().put("index.refresh", "maybe");
        let err = setting.get(&settings).unwrap_err();
        assert!(matches!(err, WarningError::InvalidSetting { .. }));
    }

    #[test]
    fn test_deprecated_setting_emits_only_when_set() {
        let setting = Setting::new("test.setting.deprecated", false).deprecated();
        let plain = Setting::new("test.setting.plain", false);
        let settings = quiet(
            Settings::new()
                .put("test.setting.deprecated", true)
                .put("test.setting.plain", true),
        );

        let scope = context::begin_request().unwrap();
        scope.run_blocking(|| {
            assert!(setting.get(&settings).unwrap());
            assert!(plain.get(&settings).unwrap());
            assert!(!Setting::new("other", false).deprecated().get(&settings).unwrap());
        });

        let records = scope.store().drain();
        assert_eq!(records.len(), 1);
        assert!(records[0]
            .text()
            .starts_with("[test.setting.deprecated] setting was deprecated"));
    }

    #[test]
    fn test_registry_patterns() {
        let config = WarningConfig {
            deprecated_patterns: vec!["legacy.*".to_string()],
            ..WarningConfig::default()
        };
        let mut registry = SettingsRegistry::from_config(&config).unwrap();
        registry.register(&Setting::new("old.flag", false).deprecated());
        registry.register(&Setting::new("new.flag", false));

        assert!(registry.is_deprecated("legacy.mode"));
        assert!(registry.is_deprecated("old.flag"));
        assert!(!registry.is_deprecated("new.flag"));
        assert!(registry.is_registered("new.flag"));
        assert!(!registry.is_registered("legacy.mode"));
    }

    #[test]
    fn test_registry_access_emits() {
        let config = WarningConfig {
            deprecated_patterns: vec!["legacy.*".to_string()],
            ..WarningConfig::default()
        };
        let registry = SettingsRegistry::from_config(&config).unwrap();
        let settings = quiet(Settings::new().put("legacy.mode", "on").put("modern.mode", "on"));

        let scope = context::begin_request().unwrap();
        scope.run_blocking(|| {
            assert_eq!(registry.access(&settings, "legacy.mode"), Some("on"));
            assert_eq!(registry.access(&settings, "modern.mode"), Some("on"));
            assert_eq!(registry.access(&settings, "legacy.absent"), None);
        });

        assert_eq!(scope.store().len(), 1);
        assert!(scope.store().drain()[0].text().contains("[legacy.mode]"));
    }
}
