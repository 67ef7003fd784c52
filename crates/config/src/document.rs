//! The configuration document and its runtime wrapper.

use crate::error::{ConfigError, ConfigResult};
use crate::plugin::MixinConfigPlugin;
use mixin_core::{CompatibilityLevel, MixinPhase, MixinSide};
use serde::Deserialize;

/// Default mixin priority.
pub const DEFAULT_PRIORITY: i32 = 1000;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// The JSON shape of one mixin configuration resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    /// Dotted package prefix for every listed mixin, mandatory
    pub package: String,
    /// Mixins applied on either side
    #[serde(default)]
    pub mixins: Vec<String>,
    /// Mixins applied on the client side only
    #[serde(default)]
    pub client: Vec<String>,
    /// Mixins applied on the server side only
    #[serde(default)]
    pub server: Vec<String>,
    /// Default priority for mixins in this configuration
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Abort the host when any mixin of this configuration fails
    #[serde(default)]
    pub required: bool,
    /// Resource name of the reference map
    #[serde(default)]
    pub refmap: Option<String>,
    /// Phase tag this configuration binds to
    #[serde(default)]
    pub target: Option<String>,
    /// Companion plugin class name
    #[serde(default)]
    pub plugin: Option<String>,
    /// Minimum class-file level the mixins were compiled for
    #[serde(default, rename = "compatibilityLevel")]
    pub compatibility_level: Option<String>,
    /// Minimum engine version
    #[serde(default, rename = "minVersion")]
    pub min_version: Option<String>,
    /// Verbose diagnostics for this configuration
    #[serde(default)]
    pub verbose: bool,
}

/// A registered configuration and its engine-side state.
pub struct MixinConfig {
    /// Resource identifier the configuration was loaded from
    pub name: String,
    pub document: ConfigDocument,
    pub phase: MixinPhase,
    pub compatibility: CompatibilityLevel,
    /// Flipped when the engine consumes this configuration
    pub visited: bool,
    /// Companion plugin instance, attached at drain time
    pub plugin: Option<Box<dyn MixinConfigPlugin>>,
    /// Accumulated per-mixin error notes
    pub errors: Vec<String>,
}

impl MixinConfig {
    /// Parses and validates a configuration document.
    pub fn load(name: &str, json: &str, engine_version: &str) -> ConfigResult<Self> {
        let document: ConfigDocument = serde_json::from_str(json)
            .map_err(|e| ConfigError::malformed(name.to_string(), e.to_string()))?;
        if document.package.trim().is_empty() {
            return Err(ConfigError::missing_option(name, "package"));
        }
        if let Some(min_version) = &document.min_version {
            if version_newer(min_version, engine_version) {
                return Err(ConfigError::VersionMismatch {
                    name: name.to_string(),
                    required: min_version.clone(),
                    engine: engine_version.to_string(),
                });
            }
        }
        let phase = match &document.target {
            Some(tag) => tag
                .parse::<MixinPhase>()
                .map_err(|e| {
                ConfigError::invalid_option(name.to_string(), "target".to_string(), e.to_string())
            })?,
            None => MixinPhase::Default,
        };
        let compatibility = match &document.compatibility_level {
            Some(level) => level.parse::<CompatibilityLevel>().map_err(|e| {
                ConfigError::invalid_option(
                    name.to_string(),
                    "compatibilityLevel".to_string(),
                    e.to_string(),
                )
            })?,
            None => CompatibilityLevel::DEFAULT,
        };
        Ok(Self {
            name: name.to_string(),
            document,
            phase,
            compatibility,
            visited: false,
            plugin: None,
            errors: Vec::new(),
        })
    }

    /// Dotted fully-qualified names of the mixins active on `side`, in
    /// declaration order: shared list first, then the side list.
    pub fn mixin_class_names(&self, side: MixinSide) -> Vec<String> {
        let mut names: Vec<&String> = self.document.mixins.iter().collect();
        match side {
            MixinSide::Client => names.extend(self.document.client.iter()),
            MixinSide::Server => names.extend(self.document.server.iter()),
            MixinSide::Universal => {
                names.extend(self.document.client.iter());
                names.extend(self.document.server.iter());
            }
        }
        names
            .into_iter()
            .map(|simple| format!("{}.{}", self.document.package, simple))
            .collect()
    }

    /// Records a per-mixin failure against this configuration.
    pub fn add_error<S: Into<String>>(&mut self, error: S) {
        self.errors.push(error.into());
    }
}

impl std::fmt::Debug for MixinConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixinConfig")
            .field("name", &self.name)
            .field("package", &self.document.package)
            .field("phase", &self.phase)
            .field("visited", &self.visited)
            .field("errors", &self.errors.len())
            .finish()
    }
}

/// True when `required` names a strictly newer version than `actual`.
///
/// Versions compare as dot-separated numeric runs; missing components count
/// as zero, non-numeric tails are ignored.
fn version_newer(required: &str, actual: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse::<u32>()
                    .unwrap_or(0)
            })
            .collect()
    };
    let required = parse(required);
    let actual = parse(actual);
    for i in 0..required.len().max(actual.len()) {
        let r = required.get(i).copied().unwrap_or(0);
        let a = actual.get(i).copied().unwrap_or(0);
        if r != a {
            return r > a;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "package": "com.example.mixins",
        "mixins": ["MixinTarget", "MixinOther"],
        "client": ["MixinClientOnly"],
        "priority": 1100,
        "required": true,
        "refmap": "example.refmap.json",
        "target": "@init",
        "minVersion": "0.3"
    }"#;

    #[test]
    fn test_load_sample() {
        let config = MixinConfig::load("example.mixins.json", SAMPLE, "0.4.0").unwrap();
        assert_eq!(config.document.priority, 1100);
        assert!(config.document.required);
        assert_eq!(config.phase, MixinPhase::Init);
        assert!(!config.visited);
    }

    #[test]
    fn test_side_selection() {
        let config = MixinConfig::load("c", SAMPLE, "0.4.0").unwrap();
        let server = config.mixin_class_names(MixinSide::Server);
        assert_eq!(
            server,
            vec![
                "com.example.mixins.MixinTarget".to_string(),
                "com.example.mixins.MixinOther".to_string(),
            ]
        );
        let client = config.mixin_class_names(MixinSide::Client);
        assert_eq!(client.len(), 3);
        assert_eq!(client[2], "com.example.mixins.MixinClientOnly");
    }

    #[test]
    fn test_missing_package_rejected() {
        assert!(matches!(
            MixinConfig::load("c", r#"{"package": " "}"#, "0.4.0"),
            Err(ConfigError::MissingOption { .. })
        ));
        assert!(matches!(
            MixinConfig::load("c", r#"{"mixins": []}"#, "0.4.0"),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let json = r#"{"package": "a.b", "bogus": 1}"#;
        assert!(matches!(
            MixinConfig::load("c", json, "0.4.0"),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_version_gate() {
        let json = r#"{"package": "a.b", "minVersion": "9.9"}"#;
        assert!(matches!(
            MixinConfig::load("c", json, "0.4.0"),
            Err(ConfigError::VersionMismatch { .. })
        ));
        let ok = r#"{"package": "a.b", "minVersion": "0.4"}"#;
        assert!(MixinConfig::load("c", ok, "0.4.0").is_ok());
    }

    #[test]
    fn test_version_compare() {
        assert!(version_newer("0.5", "0.4.0"));
        assert!(!version_newer("0.4", "0.4.0"));
        assert!(!version_newer("0.3.9", "0.4"));
        assert!(version_newer("1.0", "0.9.9"));
    }
}
