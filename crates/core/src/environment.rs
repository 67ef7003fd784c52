//! Engine environment: side, option flags and constraint tokens.

use crate::error::CoreError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The physical side the host is running on.
///
/// Configurations may declare side-specific mixin lists; only the lists
/// matching the environment side are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MixinSide {
    /// Side could not be determined or does not matter
    #[default]
    Universal,
    Client,
    Server,
}

impl MixinSide {
    /// Returns true if mixins declared for `declared` may load on this side.
    pub fn accepts(&self, declared: MixinSide) -> bool {
        declared == MixinSide::Universal || *self == MixinSide::Universal || *self == declared
    }
}

impl fmt::Display for MixinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixinSide::Universal => write!(f, "universal"),
            MixinSide::Client => write!(f, "client"),
            MixinSide::Server => write!(f, "server"),
        }
    }
}

impl FromStr for MixinSide {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "universal" | "" => Ok(MixinSide::Universal),
            "client" => Ok(MixinSide::Client),
            "server" | "dedicated" => Ok(MixinSide::Server),
            _ => Err(CoreError::UnknownSide {
                name: s.to_string(),
            }),
        }
    }
}

/// Minimum class-file level a configuration may demand.
///
/// Expressed as the class-file major version; `JAVA_6` (50) is the floor the
/// engine itself supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompatibilityLevel(pub u16);

impl CompatibilityLevel {
    pub const JAVA_6: CompatibilityLevel = CompatibilityLevel(50);
    pub const JAVA_7: CompatibilityLevel = CompatibilityLevel(51);
    pub const JAVA_8: CompatibilityLevel = CompatibilityLevel(52);
    pub const JAVA_11: CompatibilityLevel = CompatibilityLevel(55);
    pub const JAVA_17: CompatibilityLevel = CompatibilityLevel(61);

    /// Default level assumed when a configuration does not declare one.
    pub const DEFAULT: CompatibilityLevel = CompatibilityLevel::JAVA_8;

    /// Gets the class-file major version for this level.
    pub fn major_version(&self) -> u16 {
        self.0
    }
}

impl FromStr for CompatibilityLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_uppercase();
        let digits = norm.trim_start_matches("JAVA_").trim_start_matches("JAVA");
        match digits.parse::<u16>() {
            Ok(release) if (6..=25).contains(&release) => {
                Ok(CompatibilityLevel(release + 44))
            }
            _ => Err(CoreError::invalid_constraint(
                s.to_string(),
                "unrecognized compatibility level".to_string(),
            )),
        }
    }
}

/// Option flags steering strictness and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EnvOptions {
    /// Run the post-apply verifier on every transformed class
    pub debug_verify: bool,
    /// Dump transformed classes through the printer
    pub debug_export: bool,
    /// Promote unique-method discards from warning to error
    pub strict_unique: bool,
    /// Fail when a mixin declares a target the engine cannot resolve
    pub strict_targets: bool,
    /// Fail when an injector constraint names an unknown token
    pub strict_constraints: bool,
}

/// The process environment an engine instance runs in.
///
/// Carries the side, the option flags and the token table that injector
/// constraints are evaluated against.
#[derive(Debug, Clone, Default)]
pub struct MixinEnvironment {
    pub side: MixinSide,
    pub options: EnvOptions,
    tokens: HashMap<String, i64>,
}

impl MixinEnvironment {
    /// Creates a new environment with default options.
    pub fn new(side: MixinSide) -> Self {
        Self {
            side,
            options: EnvOptions::default(),
            tokens: HashMap::new(),
        }
    }

    /// Registers a constraint token.
    pub fn register_token<S: Into<String>>(&mut self, name: S, value: i64) {
        self.tokens.insert(name.into().to_uppercase(), value);
    }

    /// Looks up a constraint token.
    pub fn token(&self, name: &str) -> Option<i64> {
        self.tokens.get(&name.to_uppercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_accepts() {
        assert!(MixinSide::Client.accepts(MixinSide::Universal));
        assert!(MixinSide::Client.accepts(MixinSide::Client));
        assert!(!MixinSide::Client.accepts(MixinSide::Server));
        assert!(MixinSide::Universal.accepts(MixinSide::Server));
    }

    #[test]
    fn test_compatibility_level_parse() {
        assert_eq!("JAVA_8".parse::<CompatibilityLevel>().unwrap(), CompatibilityLevel::JAVA_8);
        assert_eq!("java_17".parse::<CompatibilityLevel>().unwrap(), CompatibilityLevel::JAVA_17);
        assert!("JAVA_99".parse::<CompatibilityLevel>().is_err());
    }

    #[test]
    fn test_tokens_case_insensitive() {
        let mut env = MixinEnvironment::new(MixinSide::Server);
        env.register_token("Forge", 36);
        assert_eq!(env.token("FORGE"), Some(36));
        assert_eq!(env.token("forge"), Some(36));
        assert_eq!(env.token("fabric"), None);
    }
}
