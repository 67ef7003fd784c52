//! Constraint predicate language.
//!
//! Injectors may be gated on environment tokens: `TOKEN(1234)` requires an
//! exact value, `TOKEN(1234+)` a minimum, `TOKEN(1234-2345)` a range,
//! `TOKEN` or `TOKEN(*)` mere presence. Several constraints joined with `;`
//! must all hold.

use crate::environment::MixinEnvironment;
use crate::error::{CoreError, CoreResult};
use std::fmt;

/// The value window a single constraint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintRange {
    /// Token must be registered, any value
    Exists,
    /// Token must equal the value
    Exact(i64),
    /// Token must be at least the value
    AtLeast(i64),
    /// Token must fall inside the inclusive range
    Between(i64, i64),
}

impl ConstraintRange {
    fn accepts(&self, value: i64) -> bool {
        match *self {
            ConstraintRange::Exists => true,
            ConstraintRange::Exact(v) => value == v,
            ConstraintRange::AtLeast(min) => value >= min,
            ConstraintRange::Between(min, max) => (min..=max).contains(&value),
        }
    }
}

/// One parsed token constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub token: String,
    pub range: ConstraintRange,
}

impl Constraint {
    /// Parses a constraint expression into its individual constraints.
    ///
    /// An empty expression parses to no constraints.
    pub fn parse_all(expr: &str) -> CoreResult<Vec<Constraint>> {
        expr.split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse_one)
            .collect()
    }

    fn parse_one(part: &str) -> CoreResult<Constraint> {
        let (token, range) = match part.find('(') {
            None => (part, ConstraintRange::Exists),
            Some(open) => {
                let close = part
                    .rfind(')')
                    .filter(|close| *close > open)
                    .ok_or_else(|| {
                        CoreError::invalid_constraint(part, "unterminated value expression")
                    })?;
                let token = &part[..open];
                let body = part[open + 1..close].trim();
                (token, Self::parse_range(part, body)?)
            }
        };
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CoreError::invalid_constraint(part, "invalid token name"));
        }
        Ok(Constraint {
            token: token.to_uppercase(),
            range,
        })
    }

    fn parse_range(part: &str, body: &str) -> CoreResult<ConstraintRange> {
        if body.is_empty() || body == "*" {
            return Ok(ConstraintRange::Exists);
        }
        if let Some(min) = body.strip_suffix('+') {
            let min = Self::parse_value(part, min)?;
            return Ok(ConstraintRange::AtLeast(min));
        }
        if let Some(dash) = body[1..].find('-').map(|i| i + 1) {
            let min = Self::parse_value(part, &body[..dash])?;
            let max = Self::parse_value(part, &body[dash + 1..])?;
            if max < min {
                return Err(CoreError::invalid_constraint(part, "empty range"));
            }
            return Ok(ConstraintRange::Between(min, max));
        }
        Ok(ConstraintRange::Exact(Self::parse_value(part, body)?))
    }

    fn parse_value(part: &str, text: &str) -> CoreResult<i64> {
        text.trim()
            .parse::<i64>()
            .map_err(|_| CoreError::invalid_constraint(part, "expected an integer value"))
    }

    /// Checks this constraint against the environment token table.
    ///
    /// An unregistered token fails only when the environment runs with
    /// strict constraints; otherwise the constraint is treated as met.
    pub fn check(&self, env: &MixinEnvironment) -> CoreResult<()> {
        match env.token(&self.token) {
            Some(value) if self.range.accepts(value) => Ok(()),
            Some(value) => Err(CoreError::constraint_violation(
                self.token.clone(),
                Some(value),
                self.to_string(),
            )),
            None if env.options.strict_constraints => Err(CoreError::constraint_violation(
                self.token.clone(),
                None,
                self.to_string(),
            )),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            ConstraintRange::Exists => write!(f, "{}(*)", self.token),
            ConstraintRange::Exact(v) => write!(f, "{}({v})", self.token),
            ConstraintRange::AtLeast(min) => write!(f, "{}({min}+)", self.token),
            ConstraintRange::Between(min, max) => write!(f, "{}({min}-{max})", self.token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MixinSide;

    fn env_with(token: &str, value: i64) -> MixinEnvironment {
        let mut env = MixinEnvironment::new(MixinSide::Universal);
        env.register_token(token, value);
        env
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Constraint::parse_all("FORGE(1965+)").unwrap(),
            vec![Constraint {
                token: "FORGE".to_string(),
                range: ConstraintRange::AtLeast(1965),
            }]
        );
        assert_eq!(
            Constraint::parse_all("API(3)").unwrap()[0].range,
            ConstraintRange::Exact(3)
        );
        assert_eq!(
            Constraint::parse_all("API(100-199)").unwrap()[0].range,
            ConstraintRange::Between(100, 199)
        );
        assert_eq!(
            Constraint::parse_all("API(*)").unwrap()[0].range,
            ConstraintRange::Exists
        );
        assert_eq!(Constraint::parse_all("").unwrap(), vec![]);
    }

    #[test]
    fn test_parse_multiple() {
        let all = Constraint::parse_all("FORGE(1965+);API(3)").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].token, "API");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Constraint::parse_all("FORGE(").is_err());
        assert!(Constraint::parse_all("FOR GE(1)").is_err());
        assert!(Constraint::parse_all("API(x)").is_err());
        assert!(Constraint::parse_all("API(9-1)").is_err());
    }

    #[test]
    fn test_negative_range_bounds() {
        assert_eq!(
            Constraint::parse_all("T(-5)").unwrap()[0].range,
            ConstraintRange::Exact(-5)
        );
        assert_eq!(
            Constraint::parse_all("T(-5-5)").unwrap()[0].range,
            ConstraintRange::Between(-5, 5)
        );
    }

    #[test]
    fn test_check_against_environment() {
        let env = env_with("FORGE", 2000);
        assert!(Constraint::parse_all("FORGE(1965+)").unwrap()[0].check(&env).is_ok());
        assert!(Constraint::parse_all("FORGE(2001+)").unwrap()[0].check(&env).is_err());
        assert!(Constraint::parse_all("FORGE(2000)").unwrap()[0].check(&env).is_ok());
    }

    #[test]
    fn test_unknown_token_lenient_and_strict() {
        let mut env = MixinEnvironment::new(MixinSide::Universal);
        let c = &Constraint::parse_all("ABSENT(1+)").unwrap()[0];
        assert!(c.check(&env).is_ok());
        env.options.strict_constraints = true;
        assert!(c.check(&env).is_err());
    }
}
