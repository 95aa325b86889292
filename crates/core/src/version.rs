//! Terraform-style version constraints (`>= 1.0, ~> 1.2, != 1.3.0`).

use crate::error::{Error, Result};
use semver::{BuildMetadata, Version};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Pessimistic,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Pessimistic => "~>",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Constraint {
    op: Operator,
    version: Version,
    /// Number of version segments written in the constraint (1 to 3).
    segments: usize,
}

impl Constraint {
    fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (op, rest) = [
            ("~>", Operator::Pessimistic),
            (">=", Operator::Ge),
            ("<=", Operator::Le),
            ("!=", Operator::Ne),
            ("=", Operator::Eq),
            (">", Operator::Gt),
            ("<", Operator::Lt),
        ]
        .into_iter()
        .find_map(|(prefix, op)| input.strip_prefix(prefix).map(|rest| (op, rest)))
        .unwrap_or((Operator::Eq, input));

        let raw = rest.trim().trim_start_matches('v');
        if raw.is_empty() {
            return Err(Error::InvalidConstraint(format!("missing version in {input:?}")));
        }

        // Split off pre-release/build suffix before counting segments.
        let core_end = raw.find(['-', '+']).unwrap_or(raw.len());
        let (core, suffix) = raw.split_at(core_end);
        let segments = core.split('.').count();
        if segments > 3 {
            return Err(Error::InvalidConstraint(format!("too many segments in {input:?}")));
        }
        let padded = match segments {
            1 => format!("{core}.0.0{suffix}"),
            2 => format!("{core}.0{suffix}"),
            _ => raw.to_string(),
        };
        let version = Version::parse(&padded)
            .map_err(|e| Error::InvalidConstraint(format!("{input:?}: {e}")))?;

        Ok(Self {
            op,
            version,
            segments,
        })
    }

    fn check(&self, version: &Version) -> bool {
        // Pre-releases only satisfy constraints naming a pre-release of the
        // same core version.
        if !version.pre.is_empty() {
            let same_core = self.version.major == version.major
                && self.version.minor == version.minor
                && self.version.patch == version.patch;
            if self.version.pre.is_empty() || !same_core {
                return false;
            }
        }

        let ordering = version.cmp(&self.version);
        match self.op {
            Operator::Eq => ordering.is_eq(),
            Operator::Ne => !ordering.is_eq(),
            Operator::Gt => ordering.is_gt(),
            Operator::Ge => ordering.is_ge(),
            Operator::Lt => ordering.is_lt(),
            Operator::Le => ordering.is_le(),
            Operator::Pessimistic => {
                if ordering.is_lt() {
                    return false;
                }
                match self.segments {
                    1 | 2 => version.major == self.version.major,
                    _ => version.major == self.version.major && version.minor == self.version.minor,
                }
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.version)
    }
}

/// A conjunction of comma-separated version constraints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionConstraints {
    constraints: Vec<Constraint>,
}

impl VersionConstraints {
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(Error::InvalidConstraint("empty constraint".to_string()));
        }
        let constraints = input
            .split(',')
            .map(Constraint::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { constraints })
    }

    /// True when `version` satisfies every constraint. Build metadata is ignored.
    pub fn check(&self, version: &Version) -> bool {
        let mut version = version.clone();
        version.build = BuildMetadata::EMPTY;
        self.constraints.iter().all(|c| c.check(&version))
    }
}

impl FromStr for VersionConstraints {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.constraints.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(", "))
    }
}
