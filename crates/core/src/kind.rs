//! Job kinds: which pipeline definition applies to a job.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Closed catalogue of job kinds.
///
/// Both kinds share the same state machine and dispatcher; only the pipeline
/// definition differs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Import a restaurant's menu from its public web presence.
    MenuImport,
    /// Turn a short rotation video into a 3D model.
    ArGenerate,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::MenuImport, JobKind::ArGenerate];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::MenuImport => "menu-import",
            JobKind::ArGenerate => "ar-generate",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job kind: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms_match_serde() {
        for kind in JobKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_a_validation_error() {
        assert!(matches!(
            "pizza-delivery".parse::<JobKind>(),
            Err(DomainError::Validation(_))
        ));
    }
}
