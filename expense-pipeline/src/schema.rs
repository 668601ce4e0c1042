//! Extraction schema identifiers
//!
//! The schema names which provider produced a raw payload and therefore
//! which normalizer can read it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Schema {
    /// Azure Document Intelligence receipt model
    DocuIntel,
    /// Google Document AI expense parser
    DocumentAi,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported schema '{0}'")]
pub struct UnsupportedSchema(pub String);

impl Schema {
    pub fn as_str(self) -> &'static str {
        match self {
            Schema::DocuIntel => "docu-intel",
            Schema::DocumentAi => "document-ai",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = UnsupportedSchema;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docu-intel" => Ok(Schema::DocuIntel),
            "document-ai" => Ok(Schema::DocumentAi),
            other => Err(UnsupportedSchema(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_schemas() {
        assert_eq!("docu-intel".parse::<Schema>(), Ok(Schema::DocuIntel));
        assert_eq!("document-ai".parse::<Schema>(), Ok(Schema::DocumentAi));
        assert_eq!(Schema::DocumentAi.to_string(), "document-ai");
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let err = "textract".parse::<Schema>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported schema 'textract'");
    }
}
