//! Declarative pipeline configuration.
//!
//! A route's middleware list can be kept outside the code as JSON:
//!
//! ```json
//! {
//!   "groups": { "web": ["logger", "cors"] },
//!   "middleware": [
//!     "web",
//!     "role:role=admin",
//!     { "name": "cors", "attributes": { "origins": ["https://app.example"] } }
//!   ]
//! }
//! ```
//!
//! Entries are either binding specs (see [`registry`](crate::registry)) or a
//! name with an explicit attribute object. Nothing is instantiated here: the
//! entries are resolved against a [`MiddlewareRegistry`](crate::MiddlewareRegistry)
//! when the pipeline is built.

use std::{collections::BTreeMap, io::Read};

use serde::{Deserialize, Serialize};

use crate::{
    attributes::Attributes,
    error::Result,
    registry::Binding,
};

/// One entry of [`PipelineConfig::middleware`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiddlewareEntry {
    /// A binding spec such as `"role:role=admin"`.
    Spec(String),
    /// A name with an attribute object.
    Detailed {
        name: String,
        #[serde(default)]
        attributes: Attributes,
    },
}

impl MiddlewareEntry {
    /// Converts the entry into a [`Binding`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSpec`](crate::Error::InvalidSpec) for a malformed spec or name.
    pub fn to_binding(&self) -> Result<Binding> {
        match self {
            Self::Spec(spec) => spec.parse(),
            Self::Detailed { name, attributes } => Binding::new(name.clone(), attributes.clone()),
        }
    }
}

/// Ordered middleware list plus optional group definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Group name → member specs.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    /// Middleware entries, outermost first.
    #[serde(default)]
    pub middleware: Vec<MiddlewareEntry>,
}

impl PipelineConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) when the document is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use onionskin::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_json(r#"{ "middleware": ["logger"] }"#).unwrap();
    /// assert_eq!(config.middleware.len(), 1);
    /// assert!(PipelineConfig::from_json("[").is_err());
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON document, e.g. from a file.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) on I/O or syntax errors.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// All middleware entries as bindings, in order.
    ///
    /// # Errors
    ///
    /// The first entry that fails [`MiddlewareEntry::to_binding`].
    pub fn bindings(&self) -> Result<Vec<Binding>> {
        self.middleware.iter().map(MiddlewareEntry::to_binding).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const SAMPLE: &str = r#"{
        "groups": { "web": ["logger", "cors"] },
        "middleware": [
            "web",
            "role:role=admin",
            { "name": "cors", "attributes": { "origins": ["https://app.example"], "max_age": 60 } },
            { "name": "logger" }
        ]
    }"#;

    #[test]
    fn parses_both_entry_forms() {
        let config = PipelineConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.groups["web"], vec!["logger", "cors"]);

        let bindings = config.bindings().unwrap();
        let names: Vec<&str> = bindings.iter().map(Binding::name).collect();
        assert_eq!(names, vec!["web", "role", "cors", "logger"]);
        assert_eq!(bindings[1].attributes().str("role").unwrap(), "admin");
        assert_eq!(bindings[2].attributes().int("max_age").unwrap(), 60);
        assert!(bindings[3].attributes().is_empty());
    }

    #[test]
    fn empty_document_is_empty_config() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn reads_from_reader() {
        let config = PipelineConfig::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(config.middleware.len(), 4);
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "middleware": 3 }"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn bad_entry_surfaces_from_bindings() {
        let config =
            PipelineConfig::from_json(r#"{ "middleware": [{ "name": "", "attributes": {} }] }"#)
                .unwrap();
        assert!(matches!(config.bindings(), Err(Error::InvalidSpec { .. })));
    }
}
