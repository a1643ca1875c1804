//! Published template outputs

use crate::error::TerraformError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only map of output name to string value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSet {
    values: BTreeMap<String, String>,
}

/// One entry of `terraform output -json`
#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
    #[serde(default)]
    #[allow(dead_code)]
    sensitive: bool,
}

impl OutputSet {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse the document printed by `output -json`.
    ///
    /// String values are taken as-is; anything else is kept as compact JSON.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_slice(raw)?;
        let object = doc
            .as_object()
            .ok_or_else(|| TerraformError::InvalidOutputs("expected a JSON object".to_string()))?;

        let mut values = BTreeMap::new();
        for (name, entry) in object {
            let entry: OutputEntry = serde_json::from_value(entry.clone())
                .map_err(|e| TerraformError::InvalidOutputs(format!("{}: {}", name, e)))?;
            let value = match entry.value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            values.insert(name.clone(), value);
        }
        Ok(Self { values })
    }

    /// Look up a published output.
    pub fn read_output(&self, name: &str) -> Result<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TerraformError::OutputMissing(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_json() {
        let raw = br#"{
            "vpn_public_ip_address": {"sensitive": false, "type": "string", "value": "54.1.2.3"},
            "s3_bucket_name": {"sensitive": false, "type": "string", "value": "pritunl-backups-abc"},
            "ports": {"sensitive": false, "type": ["list", "number"], "value": [443, 1194]}
        }"#;

        let outputs = OutputSet::from_json(raw).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs.read_output("vpn_public_ip_address").unwrap(), "54.1.2.3");
        assert_eq!(outputs.read_output("ports").unwrap(), "[443,1194]");
    }

    #[test]
    fn test_missing_output() {
        let outputs = OutputSet::from_pairs([("a", "1")]);
        let err = outputs.read_output("vpn_management_ui").unwrap_err();
        assert!(matches!(err, TerraformError::OutputMissing(name) if name == "vpn_management_ui"));
    }

    #[test]
    fn test_empty_document() {
        let outputs = OutputSet::from_json(b"{}").unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_non_object_rejected() {
        let err = OutputSet::from_json(b"[]").unwrap_err();
        assert!(matches!(err, TerraformError::InvalidOutputs(_)));
    }
}
