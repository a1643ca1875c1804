//! Template variables and their `-var` rendering
//!
//! Strings are passed through as-is (Terraform reads a `-var` value as a
//! string literal for string-typed variables). Lists and maps are rendered
//! as HCL expressions so `list(string)` and `map(string)` variables parse.

use crate::error::TerraformError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single template variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    String(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl VarValue {
    /// Render the value the way `-var name=<value>` expects it.
    pub fn to_hcl(&self) -> String {
        match self {
            VarValue::String(s) => s.clone(),
            VarValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(|i| quote(i)).collect();
                format!("[{}]", rendered.join(", "))
            }
            VarValue::Map(entries) => {
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{} = {}", quote(k), quote(v)))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::String(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::String(s)
    }
}

impl From<Vec<String>> for VarValue {
    fn from(items: Vec<String>) -> Self {
        VarValue::List(items)
    }
}

impl From<BTreeMap<String, String>> for VarValue {
    fn from(entries: BTreeMap<String, String>) -> Self {
        VarValue::Map(entries)
    }
}

/// HCL string literal (JSON string escaping is a valid subset)
fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Ordered set of variables handed to apply/destroy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarSet {
    vars: BTreeMap<String, VarValue>,
}

impl VarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, rejecting names Terraform would not accept.
    pub fn insert(&mut self, name: &str, value: impl Into<VarValue>) -> Result<()> {
        if !is_valid_identifier(name) {
            return Err(TerraformError::InvalidVariable(name.to_string()));
        }
        self.vars.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Builder form of [`VarSet::insert`].
    pub fn with(mut self, name: &str, value: impl Into<VarValue>) -> Result<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VarValue)> {
        self.vars.iter()
    }

    /// `-var name=value` argument pairs in name order.
    pub fn to_cli_args(&self) -> Vec<String> {
        self.vars
            .iter()
            .flat_map(|(name, value)| ["-var".to_string(), format!("{}={}", name, value.to_hcl())])
            .collect()
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_renders_raw() {
        assert_eq!(VarValue::from("us-east-1").to_hcl(), "us-east-1");
    }

    #[test]
    fn test_list_renders_hcl() {
        let value = VarValue::from(vec!["0.0.0.0/0".to_string(), "10.0.0.0/8".to_string()]);
        assert_eq!(value.to_hcl(), r#"["0.0.0.0/0", "10.0.0.0/8"]"#);
    }

    #[test]
    fn test_map_renders_hcl_sorted() {
        let mut tags = BTreeMap::new();
        tags.insert("service".to_string(), "pritunl".to_string());
        tags.insert("env".to_string(), "test".to_string());
        let value = VarValue::from(tags);
        assert_eq!(value.to_hcl(), r#"{"env" = "test", "service" = "pritunl"}"#);
    }

    #[test]
    fn test_quotes_are_escaped() {
        let value = VarValue::from(vec![r#"a"b"#.to_string()]);
        assert_eq!(value.to_hcl(), r#"["a\"b"]"#);
    }

    #[test]
    fn test_cli_args_pairs() {
        let vars = VarSet::new()
            .with("aws_region", "us-east-1")
            .unwrap()
            .with("ami_id", "ami-X")
            .unwrap();
        assert_eq!(
            vars.to_cli_args(),
            vec!["-var", "ami_id=ami-X", "-var", "aws_region=us-east-1"]
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut vars = VarSet::new();
        assert!(vars.insert("1bad", "x").is_err());
        assert!(vars.insert("bad name", "x").is_err());
        assert!(vars.insert("", "x").is_err());
        assert!(vars.insert("s3_bucket_name", "x").is_ok());
        assert_eq!(vars.len(), 1);
    }
}
