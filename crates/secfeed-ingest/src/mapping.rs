//! Declarative field mappings
//!
//! A [`FieldMapping`] pairs an external name (a storage column such as
//! `CVE_ID`, or an upstream CSV header such as `cveID`) with the internal
//! record field name (`cve_id`) and the kind used to parse flat-file text.
//! One mapping object drives both directions of the CSV serializer and the
//! table store.

use secfeed_common::{FieldKind, FieldValue, Record, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub external: String,
    pub internal: String,
    pub kind: FieldKind,
}

/// Which side of a mapping a set of names belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    External,
    Internal,
}

/// Ordered, bidirectional `external <-> internal` mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    fields: Vec<FieldSpec>,
}

impl FieldMapping {
    pub fn new<'a>(specs: impl IntoIterator<Item = &'a (&'a str, &'a str, FieldKind)>) -> Self {
        Self {
            fields: specs
                .into_iter()
                .map(|(external, internal, kind)| FieldSpec {
                    external: external.to_string(),
                    internal: internal.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    /// Mapping whose external and internal names coincide
    pub fn identity<'a>(specs: impl IntoIterator<Item = &'a (&'a str, FieldKind)>) -> Self {
        Self {
            fields: specs
                .into_iter()
                .map(|(name, kind)| FieldSpec {
                    external: name.to_string(),
                    internal: name.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn external_name(&self, internal: &str) -> Option<&str> {
        self.spec(Naming::Internal, internal).map(|s| s.external.as_str())
    }

    pub fn internal_name(&self, external: &str) -> Option<&str> {
        self.spec(Naming::External, external).map(|s| s.internal.as_str())
    }

    pub fn spec(&self, naming: Naming, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|s| match naming {
            Naming::External => s.external == name,
            Naming::Internal => s.internal == name,
        })
    }

    pub fn columns(&self, naming: Naming) -> Vec<&str> {
        self.fields
            .iter()
            .map(|s| match naming {
                Naming::External => s.external.as_str(),
                Naming::Internal => s.internal.as_str(),
            })
            .collect()
    }

    /// Rename an internal record to external names; unmapped fields are dropped
    pub fn to_external(&self, record: &Record) -> Record {
        self.fields
            .iter()
            .filter_map(|s| record.get(&s.internal).map(|v| (s.external.clone(), v.clone())))
            .collect()
    }

    /// Rename an external record to internal names; unmapped fields are dropped
    pub fn to_internal(&self, record: &Record) -> Record {
        self.fields
            .iter()
            .filter_map(|s| record.get(&s.external).map(|v| (s.internal.clone(), v.clone())))
            .collect()
    }

    /// Parse text for the field `name` using its declared kind; unmapped
    /// names are kept as text
    pub fn parse(&self, naming: Naming, name: &str, text: &str) -> Result<FieldValue> {
        let kind = self.spec(naming, name).map(|s| s.kind).unwrap_or(FieldKind::Text);
        FieldValue::parse(kind, text)
    }
}
