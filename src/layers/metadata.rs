//! Layer metadata documents and their validation
//!
//! The document mirrors the native layer metadata model of desktop GIS
//! projects: identification, keywords, contacts, links, constraints and
//! extent. [`MetadataValidator`] applies the same checks as the native
//! validator, reporting every problem instead of stopping at the first one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::BoundingBox;

/// Point of contact listed in a metadata document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub name: String,
    pub organization: String,
    pub position: String,
    pub role: String,
    pub email: String,
}

/// Online resource attached to a metadata document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    pub name: String,
    #[serde(rename = "type")]
    pub link_type: String,
    pub url: String,
    pub description: String,
}

/// Metadata document for a single layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerMetadata {
    pub identifier: String,
    pub parent_identifier: String,
    pub language: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub history: Vec<String>,
    /// Keyword vocabulary -> keywords
    pub keywords: BTreeMap<String, Vec<String>>,
    pub categories: Vec<String>,
    pub contacts: Vec<Contact>,
    pub links: Vec<Link>,
    pub fees: String,
    pub licenses: Vec<String>,
    pub rights: Vec<String>,
    pub constraints: Vec<String>,
    pub crs: String,
    pub spatial_extents: Vec<BoundingBox>,
}

/// A single validation problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Document section, e.g. `identifier` or `contacts`
    pub section: &'static str,
    /// Index within a list section
    pub number: Option<usize>,
    pub note: String,
}

impl ValidationIssue {
    fn new(section: &'static str, note: impl Into<String>) -> Self {
        Self {
            section,
            number: None,
            note: note.into(),
        }
    }

    fn at(section: &'static str, number: usize, note: impl Into<String>) -> Self {
        Self {
            section,
            number: Some(number),
            note: note.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(n) => write!(f, "{} #{}: {}", self.section, n + 1, self.note),
            None => write!(f, "{}: {}", self.section, self.note),
        }
    }
}

/// Validates [`LayerMetadata`] documents
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataValidator;

impl MetadataValidator {
    pub fn new() -> Self {
        Self
    }

    /// Returns whether the document is valid and every issue found
    pub fn validate(&self, metadata: &LayerMetadata) -> (bool, Vec<ValidationIssue>) {
        let mut issues = Vec::new();

        let required = [
            ("identifier", &metadata.identifier, "Identifier element is required."),
            ("language", &metadata.language, "Language element is required."),
            ("type", &metadata.kind, "Type element is required."),
            ("title", &metadata.title, "Title element is required."),
            ("abstract", &metadata.abstract_text, "Abstract element is required."),
        ];
        for (section, value, note) in required {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::new(section, note));
            }
        }

        if metadata.licenses.is_empty() {
            issues.push(ValidationIssue::new("license", "At least one license is required."));
        }

        if !is_valid_authid(&metadata.crs) {
            issues.push(ValidationIssue::new(
                "crs",
                "A valid CRS element is required.",
            ));
        }

        if metadata.spatial_extents.is_empty() {
            issues.push(ValidationIssue::new(
                "extent",
                "A valid spatial extent is required.",
            ));
        }
        for (i, extent) in metadata.spatial_extents.iter().enumerate() {
            if extent.xmin > extent.xmax || extent.ymin > extent.ymax {
                issues.push(ValidationIssue::at("extent", i, "Spatial extent is inverted."));
            }
        }

        if metadata.contacts.is_empty() {
            issues.push(ValidationIssue::new("contacts", "At least one contact is required."));
        }
        for (i, contact) in metadata.contacts.iter().enumerate() {
            if contact.name.trim().is_empty() {
                issues.push(ValidationIssue::at("contacts", i, "Contact name is required."));
            }
        }

        if metadata.links.is_empty() {
            issues.push(ValidationIssue::new("links", "At least one link is required."));
        }
        for (i, link) in metadata.links.iter().enumerate() {
            if link.name.trim().is_empty() {
                issues.push(ValidationIssue::at("links", i, "Link name is required."));
            }
            if link.link_type.trim().is_empty() {
                issues.push(ValidationIssue::at("links", i, "Link type is required."));
            }
            if link.url.trim().is_empty() {
                issues.push(ValidationIssue::at("links", i, "Link url is required."));
            }
        }

        (issues.is_empty(), issues)
    }
}

/// `AUTHORITY:CODE`, e.g. `EPSG:4326`
fn is_valid_authid(authid: &str) -> bool {
    match authid.split_once(':') {
        Some((authority, code)) => !authority.trim().is_empty() && !code.trim().is_empty(),
        None => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn complete_metadata() -> LayerMetadata {
        LayerMetadata {
            identifier: "roads".to_string(),
            language: "eng".to_string(),
            kind: "dataset".to_string(),
            title: "Road network".to_string(),
            abstract_text: "Primary and secondary roads".to_string(),
            licenses: vec!["CC-BY-4.0".to_string()],
            crs: "EPSG:4326".to_string(),
            spatial_extents: vec![BoundingBox::new(4.0, 51.0, 6.0, 53.0)],
            contacts: vec![Contact {
                name: "GIS team".to_string(),
                ..Default::default()
            }],
            links: vec![Link {
                name: "homepage".to_string(),
                link_type: "WWW:LINK".to_string(),
                url: "https://example.org".to_string(),
                description: String::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_document_is_valid() {
        let (valid, issues) = MetadataValidator::new().validate(&complete_metadata());
        assert!(valid, "unexpected issues: {issues:?}");
    }

    #[test]
    fn test_empty_document_reports_every_section() {
        let (valid, issues) = MetadataValidator::new().validate(&LayerMetadata::default());
        assert!(!valid);

        let sections: Vec<_> = issues.iter().map(|i| i.section).collect();
        for expected in [
            "identifier", "language", "type", "title", "abstract", "license", "crs", "extent",
            "contacts", "links",
        ] {
            assert!(sections.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_list_issues_are_numbered() {
        let mut metadata = complete_metadata();
        metadata.links.push(Link::default());

        let (valid, issues) = MetadataValidator::new().validate(&metadata);
        assert!(!valid);
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().all(|i| i.section == "links" && i.number == Some(1)));
        assert_eq!(issues[0].to_string(), "links #2: Link name is required.");
    }

    #[test]
    fn test_invalid_crs() {
        let mut metadata = complete_metadata();
        metadata.crs = "4326".to_string();
        let (valid, issues) = MetadataValidator::new().validate(&metadata);
        assert!(!valid);
        assert_eq!(issues[0].section, "crs");
    }
}
