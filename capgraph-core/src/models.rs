use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec;
use crate::error::{GraphError, Result};

/// Heading of the key/value block every document carries
pub const METADATA_HEADING: &str = "Metadata";
/// Heading of a Capability's cached enabler table
pub const ENABLERS_HEADING: &str = "Enablers";
/// Heading of the table listing capabilities this one depends on
pub const UPSTREAM_HEADING: &str = "Internal Upstream Dependency";
/// Heading of the table listing capabilities that depend on this one
pub const DOWNSTREAM_HEADING: &str = "Internal Downstream Impact";

pub const FIELD_NAME: &str = "Name";
pub const FIELD_TYPE: &str = "Type";
pub const FIELD_ID: &str = "ID";
pub const FIELD_CAPABILITY_ID: &str = "Capability ID";
pub const FIELD_STATUS: &str = "Status";
pub const FIELD_APPROVAL: &str = "Approval";
pub const FIELD_PRIORITY: &str = "Priority";
pub const FIELD_DESCRIPTION: &str = "Description";
pub const FIELD_OWNER: &str = "Owner";
pub const FIELD_DEVELOPER: &str = "Developer";

/// Placeholder values used when a row or document is created without them
pub const DEFAULT_STATUS: &str = "In Draft";
pub const DEFAULT_APPROVAL: &str = "Not Approved";
pub const DEFAULT_PRIORITY: &str = "Medium";

/// Identifier namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdPrefix {
    #[serde(rename = "CAP")]
    Capability,
    #[serde(rename = "ENB")]
    Enabler,
    #[serde(rename = "FR")]
    Functional,
    #[serde(rename = "NFR")]
    NonFunctional,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Capability => "CAP",
            IdPrefix::Enabler => "ENB",
            IdPrefix::Functional => "FR",
            IdPrefix::NonFunctional => "NFR",
        }
    }
}

impl fmt::Display for IdPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdPrefix {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CAP" => Ok(IdPrefix::Capability),
            "ENB" => Ok(IdPrefix::Enabler),
            "FR" => Ok(IdPrefix::Functional),
            "NFR" => Ok(IdPrefix::NonFunctional),
            other => Err(GraphError::InvalidIdentifier(format!(
                "unknown prefix '{}'",
                other
            ))),
        }
    }
}

/// A `{PREFIX}-{6 digits}` identifier, e.g. "CAP-100001"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub prefix: IdPrefix,
    pub number: u32,
}

/// Largest number representable in six digits
pub const MAX_ID_NUMBER: u32 = 999_999;

impl Identifier {
    pub fn new(prefix: IdPrefix, number: u32) -> Result<Self> {
        if number > MAX_ID_NUMBER {
            return Err(GraphError::InvalidIdentifier(format!(
                "{}-{} has more than six digits",
                prefix, number
            )));
        }
        Ok(Self { prefix, number })
    }

    /// The zero-padded numeric part
    pub fn digits(&self) -> String {
        format!("{:06}", self.number)
    }

    /// File name of the document this identifier names, if it names one
    pub fn file_name(&self, extension: &str) -> Option<String> {
        DocumentKind::from_prefix(self.prefix)
            .map(|kind| format!("{}-{}.{}", self.digits(), kind.file_marker(), extension))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:06}", self.prefix, self.number)
    }
}

impl FromStr for Identifier {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (prefix, digits) = s
            .split_once('-')
            .ok_or_else(|| GraphError::InvalidIdentifier(s.to_string()))?;
        let prefix: IdPrefix = prefix.parse()?;
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GraphError::InvalidIdentifier(s.to_string()));
        }
        let number = digits
            .parse()
            .map_err(|_| GraphError::InvalidIdentifier(s.to_string()))?;
        Ok(Self { prefix, number })
    }
}

impl Serialize for Identifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Returns the numbers of every `{prefix}-NNNNNN` occurrence in `text`.
///
/// An occurrence must not be glued to a preceding letter or digit (so "NFR-"
/// never counts as "FR-") and must be exactly six digits long.
pub fn find_identifier_numbers(text: &str, prefix: IdPrefix) -> Vec<u32> {
    let needle = format!("{}-", prefix.as_str());
    let bytes = text.as_bytes();
    let mut numbers = Vec::new();
    let mut from = 0;

    while let Some(pos) = text[from..].find(&needle) {
        let start = from + pos;
        from = start + needle.len();

        if start > 0 && bytes[start - 1].is_ascii_alphanumeric() {
            continue;
        }

        let digits_start = start + needle.len();
        let digits_end = digits_start + 6;
        if digits_end > bytes.len() || !bytes[digits_start..digits_end].iter().all(u8::is_ascii_digit) {
            continue;
        }
        if bytes.get(digits_end).is_some_and(u8::is_ascii_digit) {
            continue;
        }
        if let Ok(n) = text[digits_start..digits_end].parse() {
            numbers.push(n);
        }
    }

    numbers
}

/// The two node kinds stored as documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Capability,
    Enabler,
}

impl DocumentKind {
    pub fn from_prefix(prefix: IdPrefix) -> Option<Self> {
        match prefix {
            IdPrefix::Capability => Some(DocumentKind::Capability),
            IdPrefix::Enabler => Some(DocumentKind::Enabler),
            IdPrefix::Functional | IdPrefix::NonFunctional => None,
        }
    }

    /// Marker embedded in file names after the numeric id
    pub fn file_marker(&self) -> &'static str {
        match self {
            DocumentKind::Capability => "capability",
            DocumentKind::Enabler => "enabler",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Capability => write!(f, "Capability"),
            DocumentKind::Enabler => write!(f, "Enabler"),
        }
    }
}

/// One declared dependency edge, seen from the document that declares it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The capability at the other end of the edge
    pub capability_id: Identifier,
    pub description: String,
}

impl DependencyEdge {
    pub fn new(capability_id: Identifier, description: impl Into<String>) -> Self {
        Self {
            capability_id,
            description: description.into(),
        }
    }
}

/// Author-supplied contents of an Enabler document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnablerData {
    pub id: Identifier,
    pub name: String,
    pub description: String,
    pub status: String,
    pub approval: String,
    pub priority: String,
    pub capability_id: Option<Identifier>,
    pub owner: Option<String>,
    pub developer: Option<String>,
}

impl EnablerData {
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            status: DEFAULT_STATUS.to_string(),
            approval: DEFAULT_APPROVAL.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
            capability_id: None,
            owner: None,
            developer: None,
        }
    }

    /// Reads the metadata block of an Enabler document
    pub fn from_document(text: &str) -> Result<Self> {
        let id = document_id(text)?;
        if id.prefix != IdPrefix::Enabler {
            return Err(GraphError::ParseFailure(format!("{} is not an enabler", id)));
        }
        let capability_id = codec::extract_field(text, FIELD_CAPABILITY_ID)
            .filter(|v| !v.is_empty())
            .map(|v| v.parse())
            .transpose()?;

        Ok(Self {
            id,
            name: codec::extract_field(text, FIELD_NAME).unwrap_or_default(),
            description: codec::extract_field(text, FIELD_DESCRIPTION).unwrap_or_default(),
            status: codec::extract_field(text, FIELD_STATUS).unwrap_or_default(),
            approval: codec::extract_field(text, FIELD_APPROVAL).unwrap_or_default(),
            priority: codec::extract_field(text, FIELD_PRIORITY).unwrap_or_default(),
            capability_id,
            owner: codec::extract_field(text, FIELD_OWNER).filter(|v| !v.is_empty()),
            developer: codec::extract_field(text, FIELD_DEVELOPER).filter(|v| !v.is_empty()),
        })
    }

    /// Cells after the id column of this enabler's row in its parent's table
    pub fn summary_cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.description.clone(),
            self.status.clone(),
            self.approval.clone(),
            self.priority.clone(),
        ]
    }
}

/// Author-supplied contents of a Capability document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityData {
    pub id: Identifier,
    pub name: String,
    pub description: String,
    pub status: String,
    pub approval: String,
    pub priority: String,
    pub upstream: Vec<DependencyEdge>,
    pub downstream: Vec<DependencyEdge>,
}

impl CapabilityData {
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            status: DEFAULT_STATUS.to_string(),
            approval: DEFAULT_APPROVAL.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
            upstream: Vec::new(),
            downstream: Vec::new(),
        }
    }

    /// Reads the metadata block and both dependency tables of a Capability document.
    /// A missing or malformed dependency table is a `ParseFailure`.
    pub fn from_document(text: &str) -> Result<Self> {
        let mut data = Self::from_metadata(text)?;
        data.upstream = declared_edges(text, UPSTREAM_HEADING)?;
        data.downstream = declared_edges(text, DOWNSTREAM_HEADING)?;
        Ok(data)
    }

    /// Like [`CapabilityData::from_document`], but an unreadable dependency
    /// table reads as no edges. Only for reporting, never for synchronization.
    pub fn from_document_lenient(text: &str) -> Result<Self> {
        let mut data = Self::from_metadata(text)?;
        data.upstream = declared_edges(text, UPSTREAM_HEADING).unwrap_or_default();
        data.downstream = declared_edges(text, DOWNSTREAM_HEADING).unwrap_or_default();
        Ok(data)
    }

    fn from_metadata(text: &str) -> Result<Self> {
        let id = document_id(text)?;
        if id.prefix != IdPrefix::Capability {
            return Err(GraphError::ParseFailure(format!("{} is not a capability", id)));
        }

        Ok(Self {
            id,
            name: codec::extract_field(text, FIELD_NAME).unwrap_or_default(),
            description: codec::extract_field(text, FIELD_DESCRIPTION).unwrap_or_default(),
            status: codec::extract_field(text, FIELD_STATUS).unwrap_or_default(),
            approval: codec::extract_field(text, FIELD_APPROVAL).unwrap_or_default(),
            priority: codec::extract_field(text, FIELD_PRIORITY).unwrap_or_default(),
            upstream: Vec::new(),
            downstream: Vec::new(),
        })
    }
}

/// Parses the `ID` field of a document
pub fn document_id(text: &str) -> Result<Identifier> {
    codec::extract_field(text, FIELD_ID)
        .ok_or_else(|| GraphError::ParseFailure("missing ID field".to_string()))?
        .parse()
}

/// Edges listed in one of a capability's dependency tables. Rows whose first
/// column is not a capability identifier are ignored; a missing table is an error.
pub fn declared_edges(text: &str, heading: &str) -> Result<Vec<DependencyEdge>> {
    let rows = codec::extract_table(text, heading)?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let id: Identifier = row.key().parse().ok()?;
            (id.prefix == IdPrefix::Capability)
                .then(|| DependencyEdge::new(id, row.cell(1).unwrap_or_default()))
        })
        .collect())
}
