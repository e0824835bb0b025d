//! Read-only consistency audit of the whole corpus

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::codec;
use crate::error::Result;
use crate::models::{
    document_id, CapabilityData, EnablerData, IdPrefix, Identifier, DOWNSTREAM_HEADING,
    ENABLERS_HEADING, UPSTREAM_HEADING,
};
use crate::repository::DocumentRepository;

/// Identifier declared by more than one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateId {
    pub id: Identifier,
    pub paths: Vec<PathBuf>,
}

/// Edge declared on one endpoint but not mirrored on the other
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsymmetricEdge {
    /// Capability declaring the edge
    pub declared_by: Identifier,
    /// Capability whose table lacks the mirror row
    pub missing_in: Identifier,
    /// Table of `missing_in` that should hold the row
    pub table: String,
}

/// Enabler row whose cells differ from the enabler's own fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftedRow {
    pub capability: Identifier,
    pub enabler: Identifier,
    pub expected: Vec<String>,
    pub found: Vec<String>,
}

/// Enabler listed in the tables of several capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiplyListed {
    pub enabler: Identifier,
    pub capabilities: Vec<Identifier>,
}

/// Enabler absent from the table of the capability it names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingRow {
    pub enabler: Identifier,
    pub capability: Identifier,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub documents: usize,
    pub duplicate_ids: Vec<DuplicateId>,
    pub asymmetric_edges: Vec<AsymmetricEdge>,
    pub drifted_rows: Vec<DriftedRow>,
    pub multiply_listed: Vec<MultiplyListed>,
    pub missing_rows: Vec<MissingRow>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_ids.is_empty()
            && self.asymmetric_edges.is_empty()
            && self.drifted_rows.is_empty()
            && self.multiply_listed.is_empty()
            && self.missing_rows.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.duplicate_ids.len()
            + self.asymmetric_edges.len()
            + self.drifted_rows.len()
            + self.multiply_listed.len()
            + self.missing_rows.len()
    }
}

/// Scans every document and reports where the graph is inconsistent
pub fn audit(repo: &DocumentRepository) -> Result<AuditReport> {
    let texts = repo.scan_texts()?;
    let mut report = AuditReport {
        documents: texts.len(),
        ..Default::default()
    };

    let mut paths_by_id: BTreeMap<Identifier, Vec<PathBuf>> = BTreeMap::new();
    let mut capabilities: BTreeMap<Identifier, (CapabilityData, Vec<codec::TableRow>)> = BTreeMap::new();
    let mut enablers: BTreeMap<Identifier, EnablerData> = BTreeMap::new();

    for (path, text) in &texts {
        let Ok(id) = document_id(text) else {
            continue;
        };
        paths_by_id.entry(id).or_default().push(path.clone());

        match id.prefix {
            IdPrefix::Capability => match CapabilityData::from_document_lenient(text) {
                Ok(data) => {
                    let rows = codec::extract_table(text, ENABLERS_HEADING).unwrap_or_default();
                    capabilities.entry(id).or_insert((data, rows));
                }
                Err(e) => log::warn!("Audit skipping {}: {}", path.display(), e),
            },
            IdPrefix::Enabler => match EnablerData::from_document(text) {
                Ok(data) => {
                    enablers.entry(id).or_insert(data);
                }
                Err(e) => log::warn!("Audit skipping {}: {}", path.display(), e),
            },
            _ => {}
        }
    }

    report.duplicate_ids = paths_by_id
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(id, paths)| DuplicateId { id, paths })
        .collect();

    for (id, (data, _)) in &capabilities {
        let checks = [
            (&data.downstream, UPSTREAM_HEADING),
            (&data.upstream, DOWNSTREAM_HEADING),
        ];
        for (edges, mirror_table) in checks {
            for edge in edges {
                let Some((peer, _)) = capabilities.get(&edge.capability_id) else {
                    continue;
                };
                let mirrored = match mirror_table {
                    UPSTREAM_HEADING => &peer.upstream,
                    _ => &peer.downstream,
                };
                if !mirrored.iter().any(|e| e.capability_id == *id) {
                    report.asymmetric_edges.push(AsymmetricEdge {
                        declared_by: *id,
                        missing_in: edge.capability_id,
                        table: mirror_table.to_string(),
                    });
                }
            }
        }
    }

    let mut listed_in: HashMap<Identifier, Vec<Identifier>> = HashMap::new();
    for (cap_id, (_, rows)) in &capabilities {
        for row in rows {
            let Ok(enabler_id) = row.key().parse::<Identifier>() else {
                continue;
            };
            let owners = listed_in.entry(enabler_id).or_default();
            if !owners.contains(cap_id) {
                owners.push(*cap_id);
            }

            let Some(enabler) = enablers.get(&enabler_id) else {
                continue;
            };
            if enabler.capability_id != Some(*cap_id) {
                continue;
            }
            let expected = enabler.summary_cells();
            let found: Vec<String> = row.cells.iter().skip(1).cloned().collect();
            if found != expected {
                report.drifted_rows.push(DriftedRow {
                    capability: *cap_id,
                    enabler: enabler_id,
                    expected,
                    found,
                });
            }
        }
    }

    let mut multiply_listed: Vec<MultiplyListed> = listed_in
        .iter()
        .filter(|(_, owners)| owners.len() > 1)
        .map(|(enabler, owners)| {
            let mut capabilities = owners.clone();
            capabilities.sort();
            MultiplyListed {
                enabler: *enabler,
                capabilities,
            }
        })
        .collect();
    multiply_listed.sort_by_key(|m| m.enabler);
    report.multiply_listed = multiply_listed;

    for (enabler_id, enabler) in &enablers {
        let Some(cap_id) = enabler.capability_id else {
            continue;
        };
        if !capabilities.contains_key(&cap_id) {
            continue;
        }
        let listed = listed_in.get(enabler_id).is_some_and(|owners| owners.contains(&cap_id));
        if !listed {
            report.missing_rows.push(MissingRow {
                enabler: *enabler_id,
                capability: cap_id,
            });
        }
    }

    log::info!(
        "Audited {} documents, {} issues",
        report.documents,
        report.issue_count()
    );
    Ok(report)
}
