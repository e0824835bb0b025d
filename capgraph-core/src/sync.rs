//! Dependency graph synchronizer
//!
//! A capability declares its own upstream (depends-on) and downstream (impact)
//! edges. After it is saved, every other capability is patched so that
//! `A downstream B` holds exactly when `B upstream A` does.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::codec;
use crate::error::Result;
use crate::models::{
    document_id, DependencyEdge, IdPrefix, Identifier, DOWNSTREAM_HEADING, UPSTREAM_HEADING,
};
use crate::repository::DocumentRepository;

/// What a synchronization pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Capabilities whose documents were rewritten
    pub updated: Vec<Identifier>,
    /// Peers left untouched because their tables could not be patched
    pub skipped: Vec<(PathBuf, String)>,
    /// Declared edges naming capabilities that are not in the corpus
    pub unresolved: Vec<Identifier>,
}

pub struct DependencySynchronizer<'a> {
    repo: &'a DocumentRepository,
}

impl<'a> DependencySynchronizer<'a> {
    pub fn new(repo: &'a DocumentRepository) -> Self {
        Self { repo }
    }

    /// Mirrors the edges declared by `capability_id` onto every other capability
    pub fn synchronize(
        &self,
        capability_id: &Identifier,
        upstream: &[DependencyEdge],
        downstream: &[DependencyEdge],
    ) -> Result<SyncReport> {
        let upstream = normalize_edges(capability_id, upstream);
        let downstream = normalize_edges(capability_id, downstream);
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        for (path, text) in self.repo.scan_texts()? {
            let Ok(target) = document_id(&text) else {
                continue;
            };
            if target.prefix != IdPrefix::Capability || target == *capability_id {
                continue;
            }
            seen.insert(target);

            // This capability depends on us: it must list us upstream
            let wanted_upstream = find_edge(&downstream, &target);
            // We depend on this capability: it must list us as impact
            let wanted_downstream = find_edge(&upstream, &target);

            let result = self.repo.update(&path, |current| {
                let patched = mirror_row(current, UPSTREAM_HEADING, capability_id, wanted_upstream)?;
                mirror_row(&patched, DOWNSTREAM_HEADING, capability_id, wanted_downstream)
            });

            match result {
                Ok(true) => {
                    log::info!("Synchronized {} edges into {}", capability_id, target);
                    report.updated.push(target);
                }
                Ok(false) => {}
                Err(e) if e.is_recoverable() => {
                    log::warn!("Skipping {} ({}): {}", target, path.display(), e);
                    report.skipped.push((path, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        report.unresolved = upstream
            .iter()
            .chain(downstream.iter())
            .map(|edge| edge.capability_id)
            .filter(|id| !seen.contains(id))
            .collect::<Vec<_>>();
        report.unresolved.sort();
        report.unresolved.dedup();
        for id in &report.unresolved {
            log::warn!("{} declares an edge to {}, which is not in the corpus", capability_id, id);
        }

        Ok(report)
    }
}

/// Drops self-edges, non-capability targets and repeated targets (first wins)
fn normalize_edges(capability_id: &Identifier, edges: &[DependencyEdge]) -> Vec<DependencyEdge> {
    let mut seen = HashSet::new();
    edges
        .iter()
        .filter(|edge| {
            if edge.capability_id == *capability_id {
                log::warn!("Ignoring self-dependency declared by {}", capability_id);
                return false;
            }
            edge.capability_id.prefix == IdPrefix::Capability && seen.insert(edge.capability_id)
        })
        .cloned()
        .collect()
}

fn find_edge<'e>(edges: &'e [DependencyEdge], target: &Identifier) -> Option<&'e DependencyEdge> {
    edges.iter().find(|edge| edge.capability_id == *target)
}

/// Brings the row for `source` in one of `text`'s dependency tables in line
/// with `wanted`.
///
/// Wanted and present: kept with its existing description, duplicates collapsed.
/// Wanted and absent: inserted. Unwanted: removed. A missing table is only an
/// error when there is something to change.
fn mirror_row(
    text: &str,
    heading: &str,
    source: &Identifier,
    wanted: Option<&DependencyEdge>,
) -> Result<String> {
    let key = source.to_string();
    let present = match codec::extract_table(text, heading) {
        Ok(rows) => rows.iter().any(|row| row.key() == key),
        Err(_) if wanted.is_none() => return Ok(text.to_string()),
        Err(e) => return Err(e),
    };

    match (wanted, present) {
        (Some(_), true) => codec::dedupe_table_rows(text, heading, &key),
        (Some(edge), false) => {
            codec::upsert_table_row(text, heading, &key, &[edge.description.clone()])
        }
        (None, true) => codec::remove_table_row(text, heading, &key),
        (None, false) => Ok(text.to_string()),
    }
}
