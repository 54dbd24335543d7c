//! Metadata reconciliation
//!
//! Computes the tags and extras a dataset should end up with, given what the
//! catalog holds now and a [`DatasetPatch`]. Pure: no I/O, no clock.
//!
//! - Merge: tags are unioned; patch extras overwrite same-key current extras
//!   and every other current extra is kept.
//! - Replace: tags and extras are exactly the patch's.
//!
//! In both modes the title only changes when the patch carries one.

use crate::ckan::types::CkanExtra;
use std::collections::{BTreeMap, BTreeSet};
use upstream_common::types::{DatasetPatch, PatchMode};
use upstream_common::{Result, UpstreamError};

/// Largest serialized extras list accepted, in bytes.
///
/// Extras are indexed as a single search-index term, and the index rejects
/// terms longer than this.
pub const MAX_EXTRAS_JSON_BYTES: usize = 32_766;

/// Metadata to write back to the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledMetadata {
    pub tags: BTreeSet<String>,
    pub extras: BTreeMap<String, String>,
    /// `None` leaves the current title untouched
    pub title: Option<String>,
}

/// Reconcile current dataset metadata with a patch.
///
/// Fails with [`UpstreamError::ExtrasTooLarge`] when the resulting extras
/// would exceed [`MAX_EXTRAS_JSON_BYTES`]; nothing is truncated.
pub fn reconcile(
    current_tags: &BTreeSet<String>,
    current_extras: &BTreeMap<String, String>,
    patch: &DatasetPatch,
) -> Result<ReconciledMetadata> {
    let (tags, extras) = match patch.mode {
        PatchMode::Merge => {
            let tags = current_tags.union(&patch.tags).cloned().collect();
            let mut extras = current_extras.clone();
            extras.extend(patch.extras.iter().map(|(k, v)| (k.clone(), v.clone())));
            (tags, extras)
        },
        PatchMode::Replace => (patch.tags.clone(), patch.extras.clone()),
    };

    check_extras_size(&extras, MAX_EXTRAS_JSON_BYTES)?;

    Ok(ReconciledMetadata {
        tags,
        extras,
        title: patch.title.clone(),
    })
}

/// Reject extras whose serialized `[{"key":..,"value":..},...]` form exceeds `limit`.
///
/// The error names the fewest largest entries whose removal would bring the
/// total back under the limit.
pub fn check_extras_size(extras: &BTreeMap<String, String>, limit: usize) -> Result<()> {
    let mut sizes = extras
        .iter()
        .map(|(key, value)| {
            let entry = CkanExtra {
                key: key.clone(),
                value: value.clone(),
            };
            serde_json::to_vec(&entry).map(|bytes| (key.clone(), bytes.len()))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let total = list_len(sizes.iter().map(|(_, len)| *len));
    if total <= limit {
        return Ok(());
    }

    // Largest first; ties broken by key so the report is stable
    sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut keys = Vec::new();
    while list_len(sizes.iter().map(|(_, len)| *len)) > limit && !sizes.is_empty() {
        let (key, _) = sizes.remove(0);
        keys.push(key);
    }

    tracing::warn!(total_bytes = total, limit, keys = ?keys, "Extras exceed size limit");

    Err(UpstreamError::ExtrasTooLarge {
        keys,
        total_bytes: total,
        limit,
    })
}

/// Length of a compact JSON array holding entries of the given lengths
fn list_len(entries: impl Iterator<Item = usize>) -> usize {
    let (count, sum) = entries.fold((0usize, 0usize), |(count, sum), len| (count + 1, sum + len));
    2 + sum + count.saturating_sub(1)
}
