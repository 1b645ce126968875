//! Static validation of bundle declarations.

use std::collections::BTreeSet;

use crate::ident::is_valid_resource_id;
use crate::{Error, Result};
use api::v1alpha1::ResourceSpec;

/// Validate_bundle checks the declaration rules that hold before any graph
/// work: every id matches the id grammar and no id repeats.
///
/// Reference resolution against the declared ids is the order builder's job;
/// this only rejects bundles whose declarations cannot be addressed at all.
pub fn validate_bundle(specs: &[ResourceSpec]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for spec in specs {
        if !is_valid_resource_id(&spec.id) {
            return Err(Error::InvalidResourceId(spec.id.clone()));
        }
        if !seen.insert(spec.id.as_str()) {
            return Err(Error::DuplicateResourceId(spec.id.clone()));
        }
    }
    Ok(())
}
