use crate::model::{Property, PropertyKind, SignalSet};
use std::collections::BTreeSet;

/// Union one signal category across both sets, dropping blanks and duplicates.
fn union<'a>(
    from_files: &'a SignalSet,
    from_retrieval: Option<&'a SignalSet>,
    pick: impl Fn(&'a SignalSet) -> &'a Vec<String>,
) -> BTreeSet<&'a str> {
    std::iter::once(from_files)
        .chain(from_retrieval)
        .flat_map(|set| pick(set).iter())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Turn one or two signal sets into an ordered property list.
///
/// Order across kinds is fixed: invariants, postconditions, relationships,
/// preconditions. Within a kind, entries are deduplicated. With no such
/// entries at all, falls back to one `description` property (file-based
/// description preferred); the result is empty only if both descriptions
/// are blank too.
pub fn derive_properties(from_files: &SignalSet, from_retrieval: Option<&SignalSet>) -> Vec<Property> {
    let ordered: [(PropertyKind, BTreeSet<&str>); 4] = [
        (
            PropertyKind::Invariant,
            union(from_files, from_retrieval, |s| &s.invariants),
        ),
        (
            PropertyKind::Postcondition,
            union(from_files, from_retrieval, |s| &s.postconditions),
        ),
        (
            PropertyKind::Relationship,
            union(from_files, from_retrieval, |s| &s.relationships),
        ),
        (
            PropertyKind::Precondition,
            union(from_files, from_retrieval, |s| &s.preconditions),
        ),
    ];

    let properties: Vec<Property> = ordered
        .into_iter()
        .flat_map(|(kind, entries)| entries.into_iter().map(move |e| Property::new(kind, e)))
        .collect();

    if !properties.is_empty() {
        return properties;
    }

    std::iter::once(from_files)
        .chain(from_retrieval)
        .map(|set| set.description.trim())
        .find(|d| !d.is_empty())
        .map(|d| vec![Property::new(PropertyKind::Description, d)])
        .unwrap_or_default()
}
