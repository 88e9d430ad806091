//! Infrastructure join: attaches per-street property counts to permits.
//!
//! Property counts come from the USRN→UPRN link table. A street with no
//! links keeps whatever count the permit source supplied (zero for most
//! extracts).

use std::collections::BTreeMap;

use street_impact_permit_models::PermitRecord;

/// Overwrites each permit's property count with the linked count for its
/// street, where one exists. Returns how many permits were matched.
pub fn attach_property_counts(
    permits: &mut [PermitRecord],
    property_counts: &BTreeMap<String, u32>,
) -> usize {
    let mut matched = 0;
    for permit in permits.iter_mut() {
        if let Some(count) = property_counts.get(&permit.usrn) {
            permit.property_count = *count;
            matched += 1;
        }
    }

    log::debug!(
        "Attached property counts to {matched} of {} permits",
        permits.len()
    );

    matched
}
