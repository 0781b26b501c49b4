// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Attribute Reconciler (C3): push only the attributes that changed since
// the last accepted set (spec §4.3).

use ipp::prelude::*;
use ipproxy_core::{ProxyError, Result};
use tracing::{debug, info};

use crate::capabilities::{attrs_equal, AttrValue, AttributeSet, TRACKED_ATTRIBUTES};
use crate::session::Session;
use crate::wire::{self, opcode};

/// Diff `new` against `previous` and return only the entries that changed
/// under the §4.3 equality rule, restricted to the tracked allowlist.
pub fn diff(new: &AttributeSet, previous: &AttributeSet) -> Vec<(String, AttrValue)> {
    TRACKED_ATTRIBUTES
        .iter()
        .filter_map(|name| {
            let new_value = new.get(*name);
            new_value?;
            if attrs_equal(new_value, previous.get(*name)) {
                None
            } else {
                Some(((*name).to_string(), new_value.unwrap().clone()))
            }
        })
        .collect()
}

/// Push `changed` via `Update-Output-Device-Attributes` if non-empty.
/// Returns `Ok(true)` if a request was sent.
pub async fn reconcile(
    session: &Session,
    device_uuid: &str,
    requesting_user_name: &str,
    changed: &[(String, AttrValue)],
) -> Result<bool> {
    if changed.is_empty() {
        debug!("no attribute deltas, skipping Update-Output-Device-Attributes");
        return Ok(false);
    }

    let mut req = wire::infra_request(
        opcode::UPDATE_OUTPUT_DEVICE_ATTRIBUTES,
        session.uri(),
        device_uuid,
        requesting_user_name,
    );
    for (name, value) in changed {
        req.attributes_mut().add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new(name.clone(), to_ipp_value(value)),
        );
    }

    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Update-Output-Device-Attributes".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    info!(count = changed.len(), "pushed attribute deltas to infrastructure");
    Ok(true)
}

fn to_ipp_value(value: &AttrValue) -> IppValue {
    match value {
        AttrValue::Integer(xs) if xs.len() == 1 => IppValue::Integer(xs[0]),
        AttrValue::Integer(xs) => IppValue::Array(xs.iter().copied().map(IppValue::Integer).collect()),
        AttrValue::Boolean(xs) if xs.len() == 1 => IppValue::Boolean(xs[0]),
        AttrValue::Boolean(xs) => IppValue::Array(xs.iter().copied().map(IppValue::Boolean).collect()),
        AttrValue::Strings(xs) if xs.len() == 1 => IppValue::Keyword(xs[0].clone()),
        AttrValue::Strings(xs) => {
            IppValue::Array(xs.iter().cloned().map(IppValue::Keyword).collect())
        }
        AttrValue::Resolutions(xs) if xs.len() == 1 => IppValue::Resolution {
            cross_feed: xs[0].0,
            feed: xs[0].1,
            units: ipp::model::ResolutionUnit::DotsPerInch,
        },
        AttrValue::Resolutions(xs) => IppValue::Array(
            xs.iter()
                .map(|(cross_feed, feed)| IppValue::Resolution {
                    cross_feed: *cross_feed,
                    feed: *feed,
                    units: ipp::model::ResolutionUnit::DotsPerInch,
                })
                .collect(),
        ),
        AttrValue::Other => IppValue::Keyword(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_changes_when_sets_are_equal() {
        let mut a = AttributeSet::new();
        a.insert("media-supported".into(), AttrValue::Strings(vec!["iso_a4".into()]));
        let b = a.clone();
        let deltas = diff(&a, &b);
        assert!(deltas.is_empty());
    }

    #[test]
    fn missing_from_previous_counts_as_changed() {
        let mut new = AttributeSet::new();
        new.insert("media-supported".into(), AttrValue::Strings(vec!["iso_a4".into()]));
        let previous = AttributeSet::new();
        let deltas = diff(&new, &previous);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].0, "media-supported");
    }

    #[test]
    fn changed_value_is_included() {
        let mut new = AttributeSet::new();
        new.insert("sides-supported".into(), AttrValue::Strings(vec!["one-sided".into()]));
        let mut previous = AttributeSet::new();
        previous.insert(
            "sides-supported".into(),
            AttrValue::Strings(vec!["one-sided".into(), "two-sided-long-edge".into()]),
        );
        let deltas = diff(&new, &previous);
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn untracked_attribute_names_are_ignored() {
        let mut new = AttributeSet::new();
        new.insert("some-vendor-attribute".into(), AttrValue::Strings(vec!["x".into()]));
        let previous = AttributeSet::new();
        let deltas = diff(&new, &previous);
        assert!(deltas.is_empty());
    }
}
