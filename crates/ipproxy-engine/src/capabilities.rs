// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Capability Probe (C1): query or synthesize the local output device's
// attribute set, then reconcile the URF/PWG-Raster dialect gap.

use std::collections::BTreeMap;

use ipp::prelude::*;
use ipproxy_core::{ProxyError, Result};
use tracing::{debug, instrument, warn};

/// The fixed set of printer attributes C1 asks for and C3 tracks for
/// delta comparison — spec §4.1 and §4.3 share this list.
pub const TRACKED_ATTRIBUTES: &[&str] = &[
    "media-supported",
    "media-col-database",
    "document-format-supported",
    "sides-supported",
    "print-quality-supported",
    "print-color-mode-supported",
    "pwg-raster-document-resolution-supported",
    "pwg-raster-document-sheet-back",
    "pwg-raster-document-type-supported",
    "printer-resolution-supported",
    "urf-supported",
    "printer-darkness-supported",
    "printer-darkness-configured",
    "printer-state",
];

/// A value in the closed tag set spec §9 names: integer, boolean, string
/// (keyword/text/uri/mimeMediaType collapsed — they differ only in how a
/// client would render them, not in comparison semantics here), resolution
/// (dpi pairs), collection (e.g. `media-col-database`, compared structurally
/// via a sorted canonical rendering of its members), or "other" — any tag
/// C1 doesn't otherwise model, which §4.3 says must never compare equal.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Integer(Vec<i32>),
    Boolean(Vec<bool>),
    Strings(Vec<String>),
    Resolutions(Vec<(i32, i32)>),
    Collection(Vec<String>),
    Other,
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Strings(a), Self::Strings(b)) => a == b,
            (Self::Resolutions(a), Self::Resolutions(b)) => a == b,
            (Self::Collection(a), Self::Collection(b)) => a == b,
            // "Other" never proves equal — the conservative default of §4.3.
            _ => false,
        }
    }
}

pub type AttributeSet = BTreeMap<String, AttrValue>;

/// Probe `device_uri` for its attribute set (C1 entry point). Dispatches on
/// scheme: `ipp`/`ipps` queries the device, `socket` synthesizes a default
/// laser profile (spec §4.1).
#[instrument(skip(uri))]
pub async fn probe(uri: &Uri, scheme: ipproxy_core::DeviceScheme) -> AttributeSet {
    use ipproxy_core::DeviceScheme;
    match scheme {
        DeviceScheme::Ipp | DeviceScheme::Ipps => match query_device(uri).await {
            Ok(attrs) => reconcile_dialect(attrs),
            Err(err) => {
                warn!(error = %err, "capability probe failed, using empty attribute set");
                AttributeSet::new()
            }
        },
        DeviceScheme::Socket => default_laser_profile(),
    }
}

/// Issue `Get-Printer-Attributes` restricted to [`TRACKED_ATTRIBUTES`].
/// A status >= client-error discards the response (empty set), per §4.1.
async fn query_device(uri: &Uri) -> Result<AttributeSet> {
    let mut operation = IppOperationBuilder::get_printer_attributes(uri.clone()).build();
    operation.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "requested-attributes",
            IppValue::Array(
                TRACKED_ATTRIBUTES
                    .iter()
                    .map(|name| IppValue::Keyword(name.to_string()))
                    .collect(),
            ),
        ),
    );
    let client = AsyncIppClient::new(uri.clone());

    debug!("sending Get-Printer-Attributes (capability probe)");
    let response = client.send(operation).await.map_err(|e| ProxyError::Connect {
        uri: uri.to_string(),
        detail: e.to_string(),
    })?;

    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Get-Printer-Attributes".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    Ok(parse_attribute_set(&response))
}

fn parse_attribute_set(response: &IppRequestResponse) -> AttributeSet {
    let mut set = AttributeSet::new();
    for group in response.attributes().groups_of(DelimiterTag::PrinterAttributes) {
        for (name, attr) in group.attributes() {
            if !TRACKED_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            set.insert(name.clone(), classify_value(attr.value()));
        }
    }
    set
}

fn classify_value(value: &IppValue) -> AttrValue {
    match value {
        IppValue::Integer(i) => AttrValue::Integer(vec![*i]),
        IppValue::Boolean(b) => AttrValue::Boolean(vec![*b]),
        IppValue::Keyword(s) | IppValue::TextWithoutLanguage(s) | IppValue::Uri(s)
        | IppValue::MimeMediaType(s) => AttrValue::Strings(vec![s.clone()]),
        IppValue::Resolution { cross_feed, feed, .. } => {
            AttrValue::Resolutions(vec![(*cross_feed, *feed)])
        }
        IppValue::Collection(members) => AttrValue::Collection(canonical_collection(members)),
        IppValue::Array(values) => {
            // Multi-valued attribute: classify the first element and fold
            // the rest into the same variant; heterogeneous arrays fall
            // back to `Other`.
            let mut iter = values.iter().map(classify_value);
            match iter.next() {
                Some(first) => iter.fold(Some(first), |acc, next| match (acc, next) {
                    (Some(AttrValue::Integer(mut xs)), AttrValue::Integer(ys)) => {
                        xs.extend(ys);
                        Some(AttrValue::Integer(xs))
                    }
                    (Some(AttrValue::Boolean(mut xs)), AttrValue::Boolean(ys)) => {
                        xs.extend(ys);
                        Some(AttrValue::Boolean(xs))
                    }
                    (Some(AttrValue::Strings(mut xs)), AttrValue::Strings(ys)) => {
                        xs.extend(ys);
                        Some(AttrValue::Strings(xs))
                    }
                    (Some(AttrValue::Resolutions(mut xs)), AttrValue::Resolutions(ys)) => {
                        xs.extend(ys);
                        Some(AttrValue::Resolutions(xs))
                    }
                    (Some(AttrValue::Collection(mut xs)), AttrValue::Collection(ys)) => {
                        xs.extend(ys);
                        xs.sort();
                        Some(AttrValue::Collection(xs))
                    }
                    _ => Some(AttrValue::Other),
                })
                .unwrap_or(AttrValue::Other),
                None => AttrValue::Other,
            }
        }
        _ => AttrValue::Other,
    }
}

/// Render a collection's members as a sorted, stable list of `name=value`
/// strings, so two probes of the same collection compare structurally
/// equal regardless of wire-level member ordering (spec §4.3, §8).
fn canonical_collection(members: &[IppValue]) -> Vec<String> {
    let mut rendered: Vec<String> = members.iter().map(|v| format!("{v:?}")).collect();
    rendered.sort();
    rendered
}

/// Fill in PWG Raster attributes absent from the probed set but derivable
/// from `urf-supported` (spec §4.1).
fn reconcile_dialect(mut attrs: AttributeSet) -> AttributeSet {
    let urf_tokens: Vec<String> = match attrs.get("urf-supported") {
        Some(AttrValue::Strings(tokens)) => tokens.clone(),
        _ => return attrs,
    };

    if !attrs.contains_key("pwg-raster-document-resolution-supported") {
        let resolutions: Vec<(i32, i32)> = urf_tokens
            .iter()
            .filter_map(|t| t.strip_prefix("RS"))
            .flat_map(|rest| rest.split('-'))
            .filter_map(|n| n.parse::<i32>().ok())
            .map(|r| (r, r))
            .collect();
        if !resolutions.is_empty() {
            attrs.insert(
                "pwg-raster-document-resolution-supported".into(),
                AttrValue::Resolutions(resolutions),
            );
        }
    }

    if !attrs.contains_key("pwg-raster-document-sheet-back") {
        if let Some(dm_token) = urf_tokens.iter().find(|t| t.starts_with("DM")) {
            let sheet_back = match dm_token.as_str() {
                "DM1" => "normal",
                "DM2" => "flipped",
                "DM3" => "rotated",
                _ => "manual-tumble",
            };
            attrs.insert(
                "pwg-raster-document-sheet-back".into(),
                AttrValue::Strings(vec![sheet_back.to_string()]),
            );
        }
    }

    if !attrs.contains_key("pwg-raster-document-type-supported") {
        let types: Vec<String> = urf_tokens
            .iter()
            .filter_map(|t| urf_color_token_to_pwg(t))
            .map(str::to_string)
            .collect();
        if !types.is_empty() {
            attrs.insert(
                "pwg-raster-document-type-supported".into(),
                AttrValue::Strings(types),
            );
        }
    }

    attrs
}

fn urf_color_token_to_pwg(token: &str) -> Option<&'static str> {
    match token {
        "ADOBERGB24" => Some("adobe-rgb_8"),
        "ADOBERGB48" => Some("adobe-rgb_16"),
        "SRGB24" => Some("srgb_8"),
        "W8" => Some("sgray_8"),
        "W16" => Some("sgray_16"),
        _ => None,
    }
}

/// Default laser profile synthesized for `socket://` devices (spec §4.1).
fn default_laser_profile() -> AttributeSet {
    let mut attrs = AttributeSet::new();
    attrs.insert(
        "document-format-supported".into(),
        AttrValue::Strings(vec!["application/vnd.hp-pcl".into()]),
    );
    attrs.insert(
        "media-supported".into(),
        AttrValue::Strings(vec![
            "na_letter_8.5x11in".into(),
            "na_legal_8.5x14in".into(),
            "iso_a4_210x297mm".into(),
        ]),
    );
    attrs.insert(
        "print-quality-supported".into(),
        AttrValue::Strings(vec!["draft".into(), "normal".into(), "high".into()]),
    );
    attrs.insert(
        "printer-resolution-supported".into(),
        AttrValue::Resolutions(vec![(300, 300), (600, 600)]),
    );
    attrs.insert(
        "sides-supported".into(),
        AttrValue::Strings(vec![
            "one-sided".into(),
            "two-sided-long-edge".into(),
            "two-sided-short-edge".into(),
        ]),
    );
    attrs.insert(
        "print-color-mode-supported".into(),
        AttrValue::Strings(vec!["monochrome".into()]),
    );
    attrs.insert(
        "printer-state".into(),
        AttrValue::Strings(vec!["idle".into()]),
    );
    attrs.insert("media-col-database".into(), AttrValue::Collection(default_media_col()));
    attrs
}

/// Letter, 215.9x279.4mm with uniform 6.35mm margins (spec §4.1), rendered
/// in PWG hundredths-of-a-millimeter as a canonical, sorted member list.
fn default_media_col() -> Vec<String> {
    let mut members = vec![
        "media-size.x-dimension=21590".to_string(),
        "media-size.y-dimension=27940".to_string(),
        "media-top-margin=635".to_string(),
        "media-bottom-margin=635".to_string(),
        "media-left-margin=635".to_string(),
        "media-right-margin=635".to_string(),
    ];
    members.sort();
    members
}

/// Equality per spec §4.3: both present/absent, same tag (variant), same
/// count, element-wise equal. `Other` never compares equal, even to
/// itself — the conservative default the spec requires.
pub fn attrs_equal(a: Option<&AttrValue>, b: Option<&AttrValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(AttrValue::Other), _) | (_, Some(AttrValue::Other)) => false,
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urf_rs_token_yields_two_resolutions() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "urf-supported".into(),
            AttrValue::Strings(vec!["RS600-1200".into()]),
        );
        let reconciled = reconcile_dialect(attrs);
        assert_eq!(
            reconciled.get("pwg-raster-document-resolution-supported"),
            Some(&AttrValue::Resolutions(vec![(600, 600), (1200, 1200)]))
        );
    }

    #[test]
    fn dm_token_maps_to_sheet_back() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "urf-supported".into(),
            AttrValue::Strings(vec!["DM2".into()]),
        );
        let reconciled = reconcile_dialect(attrs);
        assert_eq!(
            reconciled.get("pwg-raster-document-sheet-back"),
            Some(&AttrValue::Strings(vec!["flipped".into()]))
        );
    }

    #[test]
    fn unrecognized_dm_token_falls_back_to_manual_tumble() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "urf-supported".into(),
            AttrValue::Strings(vec!["DM9".into()]),
        );
        let reconciled = reconcile_dialect(attrs);
        assert_eq!(
            reconciled.get("pwg-raster-document-sheet-back"),
            Some(&AttrValue::Strings(vec!["manual-tumble".into()]))
        );
    }

    #[test]
    fn color_tokens_mapped_ignoring_unrecognized() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "urf-supported".into(),
            AttrValue::Strings(vec!["SRGB24".into(), "BOGUS".into(), "W8".into()]),
        );
        let reconciled = reconcile_dialect(attrs);
        assert_eq!(
            reconciled.get("pwg-raster-document-type-supported"),
            Some(&AttrValue::Strings(vec!["srgb_8".into(), "sgray_8".into()]))
        );
    }

    #[test]
    fn existing_pwg_attributes_are_not_overwritten() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "urf-supported".into(),
            AttrValue::Strings(vec!["RS600".into()]),
        );
        attrs.insert(
            "pwg-raster-document-resolution-supported".into(),
            AttrValue::Resolutions(vec![(1, 1)]),
        );
        let reconciled = reconcile_dialect(attrs);
        assert_eq!(
            reconciled.get("pwg-raster-document-resolution-supported"),
            Some(&AttrValue::Resolutions(vec![(1, 1)]))
        );
    }

    #[test]
    fn socket_profile_is_monochrome_and_pcl() {
        let profile = default_laser_profile();
        assert_eq!(
            profile.get("document-format-supported"),
            Some(&AttrValue::Strings(vec!["application/vnd.hp-pcl".into()]))
        );
        assert_eq!(
            profile.get("print-color-mode-supported"),
            Some(&AttrValue::Strings(vec!["monochrome".into()]))
        );
    }

    #[test]
    fn other_tag_never_compares_equal() {
        assert!(!attrs_equal(Some(&AttrValue::Other), Some(&AttrValue::Other)));
    }

    #[test]
    fn absent_on_both_sides_is_equal() {
        assert!(attrs_equal(None, None));
    }

    #[test]
    fn socket_profile_carries_letter_media_col_database() {
        let profile = default_laser_profile();
        assert_eq!(
            profile.get("media-col-database"),
            Some(&AttrValue::Collection(default_media_col()))
        );
    }

    #[test]
    fn repeated_collection_probes_compare_equal() {
        // §8 idempotence: two successive probes of the same collection-typed
        // attribute must yield zero reconciliation pushes after the first.
        let a = default_laser_profile();
        let b = default_laser_profile();
        assert!(attrs_equal(a.get("media-col-database"), b.get("media-col-database")));
    }

    #[test]
    fn collection_value_classifies_structurally_not_as_other() {
        let value = IppValue::Collection(vec![IppValue::Integer(21590), IppValue::Integer(27940)]);
        assert!(matches!(classify_value(&value), AttrValue::Collection(_)));
    }
}
