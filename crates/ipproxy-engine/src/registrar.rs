// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Registrar (C2): open the infrastructure session, perform system-level
// registration if needed, and create the pull subscription.

use ipp::prelude::*;
use ipproxy_core::{ProxyError, Result};
use tracing::{info, warn};

use crate::context::{ProxyContext, ShutdownFlag};
use crate::session::Session;
use crate::wire::{self, opcode};

/// The seven event kinds C4 subscribes to (spec §4.2 step 3).
const SUBSCRIBED_EVENTS: &[&str] = &[
    "document-config-changed",
    "document-state-changed",
    "job-config-changed",
    "job-fetchable",
    "job-state-changed",
    "printer-config-changed",
    "printer-state-changed",
];

/// Outcome of a successful registration: a live session bound to the
/// (possibly replaced) printer URI, and the allocated subscription id.
pub struct Registration {
    pub session: Session,
    pub subscription_id: i32,
}

/// Run C2's full procedure: connect, optionally register the output
/// device against a system URI, then create the pull subscription.
///
/// Returns `None` only if `done` was set before a session could be
/// opened; any other failure is returned as `Err` and is fatal at
/// registration time per spec §7.
pub async fn register(ctx: &ProxyContext, done: &ShutdownFlag) -> Result<Option<Registration>> {
    let printer_uri = ctx.printer_uri().await;
    let Some(mut session) = Session::open(printer_uri.clone(), done).await else {
        return Ok(None);
    };

    if printer_uri.path() == "/ipp/system" {
        let xri = register_output_device(&session, ctx).await?;
        info!(xri = %xri, "system registration resolved concrete printer URI");
        ctx.set_printer_uri(xri.clone()).await;
        let Some(replacement) = Session::open(xri, done).await else {
            return Ok(None);
        };
        session = replacement;
    }

    let subscription_id = create_subscriptions(&session, ctx).await?;
    Ok(Some(Registration { session, subscription_id }))
}

async fn register_output_device(session: &Session, ctx: &ProxyContext) -> Result<Uri> {
    let mut req = wire::infra_request(
        opcode::REGISTER_OUTPUT_DEVICE,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_keyword(
        &mut req,
        DelimiterTag::OperationAttributes,
        "system-uri",
        &session.uri().to_string(),
    );
    wire::add_keyword(
        &mut req,
        DelimiterTag::OperationAttributes,
        "printer-service-type",
        "print",
    );

    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Register-Output-Device".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    extract_xri_uri(&response).ok_or_else(|| {
        ProxyError::MalformedAttributes(
            "Register-Output-Device response missing printer-xri-supported[0].xri-uri".into(),
        )
    })
}

/// Pull the first `xri-uri` out of `printer-xri-supported`. The `ipp`
/// crate's collection representation isn't load-bearing here: this reads
/// the attribute's rendered text and looks for the `xri-uri=` member,
/// which survives regardless of how a collection value formats itself.
fn extract_xri_uri(response: &IppRequestResponse) -> Option<Uri> {
    for group in response.attributes().groups_of(DelimiterTag::PrinterAttributes) {
        if let Some(attr) = group.attributes().get("printer-xri-supported") {
            let rendered = format!("{}", attr.value());
            if let Some(uri_str) = extract_member(&rendered, "xri-uri") {
                if let Ok(uri) = uri_str.parse::<Uri>() {
                    return Some(uri);
                }
            }
        }
    }
    None
}

fn extract_member(rendered: &str, member: &str) -> Option<String> {
    let needle = format!("{member}=");
    let start = rendered.find(&needle)? + needle.len();
    let rest = &rendered[start..];
    let end = rest
        .find([',', ';', '}'])
        .unwrap_or(rest.len());
    Some(rest[..end].trim_matches(['"', ' ']).to_string())
}

async fn create_subscriptions(session: &Session, ctx: &ProxyContext) -> Result<i32> {
    let mut req = wire::infra_request(
        opcode::CREATE_PRINTER_SUBSCRIPTIONS,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_keyword(&mut req, DelimiterTag::OperationAttributes, "notify-pull-method", "ippget");
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "notify-lease-duration", 0);
    req.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "notify-events",
            IppValue::Array(
                SUBSCRIBED_EVENTS
                    .iter()
                    .map(|e| IppValue::Keyword(e.to_string()))
                    .collect(),
            ),
        ),
    );

    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Create-Printer-Subscriptions".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    for group in response.attributes().groups_of(DelimiterTag::OperationAttributes) {
        if let Some(attr) = group.attributes().get("notify-subscription-id") {
            if let IppValue::Integer(id) = attr.value() {
                return Ok(*id);
            }
        }
    }

    Err(ProxyError::MalformedAttributes(
        "Create-Printer-Subscriptions response missing notify-subscription-id".into(),
    ))
}

/// Deregistration at shutdown: cancel the subscription, then deregister
/// the output device. Best-effort — failures are logged, never fatal
/// (spec §7 "signal-driven shutdown").
pub async fn deregister(session: &Session, ctx: &ProxyContext, subscription_id: i32) {
    let mut cancel = wire::infra_request(
        opcode::CANCEL_SUBSCRIPTION,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(
        &mut cancel,
        DelimiterTag::OperationAttributes,
        "notify-subscription-id",
        subscription_id,
    );
    if let Err(err) = session.send(cancel).await {
        warn!(error = %err, "Cancel-Subscription failed during shutdown");
    }

    let deregister = wire::infra_request(
        opcode::DEREGISTER_OUTPUT_DEVICE,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    if let Err(err) = session.send(deregister).await {
        warn!(error = %err, "Deregister-Output-Device failed during shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_member_finds_quoted_value() {
        let rendered = r#"{xri-uri="ipp://printer.example/ipp/print", xri-authentication=none}"#;
        let found = extract_member(rendered, "xri-uri");
        assert_eq!(found.as_deref(), Some("ipp://printer.example/ipp/print"));
    }

    #[test]
    fn extract_member_returns_none_when_absent() {
        let rendered = "{xri-authentication=none}";
        assert!(extract_member(rendered, "xri-uri").is_none());
    }
}
