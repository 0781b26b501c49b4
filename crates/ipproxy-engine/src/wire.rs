// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Low-level IPP request construction for the PWG Shared Infrastructure
// Extension operations (Register-Output-Device, Get-Notifications,
// Fetch-Job, Acknowledge-Job, Fetch-Document, Acknowledge-Document,
// Update-Output-Device-Attributes, Update-Job-Status,
// Update-Document-Status, Acknowledge-Identify-Printer,
// Deregister-Output-Device) that `ipp::IppOperationBuilder` — built around
// RFC 8011's printer/job model — does not expose a typed constructor for.
//
// Grounded on the raw `IppRequestResponse`/`header_mut()` manipulation seen
// building *responses* by hand; applied here to requests instead by
// building a placeholder request and then overwriting its operation code.

use ipp::prelude::*;
use tracing::trace;

/// Operation codes from the IANA IPP Operations registry not present in
/// the `ipp` crate's `Operation` enum, which only models RFC 8011's core
/// set plus the subscription operations of RFC 3995.
pub mod opcode {
    pub const CREATE_PRINTER_SUBSCRIPTIONS: u16 = 0x0016;
    pub const CANCEL_SUBSCRIPTION: u16 = 0x001B;
    pub const GET_NOTIFICATIONS: u16 = 0x001C;
    pub const ACKNOWLEDGE_DOCUMENT: u16 = 0x0029;
    pub const ACKNOWLEDGE_IDENTIFY_PRINTER: u16 = 0x002A;
    pub const ACKNOWLEDGE_JOB: u16 = 0x002B;
    pub const FETCH_DOCUMENT: u16 = 0x002C;
    pub const FETCH_JOB: u16 = 0x002D;
    pub const DEREGISTER_OUTPUT_DEVICE: u16 = 0x0030;
    pub const UPDATE_DOCUMENT_STATUS: u16 = 0x0032;
    pub const UPDATE_JOB_STATUS: u16 = 0x0033;
    pub const UPDATE_OUTPUT_DEVICE_ATTRIBUTES: u16 = 0x0034;
    pub const REGISTER_OUTPUT_DEVICE: u16 = 0x003D;
}

/// Build a bare extension-operation request against `uri`, carrying the
/// standard charset/language operation attributes plus the three
/// attributes every infrastructure-bound request needs per spec §6:
/// `printer-uri`, `output-device-uuid`, `requesting-user-name`.
pub fn infra_request(
    opcode: u16,
    uri: &Uri,
    device_uuid: &str,
    requesting_user_name: &str,
) -> IppRequestResponse {
    // `Operation::GetPrinterAttributes` is a placeholder; the real
    // wire-level opcode is patched in immediately below. This is the
    // documented workaround for operations the `Operation` enum has no
    // variant for (DESIGN.md).
    let mut req = IppRequestResponse::new(
        IppVersion::v1_1(),
        Operation::GetPrinterAttributes,
        uri.clone(),
    );
    req.header_mut().operation_or_status = opcode;

    req.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "output-device-uuid",
            IppValue::Uri(device_uuid.to_string()),
        ),
    );
    req.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "requesting-user-name",
            IppValue::TextWithoutLanguage(requesting_user_name.to_string()),
        ),
    );

    trace!(opcode = format!("0x{opcode:04x}"), uri = %uri, "built infrastructure extension request");
    req
}

/// Add a keyword-valued attribute to a request's operation attributes
/// group (shared helper for the many single-keyword extension requests).
pub fn add_keyword(req: &mut IppRequestResponse, group: DelimiterTag, name: &str, value: &str) {
    req.attributes_mut()
        .add(group, IppAttribute::new(name, IppValue::Keyword(value.to_string())));
}

/// Add an integer-valued attribute.
pub fn add_integer(req: &mut IppRequestResponse, group: DelimiterTag, name: &str, value: i32) {
    req.attributes_mut()
        .add(group, IppAttribute::new(name, IppValue::Integer(value)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infra_request_carries_required_attributes() {
        let uri: Uri = "ipp://infra.example/ipp/system".parse().unwrap();
        let req = infra_request(
            opcode::REGISTER_OUTPUT_DEVICE,
            &uri,
            "urn:uuid:deadbeef-0000-3000-8000-000000000000",
            "ipproxy",
        );
        assert_eq!(req.header().operation_or_status, opcode::REGISTER_OUTPUT_DEVICE);
    }
}
