// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Deterministic URN UUID derivation from a device URI (spec §4.1).

use sha2::{Digest, Sha256};

/// Derive a stable `urn:uuid:` string from `device_uri`.
///
/// If `device_uri` is empty, `file://<hostname>/dev/null` is substituted
/// first. The UUID is built from bytes 16..31 of SHA-256(uri), with the
/// version nibble forced to 3 and the variant bits forced to `10` so the
/// result is a valid RFC 4122 UUID — a naive hex dump of the digest bytes
/// would not be.
pub fn device_uuid(device_uri: &str, local_hostname: &str) -> String {
    let subject = if device_uri.is_empty() {
        format!("file://{local_hostname}/dev/null")
    } else {
        device_uri.to_string()
    };

    let digest = Sha256::digest(subject.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[16..32]);

    // Version 3 occupies bits 12-15 of time_hi_and_version (byte 6's high nibble).
    bytes[6] = (bytes[6] & 0x0F) | 0x30;
    // Variant 10 occupies the top two bits of clock_seq_hi_and_reserved (byte 8).
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    format!(
        "urn:uuid:{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let a = device_uuid("ipp://printer.local:631/ipp/print", "host1");
        let b = device_uuid("ipp://printer.local:631/ipp/print", "host1");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_uri() {
        let a = device_uuid("ipp://printer.local:631/ipp/print", "host1");
        let b = device_uuid("socket://printer.local:9100", "host1");
        assert_ne!(a, b);
    }

    #[test]
    fn has_version_3_and_variant_bits() {
        let uuid = device_uuid("ipp://printer.local:631/ipp/print", "host1");
        let hex_only: String = uuid.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let raw = hex::decode(&hex_only).unwrap();
        assert_eq!(raw[6] >> 4, 3);
        assert_eq!(raw[8] >> 6, 0b10);
    }

    #[test]
    fn empty_uri_substitutes_dev_null() {
        let a = device_uuid("", "myhost");
        let b = device_uuid("file://myhost/dev/null", "myhost");
        assert_eq!(a, b);
    }
}
