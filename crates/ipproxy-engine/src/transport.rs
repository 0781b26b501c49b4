// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Transport Adapter (C7): stream document bytes to the local output
// device, either a raw AppSocket TCP sink or an IPP(S) printer.

use std::collections::HashSet;
use std::time::Duration;

use ipp::prelude::*;
use ipproxy_core::{JobState, ProxyError, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Operation attributes copied verbatim from the fetched job onto the
/// local submission (spec §4.7).
pub const COPIED_OPERATION_ATTRIBUTES: &[&str] =
    &["job-name", "job-password", "job-password-encryption", "job-priority"];

/// Job-template attributes copied verbatim (spec §4.7).
pub const COPIED_JOB_TEMPLATE_ATTRIBUTES: &[&str] = &[
    "copies",
    "finishings",
    "finishings-col",
    "job-account-id",
    "job-accounting-user-id",
    "media",
    "media-col",
    "multiple-document-handling",
    "orientation-requested",
    "page-ranges",
    "print-color-mode",
    "print-quality",
    "sides",
];

const SOCKET_CONNECT_TIMEOUT_SECS: u64 = 30;
const SOCKET_CHUNK_SIZE: usize = 16 * 1024;
const LOCAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Attributes carried over from the infrastructure job, to be attached to
/// the local `Create-Job`/`Print-Job` request unchanged.
#[derive(Debug, Clone, Default)]
pub struct CopiedAttributes(pub Vec<(DelimiterTag, String, IppValue)>);

/// Stream `bytes` to a raw AppSocket sink at `host:port` in bounded
/// chunks, retrying short writes in place until the stream is exhausted
/// (spec §4.7 `socket://`).
pub async fn send_socket(host: &str, port: u16, bytes: &[u8]) -> Result<()> {
    let addr = format!("{host}:{port}");
    let mut stream = tokio::time::timeout(
        Duration::from_secs(SOCKET_CONNECT_TIMEOUT_SECS),
        TcpStream::connect(&addr),
    )
    .await
    .map_err(|_| ProxyError::Transport(format!("connect to {addr} timed out")))?
    .map_err(|e| ProxyError::Transport(format!("connect to {addr}: {e}")))?;

    let mut sent = 0usize;
    for chunk in bytes.chunks(SOCKET_CHUNK_SIZE) {
        stream
            .write_all(chunk)
            .await
            .map_err(|e| ProxyError::Transport(format!("write at byte {sent}: {e}")))?;
        sent += chunk.len();
    }
    stream
        .flush()
        .await
        .map_err(|e| ProxyError::Transport(format!("flush: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| ProxyError::Transport(format!("shutdown: {e}")))?;

    debug!(bytes = sent, addr = %addr, "raw socket transfer complete");
    Ok(())
}

/// Capabilities of a local IPP(S) device relevant to job submission.
pub struct IppDevice {
    uri: Uri,
    create_job_supported: bool,
    compression_supported: HashSet<String>,
}

impl IppDevice {
    /// Probe the local device's `operations-supported` and
    /// `compression-supported` (spec §4.7).
    pub async fn probe(uri: Uri) -> Result<Self> {
        let mut req = IppOperationBuilder::get_printer_attributes(uri.clone()).build();
        req.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requested-attributes",
                IppValue::Array(vec![
                    IppValue::Keyword("compression-supported".into()),
                    IppValue::Keyword("operations-supported".into()),
                ]),
            ),
        );

        let client = AsyncIppClient::new(uri.clone());
        let response = client.send(req).await.map_err(|e| ProxyError::Transport(e.to_string()))?;
        if !response.header().status_code().is_success() {
            return Err(ProxyError::IppStatus {
                operation: "Get-Printer-Attributes".into(),
                status: format!("{:?}", response.header().status_code()),
            });
        }

        let mut create_job_supported = false;
        let mut send_document_supported = false;
        let mut compression_supported = HashSet::new();

        for group in response.attributes().groups_of(DelimiterTag::PrinterAttributes) {
            let attrs = group.attributes();
            if let Some(attr) = attrs.get("operations-supported") {
                let rendered = format!("{}", attr.value());
                create_job_supported |= rendered.contains("Create-Job");
                send_document_supported |= rendered.contains("Send-Document");
            }
            if let Some(attr) = attrs.get("compression-supported") {
                let rendered = format!("{}", attr.value());
                compression_supported.extend(
                    rendered.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                );
            }
        }

        Ok(Self {
            uri,
            create_job_supported: create_job_supported && send_document_supported,
            compression_supported,
        })
    }

    pub fn supports_compression(&self, encoding: &str) -> bool {
        self.compression_supported.contains(encoding)
    }

    /// Submit `bytes` as a print job, using Create-Job + Send-Document
    /// when supported, falling back to a single Print-Job otherwise.
    /// Returns the assigned local job id.
    pub async fn submit(
        &self,
        bytes: Vec<u8>,
        document_format: Option<&str>,
        compression: Option<&str>,
        copied: &CopiedAttributes,
    ) -> Result<i32> {
        let client = AsyncIppClient::new(self.uri.clone());

        if self.create_job_supported {
            let mut create_req = IppOperationBuilder::create_job(self.uri.clone()).build();
            apply_copied(&mut create_req, copied);
            let create_resp = client
                .send(create_req)
                .await
                .map_err(|e| ProxyError::Transport(e.to_string()))?;
            if !create_resp.header().status_code().is_success() {
                return Err(ProxyError::IppStatus {
                    operation: "Create-Job".into(),
                    status: format!("{:?}", create_resp.header().status_code()),
                });
            }
            let local_job_id = extract_job_id(&create_resp).ok_or_else(|| {
                ProxyError::MalformedAttributes("Create-Job response missing job-id".into())
            })?;

            let payload = IppPayload::new(std::io::Cursor::new(bytes));
            let mut send_req =
                IppOperationBuilder::send_document(self.uri.clone(), local_job_id, payload, true)
                    .build();
            if let Some(format) = document_format {
                send_req.attributes_mut().add(
                    DelimiterTag::OperationAttributes,
                    IppAttribute::new("document-format", IppValue::MimeMediaType(format.to_string())),
                );
            }
            if let Some(encoding) = compression {
                send_req.attributes_mut().add(
                    DelimiterTag::OperationAttributes,
                    IppAttribute::new("compression", IppValue::Keyword(encoding.to_string())),
                );
            }
            let send_resp = client
                .send(send_req)
                .await
                .map_err(|e| ProxyError::Transport(e.to_string()))?;
            if !send_resp.header().status_code().is_success() {
                return Err(ProxyError::IppStatus {
                    operation: "Send-Document".into(),
                    status: format!("{:?}", send_resp.header().status_code()),
                });
            }
            info!(local_job_id, "submitted via Create-Job + Send-Document");
            Ok(local_job_id)
        } else {
            let payload = IppPayload::new(std::io::Cursor::new(bytes));
            let mut req = IppOperationBuilder::print_job(self.uri.clone(), payload).build();
            if let Some(format) = document_format {
                req.attributes_mut().add(
                    DelimiterTag::OperationAttributes,
                    IppAttribute::new("document-format", IppValue::MimeMediaType(format.to_string())),
                );
            }
            apply_copied(&mut req, copied);
            let resp = client.send(req).await.map_err(|e| ProxyError::Transport(e.to_string()))?;
            if !resp.header().status_code().is_success() {
                return Err(ProxyError::IppStatus {
                    operation: "Print-Job".into(),
                    status: format!("{:?}", resp.header().status_code()),
                });
            }
            let local_job_id = extract_job_id(&resp).ok_or_else(|| {
                ProxyError::MalformedAttributes("Print-Job response missing job-id".into())
            })?;
            info!(local_job_id, "submitted via Print-Job");
            Ok(local_job_id)
        }
    }

    /// Poll `Get-Job-Attributes` until the local job reaches a terminal
    /// state (spec §4.7). Intentionally unbounded — the worker is the one
    /// suspension point where a stuck local device blocks only this job.
    pub async fn poll_until_terminal(&self, local_job_id: i32) -> Result<JobState> {
        let client = AsyncIppClient::new(self.uri.clone());
        loop {
            let mut req = IppOperationBuilder::get_job_attributes(self.uri.clone(), local_job_id).build();
            req.attributes_mut().add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new(
                    "requested-attributes",
                    IppValue::Array(vec![IppValue::Keyword("job-state".into())]),
                ),
            );
            let resp = client.send(req).await.map_err(|e| ProxyError::Transport(e.to_string()))?;
            let state = resp
                .attributes()
                .groups_of(DelimiterTag::JobAttributes)
                .find_map(|g| g.attributes().get("job-state"))
                .map(|a| crate::poller::job_state_from_value(a.value()))
                .unwrap_or(JobState::Aborted);

            if state.is_terminal() {
                return Ok(state);
            }
            tokio::time::sleep(LOCAL_POLL_INTERVAL).await;
        }
    }

    pub async fn cancel(&self, local_job_id: i32) -> Result<()> {
        let operation = IppOperationBuilder::cancel_job(self.uri.clone(), local_job_id).build();
        let client = AsyncIppClient::new(self.uri.clone());
        let resp = client.send(operation).await.map_err(|e| ProxyError::Transport(e.to_string()))?;
        if !resp.header().status_code().is_success() {
            warn!(local_job_id, status = ?resp.header().status_code(), "local Cancel-Job failed");
        }
        Ok(())
    }
}

fn apply_copied(req: &mut IppRequestResponse, copied: &CopiedAttributes) {
    for (group, name, value) in &copied.0 {
        req.attributes_mut().add(*group, IppAttribute::new(name.clone(), value.clone()));
    }
}

fn extract_job_id(response: &IppRequestResponse) -> Option<i32> {
    for group in response.attributes().groups_of(DelimiterTag::JobAttributes) {
        if let Some(attr) = group.attributes().get("job-id") {
            if let IppValue::Integer(id) = attr.value() {
                return Some(*id);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copied_attribute_lists_match_spec() {
        assert!(COPIED_OPERATION_ATTRIBUTES.contains(&"job-name"));
        assert!(COPIED_JOB_TEMPLATE_ATTRIBUTES.contains(&"sides"));
        assert_eq!(COPIED_OPERATION_ATTRIBUTES.len(), 4);
        assert_eq!(COPIED_JOB_TEMPLATE_ATTRIBUTES.len(), 13);
    }
}
