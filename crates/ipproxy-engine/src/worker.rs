// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Job Worker (C6): dequeue pending jobs, run each through the
// fetch/print/report state machine (spec §4.6).

use std::time::Duration;

use ipp::prelude::*;
use ipproxy_core::{JobRecord, JobState, ProxyError, Result};
use tokio::io::AsyncReadExt;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{info, instrument, warn};

use crate::capabilities::{AttrValue, AttributeSet};
use crate::context::ProxyContext;
use crate::session::Session;
use crate::transport::{CopiedAttributes, IppDevice};
use crate::wire::{self, opcode};

const IDLE_WAIT: Duration = Duration::from_secs(15);

/// Output format fallback order when the caller didn't pin one and the
/// device doesn't advertise `application/pdf` (spec §4.6).
const FORMAT_FALLBACKS: &[&str] = &["image/urf", "image/pwg-raster", "application/vnd.hp-pcl"];

/// Run the worker loop until `ctx.done` is set.
pub async fn run(ctx: &ProxyContext, session: &Session) {
    loop {
        if ctx.done.is_set() {
            return;
        }

        match ctx.jobs.first_eligible().await {
            Some(record) => {
                run_job_state_machine(ctx, session, record).await;
            }
            None => {
                let pruned = ctx.jobs.prune_terminal().await;
                if pruned > 0 {
                    info!(pruned, "pruned terminal job records");
                }
                ctx.jobs.wait_for_signal(IDLE_WAIT).await;
            }
        }
    }
}

#[instrument(skip(ctx, session), fields(remote_job_id = record.remote_job_id))]
async fn run_job_state_machine(ctx: &ProxyContext, session: &Session, record: JobRecord) {
    let remote_job_id = record.remote_job_id;

    match fetch_job(session, ctx, remote_job_id).await {
        FetchOutcome::NotFetchable => {
            // Already claimed elsewhere — not an error (spec §7).
            ctx.jobs
                .update_local(remote_job_id, |r| r.local_job_state = JobState::Completed)
                .await;
            return;
        }
        FetchOutcome::Failed(err) => {
            warn!(error = %err, "Fetch-Job failed");
            ctx.jobs
                .update_local(remote_job_id, |r| r.local_job_state = JobState::Aborted)
                .await;
            return;
        }
        FetchOutcome::Fetched { number_of_documents, copied, format_preference } => {
            if let Err(err) = acknowledge_job(session, ctx, remote_job_id).await {
                warn!(error = %err, "Acknowledge-Job failed");
                ctx.jobs
                    .update_local(remote_job_id, |r| r.local_job_state = JobState::Aborted)
                    .await;
                return;
            }
            ctx.jobs
                .update_local(remote_job_id, |r| r.local_job_state = JobState::Processing)
                .await;
            let _ = update_job_status(session, ctx, remote_job_id, JobState::Processing).await;

            let documents_result = run_documents(
                ctx,
                session,
                remote_job_id,
                number_of_documents,
                &copied,
                format_preference.as_deref(),
            )
            .await;

            // `run_documents` only re-checks the remote state *between*
            // documents; a cancel landing during the last document's
            // delivery (the common `number-of-documents == 1` case) never
            // triggers another iteration, so re-check once more here before
            // the job is reported terminal.
            let outcome = match documents_result {
                Ok(local_job_id) => match ctx.jobs.first_record_snapshot(remote_job_id).await {
                    Some(record)
                        if record.remote_job_state.is_terminal()
                            && record.remote_job_state != JobState::Completed =>
                    {
                        Err(DocumentOutcome::RemoteCanceled { local_job_id })
                    }
                    _ => Ok(()),
                },
                Err(err) => Err(err),
            };

            let final_state = match outcome {
                Ok(()) => JobState::Completed,
                Err(DocumentOutcome::RemoteCanceled { local_job_id }) => {
                    if let Some(local_job_id) = local_job_id {
                        if let Ok(uri) = ctx.parse_device_uri() {
                            if let Ok(device) = IppDevice::probe(uri).await {
                                let _ = device.cancel(local_job_id).await;
                            }
                        }
                    }
                    JobState::Canceled
                }
                Err(DocumentOutcome::Failed(err)) => {
                    warn!(error = %err, "document transfer failed, aborting job");
                    JobState::Aborted
                }
            };

            ctx.jobs
                .update_local(remote_job_id, |r| r.local_job_state = final_state)
                .await;
            let _ = update_job_status(session, ctx, remote_job_id, final_state).await;
        }
    }
}

enum FetchOutcome {
    NotFetchable,
    Failed(ProxyError),
    Fetched {
        number_of_documents: i32,
        copied: CopiedAttributes,
        format_preference: Option<String>,
    },
}

async fn fetch_job(session: &Session, ctx: &ProxyContext, remote_job_id: i32) -> FetchOutcome {
    let mut req = wire::infra_request(
        opcode::FETCH_JOB,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "job-id", remote_job_id);

    let response = match session.send(req).await {
        Ok(r) => r,
        Err(err) => return FetchOutcome::Failed(err),
    };

    // `client-error-not-fetchable` (0x0408): another device already claimed
    // the job between our Get-Notifications and this Fetch-Job.
    if response.header().operation_or_status == 0x0408 {
        return FetchOutcome::NotFetchable;
    }
    if !response.header().status_code().is_success() {
        return FetchOutcome::Failed(ProxyError::IppStatus {
            operation: "Fetch-Job".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    let mut copied = CopiedAttributes::default();
    let mut number_of_documents = 1;
    for group in response.attributes().groups_of(DelimiterTag::JobAttributes) {
        let attrs = group.attributes();
        if let Some(attr) = attrs.get("number-of-documents") {
            if let IppValue::Integer(n) = attr.value() {
                number_of_documents = if *n < 1 { 1 } else { *n };
            }
        }
        for name in crate::transport::COPIED_OPERATION_ATTRIBUTES {
            if let Some(attr) = attrs.get(*name) {
                copied
                    .0
                    .push((DelimiterTag::OperationAttributes, (*name).to_string(), attr.value().clone()));
            }
        }
        for name in crate::transport::COPIED_JOB_TEMPLATE_ATTRIBUTES {
            if let Some(attr) = attrs.get(*name) {
                copied
                    .0
                    .push((DelimiterTag::JobAttributes, (*name).to_string(), attr.value().clone()));
            }
        }
    }

    FetchOutcome::Fetched {
        number_of_documents,
        copied,
        format_preference: ctx.preferred_output_format.clone(),
    }
}

async fn acknowledge_job(session: &Session, ctx: &ProxyContext, remote_job_id: i32) -> Result<()> {
    let mut req = wire::infra_request(
        opcode::ACKNOWLEDGE_JOB,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "job-id", remote_job_id);
    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Acknowledge-Job".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }
    Ok(())
}

async fn update_job_status(
    session: &Session,
    ctx: &ProxyContext,
    remote_job_id: i32,
    state: JobState,
) -> Result<()> {
    let mut req = wire::infra_request(
        opcode::UPDATE_JOB_STATUS,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "job-id", remote_job_id);
    wire::add_keyword(
        &mut req,
        DelimiterTag::OperationAttributes,
        "output-device-job-state",
        state.ipp_keyword(),
    );
    session.send(req).await?;
    Ok(())
}

async fn update_document_status(
    session: &Session,
    ctx: &ProxyContext,
    remote_job_id: i32,
    document_number: i32,
    state: &str,
) -> Result<()> {
    let mut req = wire::infra_request(
        opcode::UPDATE_DOCUMENT_STATUS,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "job-id", remote_job_id);
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "document-number", document_number);
    wire::add_keyword(
        &mut req,
        DelimiterTag::OperationAttributes,
        "output-device-document-state",
        state,
    );
    session.send(req).await?;
    Ok(())
}

enum DocumentOutcome {
    RemoteCanceled { local_job_id: Option<i32> },
    Failed(ProxyError),
}

#[allow(clippy::too_many_arguments)]
async fn run_documents(
    ctx: &ProxyContext,
    session: &Session,
    remote_job_id: i32,
    number_of_documents: i32,
    copied: &CopiedAttributes,
    format_preference: Option<&str>,
) -> std::result::Result<Option<i32>, DocumentOutcome> {
    let mut local_job_id: Option<i32> = None;

    for document_number in 1..=number_of_documents {
        if let Some(record) = ctx.jobs.first_record_snapshot(remote_job_id).await {
            if record.remote_job_state.is_terminal() && record.remote_job_state != JobState::Completed {
                return Err(DocumentOutcome::RemoteCanceled { local_job_id });
            }
        }

        let _ = update_document_status(session, ctx, remote_job_id, document_number, "processing").await;

        let bytes = match fetch_document(session, ctx, remote_job_id, document_number, format_preference)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => return Err(DocumentOutcome::Failed(err)),
        };

        match deliver(ctx, format_preference, bytes, copied).await {
            Ok(assigned_id) => {
                local_job_id = local_job_id.or(assigned_id);
            }
            Err(err) => return Err(DocumentOutcome::Failed(err)),
        }

        if let Err(err) = acknowledge_document(session, ctx, remote_job_id, document_number).await {
            return Err(DocumentOutcome::Failed(err));
        }
        let _ = update_document_status(session, ctx, remote_job_id, document_number, "completed").await;
    }

    Ok(local_job_id)
}

async fn fetch_document(
    session: &Session,
    ctx: &ProxyContext,
    remote_job_id: i32,
    document_number: i32,
    format_preference: Option<&str>,
) -> Result<Vec<u8>> {
    let mut req = wire::infra_request(
        opcode::FETCH_DOCUMENT,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "job-id", remote_job_id);
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "document-number", document_number);
    if let Some(format) = format_preference {
        req.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("document-format-accepted", IppValue::MimeMediaType(format.to_string())),
        );
    }

    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Fetch-Document".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    let mut bytes = Vec::new();
    response
        .into_payload()
        .compat()
        .read_to_end(&mut bytes)
        .await
        .map_err(ProxyError::Io)?;
    Ok(bytes)
}

async fn acknowledge_document(
    session: &Session,
    ctx: &ProxyContext,
    remote_job_id: i32,
    document_number: i32,
) -> Result<()> {
    let mut req = wire::infra_request(
        opcode::ACKNOWLEDGE_DOCUMENT,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "job-id", remote_job_id);
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "document-number", document_number);
    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Acknowledge-Document".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }
    Ok(())
}

async fn deliver(
    ctx: &ProxyContext,
    format_preference: Option<&str>,
    bytes: Vec<u8>,
    copied: &CopiedAttributes,
) -> Result<Option<i32>> {
    match ctx.device_scheme() {
        ipproxy_core::DeviceScheme::Socket => {
            let (host, port) = ctx.socket_host_port()?;
            crate::transport::send_socket(&host, port, &bytes).await?;
            Ok(None)
        }
        ipproxy_core::DeviceScheme::Ipp | ipproxy_core::DeviceScheme::Ipps => {
            let device = IppDevice::probe(ctx.parse_device_uri()?).await?;
            let supported = ctx.device_attrs.read().await;
            let format = choose_format(format_preference, &supported);
            let local_job_id = device.submit(bytes, format.as_deref(), None, copied).await?;
            let state = device.poll_until_terminal(local_job_id).await?;
            if state == JobState::Canceled {
                return Err(ProxyError::Transport("local job canceled unexpectedly".into()));
            }
            Ok(Some(local_job_id))
        }
    }
}

/// Whether `supported` advertises `format` in `document-format-supported`.
fn device_supports_format(supported: &AttributeSet, format: &str) -> bool {
    matches!(
        supported.get("document-format-supported"),
        Some(AttrValue::Strings(list)) if list.iter().any(|f| f == format)
    )
}

/// Output-format selection (spec §4.6): caller preference first, else
/// `application/pdf` if the device advertises it, else the first of
/// [`FORMAT_FALLBACKS`] the device advertises, else omit the attribute
/// entirely and let the device negotiate a default.
fn choose_format(preference: Option<&str>, supported: &AttributeSet) -> Option<String> {
    if let Some(p) = preference {
        return Some(p.to_string());
    }
    if device_supports_format(supported, "application/pdf") {
        return Some("application/pdf".to_string());
    }
    FORMAT_FALLBACKS
        .iter()
        .find(|format| device_supports_format(supported, format))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_format_prefers_explicit_preference() {
        let attrs = AttributeSet::new();
        assert_eq!(
            choose_format(Some("application/pdf"), &attrs).as_deref(),
            Some("application/pdf")
        );
    }

    #[test]
    fn choose_format_prefers_pdf_when_device_advertises_it() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "document-format-supported".into(),
            AttrValue::Strings(vec!["application/pdf".into(), "image/urf".into()]),
        );
        assert_eq!(choose_format(None, &attrs).as_deref(), Some("application/pdf"));
    }

    #[test]
    fn choose_format_falls_back_to_first_supported_fallback() {
        let mut attrs = AttributeSet::new();
        attrs.insert(
            "document-format-supported".into(),
            AttrValue::Strings(vec!["image/pwg-raster".into()]),
        );
        assert_eq!(choose_format(None, &attrs).as_deref(), Some("image/pwg-raster"));
    }

    #[test]
    fn choose_format_omits_attribute_when_nothing_matches() {
        let attrs = AttributeSet::new();
        assert_eq!(choose_format(None, &attrs), None);
    }
}
