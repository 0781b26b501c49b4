// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Event Poller (C4): drain the subscription's notification queue,
// classify events, and seed/advance the Job Table.

use std::time::Duration;

use ipp::prelude::*;
use ipproxy_core::{JobState, ProxyError, Result};
use tracing::{debug, info, warn};

use crate::context::ProxyContext;
use crate::session::Session;
use crate::wire::{self, opcode};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const MAX_POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone)]
struct EventGroup {
    event: Option<String>,
    job_id: Option<i32>,
    job_state: Option<JobState>,
    sequence_number: i32,
    identify_printer_requested: bool,
    identify_message: Option<String>,
}

/// Startup scan (spec §4.4): seed the Job Table with any job already in
/// state `pending` or `stopped` before the poll loop begins.
pub async fn startup_scan(
    session: &Session,
    ctx: &ProxyContext,
) -> Result<()> {
    let mut req = IppOperationBuilder::get_jobs(session.uri().clone()).build();
    wire::add_keyword(
        &mut req,
        DelimiterTag::OperationAttributes,
        "output-device-uuid",
        &ctx.device_uuid,
    );
    wire::add_keyword(
        &mut req,
        DelimiterTag::OperationAttributes,
        "requesting-user-name",
        &ctx.requesting_user_name,
    );
    wire::add_keyword(&mut req, DelimiterTag::OperationAttributes, "which-jobs", "fetchable");

    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Get-Jobs".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    for group in response.attributes().groups_of(DelimiterTag::JobAttributes) {
        let attrs = group.attributes();
        let Some(IppValue::Integer(job_id)) = attrs.get("job-id").map(|a| a.value()) else {
            continue;
        };
        let state = attrs
            .get("job-state")
            .map(|a| job_state_from_value(a.value()))
            .unwrap_or(JobState::Pending);
        if matches!(state, JobState::Pending | JobState::Stopped) {
            ctx.jobs.insert_if_absent(*job_id, state).await;
        }
    }

    Ok(())
}

/// One full poll-and-dispatch cycle: `Get-Notifications`, dispatch every
/// event group in order, and return the next sleep interval (spec §4.4
/// steps 1-6, minus the reconnect, which the caller drives).
pub async fn poll_once(
    session: &Session,
    ctx: &ProxyContext,
    subscription_id: i32,
    last_seq: i32,
) -> Result<(u64, i32)> {
    let mut req = wire::infra_request(
        opcode::GET_NOTIFICATIONS,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    wire::add_integer(&mut req, DelimiterTag::OperationAttributes, "notify-subscription-ids", subscription_id);
    wire::add_integer(
        &mut req,
        DelimiterTag::OperationAttributes,
        "notify-sequence-numbers",
        last_seq,
    );
    req.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new("notify-wait", IppValue::Boolean(false)),
    );

    let response = session.send(req).await?;
    if !response.header().status_code().is_success() {
        return Err(ProxyError::IppStatus {
            operation: "Get-Notifications".into(),
            status: format!("{:?}", response.header().status_code()),
        });
    }

    let interval = response
        .attributes()
        .groups_of(DelimiterTag::OperationAttributes)
        .find_map(|g| g.attributes().get("notify-get-interval"))
        .and_then(|a| match a.value() {
            IppValue::Integer(i) => Some(*i),
            _ => None,
        })
        .map(|v| v.clamp(0, MAX_POLL_INTERVAL_SECS as i32) as u64)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    let mut seq = last_seq;
    for group in event_groups(&response) {
        seq = seq.max(group.sequence_number + 1);
        dispatch(session, ctx, &group).await;
    }

    Ok((interval, seq))
}

/// Walk the response's attribute groups, treating every group carrying a
/// `notify-sequence-number` as one event group — per spec §9, group
/// boundaries are the only record separator the implementation may rely
/// on.
fn event_groups(response: &IppRequestResponse) -> Vec<EventGroup> {
    let mut groups = Vec::new();
    for group in response.attributes().groups() {
        let attrs = group.attributes();
        let Some(seq_attr) = attrs.get("notify-sequence-number") else {
            continue;
        };
        let sequence_number = match seq_attr.value() {
            IppValue::Integer(i) => *i,
            _ => continue,
        };

        let event = attrs
            .get("notify-subscribed-event")
            .map(|a| format!("{}", a.value()));
        let job_id = attrs
            .get("job-id")
            .or_else(|| attrs.get("notify-job-id"))
            .and_then(|a| match a.value() {
                IppValue::Integer(i) => Some(*i),
                _ => None,
            });
        let job_state = attrs.get("job-state").map(|a| job_state_from_value(a.value()));

        let reasons = attrs
            .get("printer-state-reasons")
            .map(|a| format!("{}", a.value()))
            .unwrap_or_default();
        let identify_printer_requested = reasons.contains("identify-printer-requested");
        let identify_message = attrs.get("message").map(|a| format!("{}", a.value()));

        groups.push(EventGroup {
            event,
            job_id,
            job_state,
            sequence_number,
            identify_printer_requested,
            identify_message,
        });
    }
    groups
}

pub(crate) fn job_state_from_value(value: &IppValue) -> JobState {
    match value {
        IppValue::Keyword(s) | IppValue::TextWithoutLanguage(s) => JobState::from_ipp_keyword(s),
        IppValue::Enum(i) => job_state_from_enum(*i),
        _ => JobState::Aborted,
    }
}

/// RFC 8011 §5.3.7 job-state enum values.
fn job_state_from_enum(value: i32) -> JobState {
    match value {
        3 => JobState::Pending,
        4 => JobState::Held,
        5 => JobState::Processing,
        6 => JobState::Stopped,
        7 => JobState::Canceled,
        8 => JobState::Aborted,
        9 => JobState::Completed,
        _ => JobState::Aborted,
    }
}

async fn dispatch(session: &Session, ctx: &ProxyContext, group: &EventGroup) {
    if group.identify_printer_requested {
        acknowledge_identify_printer(session, ctx, group).await;
        return;
    }

    match group.event.as_deref() {
        Some("job-fetchable") => {
            if let Some(job_id) = group.job_id {
                let state = group.job_state.unwrap_or(JobState::Pending);
                if ctx.jobs.insert_if_absent(job_id, state).await {
                    debug!(job_id, "job-fetchable: created job record");
                    ctx.jobs.signal();
                }
            }
        }
        Some("job-state-changed") => {
            if let (Some(job_id), Some(state)) = (group.job_id, group.job_state) {
                if ctx.jobs.update_remote_state(job_id, state).await {
                    debug!(job_id, ?state, "job-state-changed: updated remote state");
                    ctx.jobs.signal();
                }
            }
        }
        _ => {}
    }
}

/// RFC 3998: the actions to perform live on the *response* to
/// Acknowledge-Identify-Printer, not on the notification that triggered it.
async fn acknowledge_identify_printer(session: &Session, ctx: &ProxyContext, group: &EventGroup) {
    let req = wire::infra_request(
        opcode::ACKNOWLEDGE_IDENTIFY_PRINTER,
        session.uri(),
        &ctx.device_uuid,
        &ctx.requesting_user_name,
    );
    match session.send(req).await {
        Ok(response) => {
            let identify_actions: Vec<String> = response
                .attributes()
                .groups_of(DelimiterTag::OperationAttributes)
                .find_map(|g| g.attributes().get("identify-actions"))
                .map(|a| format!("{}", a.value()))
                .map(|s| s.split(',').map(|t| t.trim().to_string()).collect())
                .unwrap_or_default();

            let message = group.identify_message.as_deref().unwrap_or("");
            if identify_actions.iter().any(|a| a == "display") {
                info!(target: "identify-printer", message, "display");
            }
            if identify_actions.is_empty() || identify_actions.iter().any(|a| a == "sound") {
                info!(target: "identify-printer", "\u{07}");
            }
        }
        Err(err) => warn!(error = %err, "Acknowledge-Identify-Printer failed"),
    }
}

pub fn clamp_interval(raw: Option<i32>) -> u64 {
    raw.map(|v| v.clamp(0, MAX_POLL_INTERVAL_SECS as i32) as u64)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_defaults_to_ten_when_absent() {
        assert_eq!(clamp_interval(None), 10);
    }

    #[test]
    fn interval_clamps_above_thirty() {
        assert_eq!(clamp_interval(Some(90)), 30);
    }

    #[test]
    fn interval_clamps_negative_to_zero() {
        assert_eq!(clamp_interval(Some(-5)), 0);
    }

    #[test]
    fn job_state_enum_mapping_matches_rfc8011() {
        assert_eq!(job_state_from_enum(3), JobState::Pending);
        assert_eq!(job_state_from_enum(9), JobState::Completed);
        assert_eq!(job_state_from_enum(42), JobState::Aborted);
    }
}
