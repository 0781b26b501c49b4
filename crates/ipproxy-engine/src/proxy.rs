// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Top-level orchestration: spawn Task E (registration + event polling) and
// Task W (job worker) against one shared [`ProxyContext`], and wind both
// down cleanly on shutdown (spec §5).

use std::sync::Arc;

use ipp::prelude::Uri;
use ipproxy_core::Result;
use tracing::{info, warn};

use crate::capabilities::{self, AttributeSet};
use crate::context::{ProxyContext, ShutdownFlag};
use crate::reconciler;
use crate::registrar::{self, Registration};
use crate::session::Session;
use crate::{poller, worker};

/// Everything needed to start a proxy instance, already validated.
pub struct ProxyRuntimeConfig {
    pub infrastructure_uri: Uri,
    pub device_uri: String,
    pub device_uuid: String,
    pub preferred_output_format: Option<String>,
    pub requesting_user_name: String,
}

/// Run the proxy until `shutdown` is set, attempting an orderly
/// deregistration before returning.
pub async fn run(config: ProxyRuntimeConfig, shutdown: ShutdownFlag) -> Result<()> {
    let ctx = Arc::new(ProxyContext::new(
        config.infrastructure_uri,
        config.device_uri,
        config.device_uuid,
        config.preferred_output_format,
        config.requesting_user_name,
        shutdown,
    ));

    let Some(Registration { session, subscription_id }) = registrar::register(&ctx, &ctx.done).await?
    else {
        info!("shutdown requested before registration completed");
        return Ok(());
    };
    info!(subscription_id, "registered with infrastructure printer");

    // C3's first push happens-before C2's subscription is relied upon by
    // anyone: seed the cache and send one reconcile against an empty
    // baseline so the infrastructure printer's view starts accurate.
    if let Ok(initial) = probe_device(&ctx).await {
        let deltas = reconciler::diff(&initial, &AttributeSet::default());
        if let Err(err) =
            reconciler::reconcile(&session, &ctx.device_uuid, &ctx.requesting_user_name, &deltas).await
        {
            warn!(error = %err, "initial attribute reconciliation failed");
        }
        *ctx.device_attrs.write().await = initial;
    }

    if let Err(err) = poller::startup_scan(&session, &ctx).await {
        warn!(error = %err, "startup job scan failed");
    }

    let event_ctx = ctx.clone();
    let event_task =
        tokio::spawn(async move { run_event_loop(event_ctx, session, subscription_id).await });

    let worker_ctx = ctx.clone();
    let worker_task = tokio::spawn(async move {
        let Some(session) = Session::open(worker_ctx.printer_uri().await, &worker_ctx.done).await
        else {
            return;
        };
        worker::run(&worker_ctx, &session).await;
    });

    let _ = tokio::join!(event_task, worker_task);
    Ok(())
}

async fn run_event_loop(ctx: Arc<ProxyContext>, mut session: Session, subscription_id: i32) {
    let mut last_seq = 0;
    let mut interval = std::time::Duration::from_secs(10);

    while !ctx.done.is_set() {
        match poller::poll_once(&session, &ctx, subscription_id, last_seq).await {
            Ok((next_interval_secs, next_seq)) => {
                last_seq = next_seq;
                interval = std::time::Duration::from_secs(next_interval_secs);
            }
            Err(err) => {
                warn!(error = %err, "poll cycle failed, reopening session");
                match Session::open(ctx.printer_uri().await, &ctx.done).await {
                    Some(reopened) => session = reopened,
                    None => break,
                }
                continue;
            }
        }

        if let Ok(new_attrs) = probe_device(&ctx).await {
            let previous = ctx.device_attrs.read().await.clone();
            let deltas = reconciler::diff(&new_attrs, &previous);
            if !deltas.is_empty() {
                match reconciler::reconcile(
                    &session,
                    &ctx.device_uuid,
                    &ctx.requesting_user_name,
                    &deltas,
                )
                .await
                {
                    Ok(_) => *ctx.device_attrs.write().await = new_attrs,
                    Err(err) => warn!(error = %err, "periodic attribute reconciliation failed"),
                }
            }
        }

        ctx.done.sleep_or_cancel(interval).await;
    }

    registrar::deregister(&session, &ctx, subscription_id).await;
}

async fn probe_device(ctx: &ProxyContext) -> Result<AttributeSet> {
    let uri = ctx.parse_device_uri()?;
    Ok(capabilities::probe(&uri, ctx.device_scheme()).await)
}
