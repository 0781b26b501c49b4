// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Proxy Context (spec §3): the one-per-process shared state Task E and
// Task W both read, and the cancellation flag the outer signal layer sets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipp::prelude::Uri;
use ipproxy_core::{DeviceScheme, ProxyError, Result};
use tokio::sync::{Notify, RwLock};

use crate::capabilities::AttributeSet;
use crate::job_table::JobTable;

/// Monotonic shutdown flag: once set, it is never cleared. Polled at every
/// suspension point (spec §5) and backed by a [`Notify`] so sleepers don't
/// have to busy-poll it, following the teacher's `shutdown_signal: Arc<Notify>`
/// pattern but adding the atomic so a *poll* (not just a one-shot wait) is
/// possible from inside the back-off loop.
#[derive(Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Sleep for `dur`, waking early if the flag is set in the meantime.
    pub async fn sleep_or_cancel(&self, dur: std::time::Duration) {
        if self.is_set() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(dur) => {}
            _ = self.notify.notified() => {}
        }
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared proxy state (spec §3). `printer_uri` is mutable — C2 may replace
/// it exactly once, after system-level registration — everything else
/// reachable from here is either immutable or independently synchronized.
pub struct ProxyContext {
    printer_uri: RwLock<Uri>,
    pub device_uri: String,
    pub device_uuid: String,
    pub preferred_output_format: Option<String>,
    pub requesting_user_name: String,
    pub device_attrs: RwLock<AttributeSet>,
    pub jobs: JobTable,
    pub done: ShutdownFlag,
}

impl ProxyContext {
    pub fn new(
        printer_uri: Uri,
        device_uri: String,
        device_uuid: String,
        preferred_output_format: Option<String>,
        requesting_user_name: String,
        done: ShutdownFlag,
    ) -> Self {
        Self {
            printer_uri: RwLock::new(printer_uri),
            device_uri,
            device_uuid,
            preferred_output_format,
            requesting_user_name,
            device_attrs: RwLock::new(AttributeSet::default()),
            jobs: JobTable::new(),
            done,
        }
    }

    pub async fn printer_uri(&self) -> Uri {
        self.printer_uri.read().await.clone()
    }

    /// Replace the printer URI after C2's system-level registration
    /// resolves a concrete `xri-uri` (spec §4.2 step 2).
    pub async fn set_printer_uri(&self, uri: Uri) {
        *self.printer_uri.write().await = uri;
    }

    /// The local output device's transport personality, parsed from
    /// `device_uri`'s scheme (spec §4.7).
    pub fn device_scheme(&self) -> DeviceScheme {
        let scheme = self.device_uri.split(':').next().unwrap_or("");
        DeviceScheme::from_scheme(scheme).unwrap_or(DeviceScheme::Ipp)
    }

    /// Parse `device_uri` as an IPP(S) printer URI.
    pub fn parse_device_uri(&self) -> Result<Uri> {
        self.device_uri.parse().map_err(|e| ProxyError::InvalidUri {
            uri: self.device_uri.clone(),
            detail: format!("{e}"),
        })
    }

    /// Split a `socket://host:port` device URI into its host and port.
    pub fn socket_host_port(&self) -> Result<(String, u16)> {
        let invalid = || ProxyError::InvalidUri {
            uri: self.device_uri.clone(),
            detail: "expected socket://host:port".into(),
        };
        let rest = self.device_uri.strip_prefix("socket://").ok_or_else(invalid)?;
        let rest = rest.split(['/', '?']).next().unwrap_or(rest);
        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| invalid())?;
                Ok((host.to_string(), port))
            }
            None => Ok((rest.to_string(), 9100)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_flag_is_monotonic() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[tokio::test]
    async fn sleep_or_cancel_returns_immediately_once_set() {
        let flag = ShutdownFlag::new();
        flag.set();
        let start = tokio::time::Instant::now();
        flag.sleep_or_cancel(std::time::Duration::from_secs(30)).await;
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }
}
