// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Infrastructure session: a live connection to the Infrastructure Printer,
// opened with Fibonacci back-off and unbounded retries (spec §4.2 step 1,
// §5, §7 "transient connectivity").

use ipp::prelude::*;
use ipproxy_core::{ErrorClass, ProxyError, Result};
use tracing::{info, warn};

use crate::backoff::{classify, Backoff};
use crate::context::ShutdownFlag;

/// A connection to the Infrastructure Printer, bound to one URI.
///
/// The `ipp` crate opens an HTTP(S) connection per request rather than
/// holding a socket open, so "the session" here is the validated URI plus
/// a ready [`AsyncIppClient`] — opening it means proving the printer is
/// reachable at least once before the caller starts depending on it.
pub struct Session {
    client: AsyncIppClient,
    uri: Uri,
}

impl Session {
    /// Open a session to `uri`, retrying indefinitely with Fibonacci
    /// back-off on transient connectivity errors until the shutdown flag
    /// is set, in which case `None` is returned.
    pub async fn open(uri: Uri, done: &ShutdownFlag) -> Option<Self> {
        let mut backoff = Backoff::new();
        loop {
            if done.is_set() {
                return None;
            }
            let client = AsyncIppClient::new(uri.clone());
            match probe(&client, &uri).await {
                Ok(()) => {
                    info!(uri = %uri, "infrastructure session opened");
                    return Some(Self { client, uri });
                }
                Err(err) if classify(&err) == ErrorClass::Transient => {
                    let delay = backoff.next_delay_secs();
                    warn!(uri = %uri, error = %err, delay_secs = delay, "connect failed, backing off");
                    done.sleep_or_cancel(std::time::Duration::from_secs(delay)).await;
                }
                Err(err) => {
                    warn!(uri = %uri, error = %err, "non-transient error opening session, retrying anyway");
                    let delay = backoff.next_delay_secs();
                    done.sleep_or_cancel(std::time::Duration::from_secs(delay)).await;
                }
            }
        }
    }

    pub fn client(&self) -> &AsyncIppClient {
        &self.client
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub async fn send(&self, request: IppRequestResponse) -> Result<IppRequestResponse> {
        self.client
            .send(request)
            .await
            .map_err(|e| ProxyError::Connect {
                uri: self.uri.to_string(),
                detail: e.to_string(),
            })
    }
}

async fn probe(client: &AsyncIppClient, uri: &Uri) -> Result<()> {
    let operation = IppOperationBuilder::get_printer_attributes(uri.clone()).build();
    client
        .send(operation)
        .await
        .map(|_| ())
        .map_err(|e| ProxyError::Connect {
            uri: uri.to_string(),
            detail: e.to_string(),
        })
}
