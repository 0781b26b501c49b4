// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Registration, event polling, job relay, and transport core of the IPP
// infrastructure proxy. Built around the cooperating Task E / Task W model
// from the spec: registrar+poller drive the infrastructure side, the
// worker drains the job table onto the local output device.

pub mod backoff;
pub mod capabilities;
pub mod context;
pub mod device_uuid;
pub mod job_table;
pub mod poller;
pub mod proxy;
pub mod reconciler;
pub mod registrar;
pub mod session;
pub mod transport;
pub mod wire;
pub mod worker;

pub use context::{ProxyContext, ShutdownFlag};
pub use device_uuid::device_uuid;
pub use proxy::{run, ProxyRuntimeConfig};
pub use session::Session;
