//! VPN Harness core: the primitives every acceptance run is built from
//!
//! ## Key Components
//!
//! - `RunId`: process-unique label namespacing every cloud resource of a run
//! - `retry` / `RetryPolicy` / `CancelToken`: fixed-interval polling
//! - `Lifecycle`: LIFO release stack with a single guaranteed unwind
//! - `RunConfig` / `RunContext`: validated, typed run parameters
//! - `CloudApi`, `RemoteShell`, `HttpProbe`: external collaborators, with
//!   CLI/`reqwest` implementations and in-memory fakes

pub mod cloud;
pub mod config;
pub mod context;
pub mod error;
pub mod fakes;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod obs;
pub mod remote;
pub mod retry;
pub mod telemetry;

pub use cloud::{AwsCli, CloudApi, CloudError, KeyPair};
pub use config::RunConfig;
pub use context::{RunContext, TemplateVars};
pub use error::{HarnessError, ResourceKind, Result, TeardownWarning};
pub use http::{HttpError, HttpProbe, HttpResponse, ReqwestProbe};
pub use identity::RunId;
pub use lifecycle::{Lifecycle, ReleasedResource, TeardownSummary};
pub use remote::{CommandOutput, RemoteError, RemoteShell, SshCli, SshSession, SshTarget};
pub use retry::{retry, CancelToken, RetryError, RetryPolicy};
pub use telemetry::init_tracing;
