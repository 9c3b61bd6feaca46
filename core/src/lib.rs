//! Synchronous client core for a block storage management service.
//!
//! # Overview
//! Exposes volumes, hosts, snapshots, certificates and S3 credentials of a
//! REST service as typed, blocking operations on [`StorageClient`]. Every
//! operation goes through one pipeline: validate the options, describe the
//! request, build it against the service URL, authenticate, execute with
//! retries and a deadline, then classify and decode the response.
//!
//! # Design
//! - `RequestDescriptor` is a pure description of a call; building it never
//!   touches the network, so request shape is testable without a server.
//! - `Transport` is the only I/O seam. `UreqTransport` is the default;
//!   tests substitute scripted transports.
//! - `Executor` owns retry, backoff, deadline and cancellation handling.
//! - `Pager` drives cursor pagination over any `PageSource`.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod cancel;
pub mod client;
pub mod compress;
pub mod config;
pub mod decode;
pub mod error;
pub mod executor;
pub mod http;
pub mod pager;
pub mod request;
pub mod resources;
pub mod retry;
pub mod transport;
pub mod types;

pub use auth::{Authenticator, BasicAuthenticator, BearerTokenAuthenticator, NoAuth};
pub use cancel::{CallOptions, CancellationToken};
pub use client::StorageClient;
pub use compress::{Compressor, GzipCompressor};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ApiError, AuthError, ErrorKind, ServiceErrorDetail, TransportError, ValidationError};
pub use http::{Body, HttpMethod, HttpRequest, HttpResponse};
pub use pager::{Collection, PageInfo, PageLink, PageSource, Pager, PagerState};
pub use request::RequestDescriptor;
pub use resources::{HostsPager, ListEndpoint, ListSource, SnapshotsPager, VolumesPager};
pub use retry::RetryPolicy;
pub use transport::{Transport, UreqTransport};
pub use types::{
    Certificate, CertificateList, CertificateUpload, Credential, CredentialList, Host, HostCreate,
    HostListOptions, HostPatch, ListOptions, ResourceIdentity, Snapshot, SnapshotCreate,
    SnapshotListOptions, SnapshotPatch, Validate, Volume, VolumeCreate, VolumeListOptions,
    VolumeMapping, VolumeMappingPrototype, VolumePatch, VolumeReference,
};
