//! Resource operations: each one is a request description plus a result type.
//!
//! # Design
//! Nothing here talks to the network directly. An operation validates its
//! options, describes the request (`RequestDescriptor`) and hands it to the
//! client's generic `invoke*`/`fetch_page` methods. List operations are
//! described by a `ListEndpoint` and driven through a `Pager`, which owns
//! the cursor.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::cancel::CallOptions;
use crate::client::{require_id, validate, StorageClient};
use crate::error::{ApiError, ValidationError};
use crate::http::{HttpMethod, OCTET_STREAM};
use crate::pager::{Collection, PageSource, Pager, START_PARAM};
use crate::request::RequestDescriptor;
use crate::types::{
    Certificate, CertificateList, CertificateUpload, Credential, CredentialList, Host, HostCreate,
    HostListOptions, HostPatch, ListOptions, Snapshot, SnapshotCreate, SnapshotListOptions,
    SnapshotPatch, Validate, Volume, VolumeCreate, VolumeListOptions, VolumePatch,
};

/// A paginated collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEndpoint {
    pub operation: &'static str,
    pub path: &'static str,
    /// Key of the item array in the collection body.
    pub items_key: &'static str,
}

pub const LIST_VOLUMES: ListEndpoint = ListEndpoint {
    operation: "list_volumes",
    path: "/volumes",
    items_key: "volumes",
};

pub const LIST_HOSTS: ListEndpoint = ListEndpoint {
    operation: "list_hosts",
    path: "/hosts",
    items_key: "hosts",
};

pub const LIST_SNAPSHOTS: ListEndpoint = ListEndpoint {
    operation: "list_snapshots",
    path: "/snapshots",
    items_key: "snapshots",
};

/// Fetches pages of one list endpoint with a fixed set of options.
pub struct ListSource<'c, O, T> {
    client: &'c StorageClient,
    endpoint: ListEndpoint,
    options: O,
    call: CallOptions,
    _item: PhantomData<fn() -> T>,
}

/// GET request for one page of `endpoint`: the filters of `options`, with
/// `start` replacing any cursor they carry.
fn list_descriptor<O: ListOptions>(
    endpoint: &ListEndpoint,
    options: &O,
    start: Option<&str>,
) -> RequestDescriptor {
    let mut descriptor = RequestDescriptor::new(endpoint.operation, HttpMethod::Get, endpoint.path);
    for (name, value) in options.query_params() {
        descriptor = descriptor.query(name, value);
    }
    descriptor.set_query(START_PARAM, start.map(str::to_string))
}

impl<O, T> ListSource<'_, O, T> {
    pub fn options(&self) -> &O {
        &self.options
    }
}

impl<O: ListOptions, T: DeserializeOwned> PageSource for ListSource<'_, O, T> {
    type Item = T;

    fn operation(&self) -> &'static str {
        self.endpoint.operation
    }

    fn fetch(&mut self, start: Option<&str>) -> Result<Collection<T>, ApiError> {
        let descriptor = list_descriptor(&self.endpoint, &self.options, start);
        self.client
            .fetch_page(&descriptor, self.endpoint.items_key, &self.call)
    }
}

pub type VolumesPager<'c> = Pager<ListSource<'c, VolumeListOptions, Volume>>;
pub type HostsPager<'c> = Pager<ListSource<'c, HostListOptions, Host>>;
pub type SnapshotsPager<'c> = Pager<ListSource<'c, SnapshotListOptions, Snapshot>>;

impl StorageClient {
    /// Fetch a single page of `endpoint`, honoring `options.start`.
    pub fn list_page<O, T>(
        &self,
        endpoint: ListEndpoint,
        options: &O,
        call: &CallOptions,
    ) -> Result<Collection<T>, ApiError>
    where
        O: ListOptions + Validate,
        T: DeserializeOwned,
    {
        validate(endpoint.operation, options)?;
        let descriptor = list_descriptor(&endpoint, options, options.start());
        self.fetch_page(&descriptor, endpoint.items_key, call)
    }

    /// Pager over `endpoint`. The pager owns the cursor, so `options.start`
    /// must be unset.
    pub fn pager<O, T>(
        &self,
        endpoint: ListEndpoint,
        options: O,
        call: CallOptions,
    ) -> Result<Pager<ListSource<'_, O, T>>, ApiError>
    where
        O: ListOptions + Validate,
        T: DeserializeOwned,
    {
        validate(endpoint.operation, &options)?;
        if options.start().is_some_and(|s| !s.is_empty()) {
            return Err(ApiError::Validation {
                operation: endpoint.operation,
                source: ValidationError::InvalidValue {
                    field: "start",
                    reason: "must not be set; the pager manages the cursor".to_string(),
                },
            });
        }
        Ok(Pager::new(ListSource {
            client: self,
            endpoint,
            options,
            call,
            _item: PhantomData,
        }))
    }

    // -----------------------------------------------------------------------
    // Volumes
    // -----------------------------------------------------------------------

    pub fn list_volumes(
        &self,
        options: &VolumeListOptions,
        call: &CallOptions,
    ) -> Result<Collection<Volume>, ApiError> {
        self.list_page(LIST_VOLUMES, options, call)
    }

    pub fn volumes_pager(
        &self,
        options: VolumeListOptions,
        call: CallOptions,
    ) -> Result<VolumesPager<'_>, ApiError> {
        self.pager(LIST_VOLUMES, options, call)
    }

    pub fn create_volume(
        &self,
        input: &VolumeCreate,
        call: &CallOptions,
    ) -> Result<Option<Volume>, ApiError> {
        const OP: &str = "create_volume";
        validate(OP, input)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Post, "/volumes").json(input)?;
        self.invoke(&descriptor, call)
    }

    pub fn get_volume(&self, id: &str, call: &CallOptions) -> Result<Option<Volume>, ApiError> {
        const OP: &str = "get_volume";
        require_id(OP, "volume_id", id)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Get, "/volumes/{volume_id}")
            .path_param("volume_id", id);
        self.invoke(&descriptor, call)
    }

    pub fn update_volume(
        &self,
        id: &str,
        patch: &VolumePatch,
        call: &CallOptions,
    ) -> Result<Option<Volume>, ApiError> {
        const OP: &str = "update_volume";
        require_id(OP, "volume_id", id)?;
        validate(OP, patch)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Patch, "/volumes/{volume_id}")
            .path_param("volume_id", id)
            .merge_patch(patch)?;
        self.invoke(&descriptor, call)
    }

    pub fn delete_volume(&self, id: &str, call: &CallOptions) -> Result<(), ApiError> {
        const OP: &str = "delete_volume";
        require_id(OP, "volume_id", id)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Delete, "/volumes/{volume_id}")
            .path_param("volume_id", id);
        self.invoke_empty(&descriptor, call)
    }

    // -----------------------------------------------------------------------
    // Hosts
    // -----------------------------------------------------------------------

    pub fn list_hosts(
        &self,
        options: &HostListOptions,
        call: &CallOptions,
    ) -> Result<Collection<Host>, ApiError> {
        self.list_page(LIST_HOSTS, options, call)
    }

    pub fn hosts_pager(
        &self,
        options: HostListOptions,
        call: CallOptions,
    ) -> Result<HostsPager<'_>, ApiError> {
        self.pager(LIST_HOSTS, options, call)
    }

    pub fn create_host(
        &self,
        input: &HostCreate,
        call: &CallOptions,
    ) -> Result<Option<Host>, ApiError> {
        const OP: &str = "create_host";
        validate(OP, input)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Post, "/hosts").json(input)?;
        self.invoke(&descriptor, call)
    }

    pub fn get_host(&self, id: &str, call: &CallOptions) -> Result<Option<Host>, ApiError> {
        const OP: &str = "get_host";
        require_id(OP, "host_id", id)?;
        let descriptor =
            RequestDescriptor::new(OP, HttpMethod::Get, "/hosts/{host_id}").path_param("host_id", id);
        self.invoke(&descriptor, call)
    }

    pub fn update_host(
        &self,
        id: &str,
        patch: &HostPatch,
        call: &CallOptions,
    ) -> Result<Option<Host>, ApiError> {
        const OP: &str = "update_host";
        require_id(OP, "host_id", id)?;
        validate(OP, patch)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Patch, "/hosts/{host_id}")
            .path_param("host_id", id)
            .merge_patch(patch)?;
        self.invoke(&descriptor, call)
    }

    pub fn delete_host(&self, id: &str, call: &CallOptions) -> Result<(), ApiError> {
        const OP: &str = "delete_host";
        require_id(OP, "host_id", id)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Delete, "/hosts/{host_id}")
            .path_param("host_id", id);
        self.invoke_empty(&descriptor, call)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn list_snapshots(
        &self,
        options: &SnapshotListOptions,
        call: &CallOptions,
    ) -> Result<Collection<Snapshot>, ApiError> {
        self.list_page(LIST_SNAPSHOTS, options, call)
    }

    pub fn snapshots_pager(
        &self,
        options: SnapshotListOptions,
        call: CallOptions,
    ) -> Result<SnapshotsPager<'_>, ApiError> {
        self.pager(LIST_SNAPSHOTS, options, call)
    }

    pub fn create_snapshot(
        &self,
        input: &SnapshotCreate,
        call: &CallOptions,
    ) -> Result<Option<Snapshot>, ApiError> {
        const OP: &str = "create_snapshot";
        validate(OP, input)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Post, "/snapshots").json(input)?;
        self.invoke(&descriptor, call)
    }

    pub fn get_snapshot(&self, id: &str, call: &CallOptions) -> Result<Option<Snapshot>, ApiError> {
        const OP: &str = "get_snapshot";
        require_id(OP, "snapshot_id", id)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Get, "/snapshots/{snapshot_id}")
            .path_param("snapshot_id", id);
        self.invoke(&descriptor, call)
    }

    pub fn update_snapshot(
        &self,
        id: &str,
        patch: &SnapshotPatch,
        call: &CallOptions,
    ) -> Result<Option<Snapshot>, ApiError> {
        const OP: &str = "update_snapshot";
        require_id(OP, "snapshot_id", id)?;
        validate(OP, patch)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Patch, "/snapshots/{snapshot_id}")
            .path_param("snapshot_id", id)
            .merge_patch(patch)?;
        self.invoke(&descriptor, call)
    }

    pub fn delete_snapshot(&self, id: &str, call: &CallOptions) -> Result<(), ApiError> {
        const OP: &str = "delete_snapshot";
        require_id(OP, "snapshot_id", id)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Delete, "/snapshots/{snapshot_id}")
            .path_param("snapshot_id", id);
        self.invoke_empty(&descriptor, call)
    }

    // -----------------------------------------------------------------------
    // Certificates
    // -----------------------------------------------------------------------

    pub fn list_certificates(&self, call: &CallOptions) -> Result<CertificateList, ApiError> {
        let descriptor = RequestDescriptor::new("list_certificates", HttpMethod::Get, "/certificates");
        Ok(self.invoke(&descriptor, call)?.unwrap_or_default())
    }

    pub fn get_certificate(
        &self,
        name: &str,
        call: &CallOptions,
    ) -> Result<Option<Certificate>, ApiError> {
        const OP: &str = "get_certificate";
        require_id(OP, "cert", name)?;
        let descriptor =
            RequestDescriptor::new(OP, HttpMethod::Get, "/certificates/{cert}").path_param("cert", name);
        self.invoke(&descriptor, call)
    }

    pub fn create_certificate(
        &self,
        upload: &CertificateUpload,
        call: &CallOptions,
    ) -> Result<Option<Certificate>, ApiError> {
        self.upload_certificate("create_certificate", HttpMethod::Post, upload, call)
    }

    pub fn replace_certificate(
        &self,
        upload: &CertificateUpload,
        call: &CallOptions,
    ) -> Result<Option<Certificate>, ApiError> {
        self.upload_certificate("replace_certificate", HttpMethod::Put, upload, call)
    }

    fn upload_certificate(
        &self,
        operation: &'static str,
        method: HttpMethod,
        upload: &CertificateUpload,
        call: &CallOptions,
    ) -> Result<Option<Certificate>, ApiError> {
        validate(operation, upload)?;
        let content_type = upload.content_type.as_deref().unwrap_or(OCTET_STREAM);
        let descriptor = RequestDescriptor::new(operation, method, "/certificates/{cert}")
            .path_param("cert", upload.name.as_str())
            .raw(upload.body.clone(), content_type);
        self.invoke(&descriptor, call)
    }

    pub fn delete_certificate(&self, name: &str, call: &CallOptions) -> Result<(), ApiError> {
        const OP: &str = "delete_certificate";
        require_id(OP, "cert", name)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Delete, "/certificates/{cert}")
            .path_param("cert", name);
        self.invoke_empty(&descriptor, call)
    }

    // -----------------------------------------------------------------------
    // S3 credentials
    // -----------------------------------------------------------------------

    pub fn list_credentials(&self, call: &CallOptions) -> Result<CredentialList, ApiError> {
        let descriptor =
            RequestDescriptor::new("list_credentials", HttpMethod::Get, "/s3_credentials");
        Ok(self.invoke(&descriptor, call)?.unwrap_or_default())
    }

    pub fn create_credential(
        &self,
        access_key: &str,
        call: &CallOptions,
    ) -> Result<Option<Credential>, ApiError> {
        const OP: &str = "create_credential";
        require_id(OP, "access_key", access_key)?;
        let descriptor = RequestDescriptor::new(OP, HttpMethod::Put, "/s3_credentials/{access_key}")
            .path_param("access_key", access_key);
        self.invoke(&descriptor, call)
    }

    pub fn delete_credential(&self, access_key: &str, call: &CallOptions) -> Result<(), ApiError> {
        const OP: &str = "delete_credential";
        require_id(OP, "access_key", access_key)?;
        let descriptor =
            RequestDescriptor::new(OP, HttpMethod::Delete, "/s3_credentials/{access_key}")
                .path_param("access_key", access_key);
        self.invoke_empty(&descriptor, call)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::ClientConfig;
    use crate::error::{ErrorKind, TransportError};
    use crate::http::{self, HttpRequest, HttpResponse};
    use crate::transport::Transport;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<HttpRequest>>,
        responses: Mutex<Vec<HttpResponse>>,
    }

    impl Recorder {
        fn with(responses: Vec<HttpResponse>) -> Arc<Self> {
            let mut responses = responses;
            responses.reverse();
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            })
        }
    }

    impl Transport for Recorder {
        fn send(
            &self,
            request: &HttpRequest,
            _timeout: Option<Duration>,
        ) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request.clone());
            Ok(self
                .responses
                .lock()
                .pop()
                .unwrap_or_else(|| HttpResponse::new(204, "")))
        }
    }

    fn client(transport: Arc<Recorder>) -> StorageClient {
        let config = ClientConfig::builder("http://localhost:3000/v1")
            .disable_retries()
            .build();
        StorageClient::with_transport(config, transport)
    }

    #[test]
    fn create_volume_posts_json() {
        let transport = Recorder::with(vec![HttpResponse::new(
            201,
            r#"{"id":"v1","name":"data","capacity":10,"status":"pending"}"#,
        )]);
        let client = client(transport.clone());
        let input = VolumeCreate {
            name: "data".to_string(),
            capacity: 10,
            source_snapshot: None,
        };
        let vol = client.create_volume(&input, &CallOptions::new()).unwrap().unwrap();
        assert_eq!(vol.id, "v1");

        let sent = &transport.requests.lock()[0];
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.url, "http://localhost:3000/v1/volumes");
        assert_eq!(sent.header(http::CONTENT_TYPE), Some(http::JSON));
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"name": "data", "capacity": 10}));
    }

    #[test]
    fn invalid_input_never_reaches_transport() {
        let transport = Recorder::with(vec![]);
        let client = client(transport.clone());
        let call = CallOptions::new();

        let bad_create = VolumeCreate {
            name: String::new(),
            capacity: 10,
            source_snapshot: None,
        };
        let errors = [
            client.create_volume(&bad_create, &call).unwrap_err(),
            client.get_volume("", &call).unwrap_err(),
            client.update_volume("v1", &VolumePatch::default(), &call).unwrap_err(),
            client.delete_host("", &call).unwrap_err(),
            client
                .create_snapshot(
                    &SnapshotCreate {
                        source_volume: crate::types::ResourceIdentity::new(""),
                        name: None,
                    },
                    &call,
                )
                .unwrap_err(),
            client.create_credential("", &call).unwrap_err(),
        ];
        for err in &errors {
            assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
        }
        assert_eq!(errors[0].operation(), "create_volume");
        assert_eq!(errors[3].operation(), "delete_host");
        assert!(transport.requests.lock().is_empty());
    }

    #[test]
    fn update_sends_merge_patch_with_only_set_fields() {
        let transport = Recorder::with(vec![HttpResponse::new(200, r#"{"id":"v1","capacity":20}"#)]);
        let client = client(transport.clone());
        let patch = VolumePatch {
            name: None,
            capacity: Some(20),
        };
        let vol = client.update_volume("v1", &patch, &CallOptions::new()).unwrap().unwrap();
        assert_eq!(vol.capacity, 20);

        let sent = &transport.requests.lock()[0];
        assert_eq!(sent.method, HttpMethod::Patch);
        assert_eq!(sent.header(http::CONTENT_TYPE), Some(http::MERGE_PATCH_JSON));
        assert_eq!(sent.body.as_deref(), Some(br#"{"capacity":20}"#.as_slice()));
    }

    #[test]
    fn empty_success_body_is_an_absent_result() {
        let transport = Recorder::with(vec![HttpResponse::new(200, "")]);
        let client = client(transport);
        assert!(client.get_volume("v1", &CallOptions::new()).unwrap().is_none());
    }

    #[test]
    fn certificate_upload_sends_raw_bytes() {
        let transport = Recorder::with(vec![HttpResponse::new(201, r#"{"name":"s3","valid":true}"#)]);
        let client = client(transport.clone());
        let upload = CertificateUpload {
            name: "s3".to_string(),
            body: b"-----BEGIN CERTIFICATE-----".to_vec(),
            content_type: None,
        };
        let cert = client.create_certificate(&upload, &CallOptions::new()).unwrap().unwrap();
        assert_eq!(cert.valid, Some(true));

        let sent = &transport.requests.lock()[0];
        assert_eq!(sent.url, "http://localhost:3000/v1/certificates/s3");
        assert_eq!(sent.header(http::CONTENT_TYPE), Some(OCTET_STREAM));
        assert_eq!(sent.body.as_deref(), Some(upload.body.as_slice()));
    }

    #[test]
    fn list_page_passes_filters_and_start() {
        let transport = Recorder::with(vec![HttpResponse::new(
            200,
            r#"{"first":{"href":"/v1/snapshots?limit=1"},"limit":1,"total_count":1,"snapshots":[{"id":"s1","size":10}]}"#,
        )]);
        let client = client(transport.clone());
        let options = SnapshotListOptions {
            limit: Some(1),
            source_volume_id: Some("v1".to_string()),
            start: Some("cur".to_string()),
            ..Default::default()
        };
        let page = client.list_snapshots(&options, &CallOptions::new()).unwrap();
        assert_eq!(page.items[0].id, "s1");
        assert_eq!(
            transport.requests.lock()[0].url,
            "http://localhost:3000/v1/snapshots?limit=1&source_volume.id=v1&start=cur"
        );
    }

    #[test]
    fn list_descriptor_replaces_the_cursor_and_keeps_filters() {
        let options = VolumeListOptions {
            limit: Some(5),
            name: Some("data".to_string()),
            start: Some("stale".to_string()),
        };
        let first = list_descriptor(&LIST_VOLUMES, &options, None);
        assert_eq!(first.operation, "list_volumes");
        assert_eq!(first.path, "/volumes");
        assert_eq!(
            first.query,
            vec![
                ("limit", Some("5".to_string())),
                ("name", Some("data".to_string())),
                (START_PARAM, None),
            ]
        );

        let next = list_descriptor(&LIST_VOLUMES, &options, Some("c2"));
        assert_eq!(next.query.last(), Some(&(START_PARAM, Some("c2".to_string()))));
        assert_eq!(next.query.len(), 3);
    }

    #[test]
    fn pager_rejects_preset_start() {
        let transport = Recorder::with(vec![]);
        let client = client(transport);
        let options = VolumeListOptions {
            start: Some("abc".to_string()),
            ..Default::default()
        };
        let err = client.volumes_pager(options, CallOptions::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn pager_follows_cursor_and_keeps_filters() {
        let transport = Recorder::with(vec![
            HttpResponse::new(
                200,
                r#"{"first":{"href":"/v1/hosts?limit=1"},"next":{"href":"/v1/hosts?limit=1&start=h2"},"limit":1,"total_count":2,"hosts":[{"id":"h1"}]}"#,
            ),
            HttpResponse::new(
                200,
                r#"{"first":{"href":"/v1/hosts?limit=1"},"limit":1,"total_count":2,"hosts":[{"id":"h2"}]}"#,
            ),
        ]);
        let client = client(transport.clone());
        let options = HostListOptions {
            limit: Some(1),
            name: Some("web".to_string()),
            start: None,
        };
        let mut pager = client.hosts_pager(options, CallOptions::new()).unwrap();
        let hosts = pager.get_all().unwrap();
        assert_eq!(
            hosts.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            vec!["h1", "h2"]
        );

        let urls: Vec<String> = transport.requests.lock().iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:3000/v1/hosts?limit=1&name=web".to_string(),
                "http://localhost:3000/v1/hosts?limit=1&name=web&start=h2".to_string(),
            ]
        );
    }

    #[test]
    fn credential_list_defaults_when_body_empty() {
        let transport = Recorder::with(vec![HttpResponse::new(200, "")]);
        let client = client(transport);
        assert!(client
            .list_credentials(&CallOptions::new())
            .unwrap()
            .s3_credentials
            .is_empty());
    }
}
