//! Resource DTOs and operation options for the block storage API.
//!
//! # Design
//! Response types are tolerant: unknown fields are ignored and everything
//! except the identifier is `#[serde(default)]`, so a server that adds or
//! omits optional attributes does not break decoding. Option records used
//! as request bodies skip unset fields when serialized; for the `*Patch`
//! types this is what makes them merge-patch documents.
//!
//! Every options record implements `Validate`, which the client runs before
//! building a request.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Local checks run before any request is built.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Query parameters of a paginated list operation.
pub trait ListOptions: Clone {
    /// Every filter the options carry, `start` excluded. `None` values are
    /// omitted from the request.
    fn query_params(&self) -> Vec<(&'static str, Option<String>)>;

    /// Caller-supplied cursor, if any.
    fn start(&self) -> Option<&str>;
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    Ok(())
}

fn positive(field: &'static str, value: Option<i64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v <= 0 => Err(ValidationError::InvalidValue {
            field,
            reason: format!("must be a positive integer, got {v}"),
        }),
        _ => Ok(()),
    }
}

fn non_empty_patch(is_empty: bool) -> Result<(), ValidationError> {
    if is_empty {
        return Err(ValidationError::InvalidValue {
            field: "patch",
            reason: "no fields to update".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Identifies an existing resource by id in a request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub id: String,
}

impl ResourceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Capacity in gigabytes.
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub source_snapshot: Option<ResourceIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCreate {
    pub name: String,
    pub capacity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_snapshot: Option<ResourceIdentity>,
}

impl Validate for VolumeCreate {
    fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        positive("capacity", Some(self.capacity))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
}

impl Validate for VolumePatch {
    fn validate(&self) -> Result<(), ValidationError> {
        non_empty_patch(self.name.is_none() && self.capacity.is_none())?;
        if let Some(name) = &self.name {
            require("name", name)?;
        }
        positive("capacity", self.capacity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeListOptions {
    pub limit: Option<i64>,
    pub name: Option<String>,
    pub start: Option<String>,
}

impl Validate for VolumeListOptions {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("limit", self.limit)
    }
}

impl ListOptions for VolumeListOptions {
    fn query_params(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("limit", self.limit.map(|l| l.to_string())),
            ("name", self.name.clone()),
        ]
    }

    fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub volume: VolumeReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// NVMe qualified name of the host initiator.
    #[serde(default)]
    pub nqn: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub volume_mappings: Vec<VolumeMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMappingPrototype {
    pub volume: ResourceIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCreate {
    pub name: String,
    pub nqn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mappings: Vec<VolumeMappingPrototype>,
}

impl Validate for HostCreate {
    fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        require("nqn", &self.nqn)?;
        for mapping in &self.volume_mappings {
            require("volume_mappings.volume.id", &mapping.volume.id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Validate for HostPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        non_empty_patch(self.name.is_none())?;
        self.name.as_deref().map_or(Ok(()), |n| require("name", n))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostListOptions {
    pub limit: Option<i64>,
    pub name: Option<String>,
    pub start: Option<String>,
}

impl Validate for HostListOptions {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("limit", self.limit)
    }
}

impl ListOptions for HostListOptions {
    fn query_params(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("limit", self.limit.map(|l| l.to_string())),
            ("name", self.name.clone()),
        ]
    }

    fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Size in gigabytes.
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub lifecycle_state: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub source_volume: Option<VolumeReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCreate {
    pub source_volume: ResourceIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Validate for SnapshotCreate {
    fn validate(&self) -> Result<(), ValidationError> {
        require("source_volume.id", &self.source_volume.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Validate for SnapshotPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        non_empty_patch(self.name.is_none())?;
        self.name.as_deref().map_or(Ok(()), |n| require("name", n))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotListOptions {
    pub limit: Option<i64>,
    pub name: Option<String>,
    pub source_volume_id: Option<String>,
    pub start: Option<String>,
}

impl Validate for SnapshotListOptions {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("limit", self.limit)
    }
}

impl ListOptions for SnapshotListOptions {
    fn query_params(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("limit", self.limit.map(|l| l.to_string())),
            ("name", self.name.clone()),
            ("source_volume.id", self.source_volume_id.clone()),
        ]
    }

    fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Certificates and S3 credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub expired: Option<bool>,
    #[serde(default)]
    pub valid: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateList {
    #[serde(default)]
    pub certificates: Vec<Certificate>,
}

/// Raw certificate upload: the bytes are sent as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateUpload {
    pub name: String,
    pub body: Vec<u8>,
    /// Defaults to `application/octet-stream` when `None`.
    pub content_type: Option<String>,
}

impl Validate for CertificateUpload {
    fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        if self.body.is_empty() {
            return Err(ValidationError::MissingField { field: "body" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_key: String,
    #[serde(default)]
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialList {
    #[serde(default)]
    pub s3_credentials: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_decodes_with_unknown_and_missing_fields() {
        let vol: Volume =
            serde_json::from_str(r#"{"id":"v1","capacity":10,"zone":"eu-de-1","iops":3000}"#).unwrap();
        assert_eq!(vol.id, "v1");
        assert_eq!(vol.capacity, 10);
        assert!(vol.name.is_none());
    }

    #[test]
    fn volume_without_id_is_rejected() {
        let result: Result<Volume, _> = serde_json::from_str(r#"{"name":"anon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let patch = VolumePatch {
            name: Some("renamed".to_string()),
            capacity: None,
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"name": "renamed"}));

        let patch = VolumePatch {
            name: None,
            capacity: Some(20),
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({"capacity": 20})
        );
    }

    #[test]
    fn create_validation() {
        let ok = VolumeCreate {
            name: "vol".to_string(),
            capacity: 10,
            source_snapshot: None,
        };
        assert!(ok.validate().is_ok());

        let no_name = VolumeCreate {
            name: " ".to_string(),
            ..ok.clone()
        };
        assert_eq!(
            no_name.validate(),
            Err(ValidationError::MissingField { field: "name" })
        );

        let no_capacity = VolumeCreate { capacity: 0, ..ok };
        assert!(matches!(
            no_capacity.validate(),
            Err(ValidationError::InvalidValue { field: "capacity", .. })
        ));
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(VolumePatch::default().validate().is_err());
        assert!(HostPatch::default().validate().is_err());
        assert!(SnapshotPatch::default().validate().is_err());
    }

    #[test]
    fn host_create_requires_nqn_and_mapping_ids() {
        let host = HostCreate {
            name: "h1".to_string(),
            nqn: String::new(),
            volume_mappings: Vec::new(),
        };
        assert_eq!(host.validate(), Err(ValidationError::MissingField { field: "nqn" }));

        let host = HostCreate {
            nqn: "nqn.2014-08.org.nvmexpress:uuid:1".to_string(),
            volume_mappings: vec![VolumeMappingPrototype {
                volume: ResourceIdentity::new(""),
            }],
            ..host
        };
        assert!(host.validate().is_err());
    }

    #[test]
    fn host_create_omits_empty_mappings() {
        let host = HostCreate {
            name: "h1".to_string(),
            nqn: "nqn.x".to_string(),
            volume_mappings: Vec::new(),
        };
        let json = serde_json::to_value(&host).unwrap();
        assert!(json.get("volume_mappings").is_none());
    }

    #[test]
    fn snapshot_list_options_use_documented_filter_key() {
        let opts = SnapshotListOptions {
            source_volume_id: Some("v1".to_string()),
            ..Default::default()
        };
        assert!(opts
            .query_params()
            .contains(&("source_volume.id", Some("v1".to_string()))));
    }

    #[test]
    fn list_limit_must_be_positive() {
        let opts = VolumeListOptions {
            limit: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn certificate_upload_requires_body() {
        let upload = CertificateUpload {
            name: "s3".to_string(),
            body: Vec::new(),
            content_type: None,
        };
        assert_eq!(upload.validate(), Err(ValidationError::MissingField { field: "body" }));
    }
}
