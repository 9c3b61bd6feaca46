use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub href: String,
    pub name: String,
    pub capacity: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_snapshot: Option<Reference>,
}

#[derive(Deserialize)]
pub struct CreateVolume {
    pub name: String,
    pub capacity: i64,
    #[serde(default)]
    pub source_snapshot: Option<Reference>,
}

#[derive(Deserialize)]
pub struct UpdateVolume {
    pub name: Option<String>,
    pub capacity: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub id: String,
    pub status: String,
    pub volume: Reference,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub href: String,
    pub name: String,
    pub nqn: String,
    pub volume_mappings: Vec<VolumeMapping>,
}

#[derive(Deserialize)]
pub struct MappingPrototype {
    pub volume: Reference,
}

#[derive(Deserialize)]
pub struct CreateHost {
    pub name: String,
    pub nqn: String,
    #[serde(default)]
    pub volume_mappings: Vec<MappingPrototype>,
}

#[derive(Deserialize)]
pub struct Rename {
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub href: String,
    pub name: String,
    pub size: i64,
    pub lifecycle_state: String,
    pub source_volume: Reference,
}

#[derive(Deserialize)]
pub struct CreateSnapshot {
    pub source_volume: Reference,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    pub expired: bool,
    pub valid: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Error body returned for every non-2xx response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorDetail>,
    pub trace: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
