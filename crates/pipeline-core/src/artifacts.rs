//! Typed, versioned artifact contract and the object-store-backed repository façade.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};
use crate::types::SourceType;

/// Narrow boundary to whatever object store backs artifact storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_bytes(&self, key: &str, payload: Vec<u8>) -> CoreResult<String>;
    async fn get_bytes(&self, key: &str) -> CoreResult<Vec<u8>>;
}

pub const STORAGE_PREFIXES: &[&str] = &["raw/", "normalized/", "exports/", "eval/"];

pub fn validate_storage_key(key: &str) -> CoreResult<()> {
    if STORAGE_PREFIXES.iter().any(|p| key.starts_with(p)) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "storage key '{key}' does not match an allowed prefix"
        )))
    }
}

/// Strip a `scheme://` prefix from a persisted artifact ref, leaving the storage key.
fn storage_key_from_ref(artifact_ref: &str) -> &str {
    match artifact_ref.find("://") {
        Some(idx) => &artifact_ref[idx + 3..],
        None => artifact_ref,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatPolicy {
    Strict,
    Compatible,
}

impl CompatPolicy {
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "strict" => Ok(Self::Strict),
            "compatible" => Ok(Self::Compatible),
            other => Err(CoreError::Validation(format!(
                "unknown artifact compat policy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedArtifact {
    pub submission_public_id: String,
    pub assignment_public_id: String,
    pub source_type: SourceType,
    pub content_markdown: String,
    pub normalization_metadata: BTreeMap<String, String>,
    pub schema_version: String,
}

impl NormalizedArtifact {
    pub const KIND: &'static str = "normalized";

    pub fn new(
        submission_public_id: String,
        assignment_public_id: String,
        source_type: SourceType,
        content_markdown: String,
        normalization_metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            submission_public_id,
            assignment_public_id,
            source_type,
            content_markdown,
            normalization_metadata,
            schema_version: "normalized:v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportRowArtifact {
    pub candidate_identifier: String,
    pub assignment_identifier: String,
    pub score_1_10: u8,
    pub criteria_summary: String,
    pub strengths: String,
    pub issues: String,
    pub recommendations: String,
    pub chain_version: String,
    pub model: String,
    pub spec_version: String,
    pub response_language: String,
    pub schema_version: String,
}

impl ExportRowArtifact {
    pub const KIND: &'static str = "exports";

    pub fn validate(&self) -> CoreResult<()> {
        if !(1..=10).contains(&self.score_1_10) {
            return Err(CoreError::Validation("score_1_10 must be in 1..=10".into()));
        }
        Ok(())
    }

    fn csv_fields(&self) -> [(&'static str, String); 11] {
        [
            ("candidate_identifier", self.candidate_identifier.clone()),
            ("assignment_identifier", self.assignment_identifier.clone()),
            ("score_1_10", self.score_1_10.to_string()),
            ("criteria_summary", self.criteria_summary.clone()),
            ("strengths", self.strengths.clone()),
            ("issues", self.issues.clone()),
            ("recommendations", self.recommendations.clone()),
            ("chain_version", self.chain_version.clone()),
            ("model", self.model.clone()),
            ("spec_version", self.spec_version.clone()),
            ("response_language", self.response_language.clone()),
        ]
    }
}

fn family_prefix(schema_version: &str) -> &str {
    schema_version.split(':').next().unwrap_or(schema_version)
}

fn validate_schema_version(kind: &str, active_version: &str, found: &str, policy: CompatPolicy) -> CoreResult<()> {
    match policy {
        CompatPolicy::Strict => {
            if found != active_version {
                return Err(CoreError::Validation(format!(
                    "artifact '{kind}' schema_version '{found}' does not match active contract '{active_version}' under strict policy"
                )));
            }
        }
        CompatPolicy::Compatible => {
            if family_prefix(found) != family_prefix(active_version) {
                return Err(CoreError::Validation(format!(
                    "artifact '{kind}' schema_version '{found}' is not family-compatible with '{active_version}'"
                )));
            }
        }
    }
    Ok(())
}

/// Version-aware façade over an [`ObjectStore`] enforcing the active contract version and policy.
pub struct VersionedArtifactRepository {
    store: Arc<dyn ObjectStore>,
    normalized_version: String,
    exports_version: String,
    policy: CompatPolicy,
}

impl VersionedArtifactRepository {
    pub fn new(store: Arc<dyn ObjectStore>, contract_version: &str, policy: CompatPolicy) -> Self {
        Self {
            store,
            normalized_version: format!("normalized:{contract_version}"),
            exports_version: format!("exports:{contract_version}"),
            policy,
        }
    }

    pub async fn load_normalized(&self, artifact_ref: &str) -> CoreResult<NormalizedArtifact> {
        let key = storage_key_from_ref(artifact_ref);
        let bytes = self.store.get_bytes(key).await?;
        let artifact: NormalizedArtifact = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Validation(format!("normalized artifact decode failed: {e}")))?;
        validate_schema_version(
            NormalizedArtifact::KIND,
            &self.normalized_version,
            &artifact.schema_version,
            self.policy,
        )?;
        Ok(artifact)
    }

    pub async fn save_normalized(&self, submission_id: &str, artifact: &NormalizedArtifact) -> CoreResult<String> {
        validate_schema_version(
            NormalizedArtifact::KIND,
            &self.normalized_version,
            &artifact.schema_version,
            self.policy,
        )?;
        let key = format!("normalized/{submission_id}.json");
        let bytes = serde_json::to_vec(artifact)
            .map_err(|e| CoreError::Validation(format!("normalized artifact encode failed: {e}")))?;
        self.store.put_bytes(&key, bytes).await
    }

    pub async fn save_export_rows(&self, export_id: &str, rows: &[ExportRowArtifact]) -> CoreResult<String> {
        for row in rows {
            row.validate()?;
            validate_schema_version(
                ExportRowArtifact::KIND,
                &self.exports_version,
                &row.schema_version,
                self.policy,
            )?;
        }
        let key = format!("exports/{export_id}.csv");
        let bytes = encode_export_rows(rows)?;
        self.store.put_bytes(&key, bytes).await
    }
}

/// Encode export rows as CSV; an empty row list produces empty bytes.
fn encode_export_rows(rows: &[ExportRowArtifact]) -> CoreResult<Vec<u8>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header: Vec<&str> = rows[0].csv_fields().iter().map(|(k, _)| *k).collect();
    writer
        .write_record(&header)
        .map_err(|e| CoreError::Validation(format!("csv header encode failed: {e}")))?;
    for row in rows {
        let values: Vec<String> = row.csv_fields().into_iter().map(|(_, v)| v).collect();
        writer
            .write_record(&values)
            .map_err(|e| CoreError::Validation(format!("csv row encode failed: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| CoreError::Validation(format!("csv flush failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct InMemoryStore {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self {
                objects: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for InMemoryStore {
        async fn put_bytes(&self, key: &str, payload: Vec<u8>) -> CoreResult<String> {
            self.objects.lock().unwrap().insert(key.to_string(), payload);
            Ok(format!("stub://{key}"))
        }

        async fn get_bytes(&self, key: &str) -> CoreResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| CoreError::Storage(format!("no object at {key}")))
        }
    }

    fn sample_artifact() -> NormalizedArtifact {
        NormalizedArtifact::new(
            "sub_01".into(),
            "asg_01".into(),
            SourceType::ApiUpload,
            "# hello".into(),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn round_trips_under_strict_policy() {
        let repo = VersionedArtifactRepository::new(Arc::new(InMemoryStore::new()), "v1", CompatPolicy::Strict);
        let artifact = sample_artifact();
        let artifact_ref = repo.save_normalized("sub_01", &artifact).await.unwrap();
        let loaded = repo.load_normalized(&artifact_ref).await.unwrap();
        assert_eq!(loaded, artifact);
    }

    #[tokio::test]
    async fn compatible_policy_accepts_same_family_version() {
        let store = Arc::new(InMemoryStore::new());
        let mut artifact = sample_artifact();
        artifact.schema_version = "normalized:v1-beta".into();
        let bytes = serde_json::to_vec(&artifact).unwrap();
        store.put_bytes("normalized/sub_01.json", bytes).await.unwrap();

        let repo = VersionedArtifactRepository::new(store, "v1", CompatPolicy::Compatible);
        let loaded = repo.load_normalized("normalized/sub_01.json").await.unwrap();
        assert_eq!(loaded.schema_version, "normalized:v1-beta");
    }

    #[tokio::test]
    async fn strict_policy_rejects_family_match_with_different_suffix() {
        let store = Arc::new(InMemoryStore::new());
        let mut artifact = sample_artifact();
        artifact.schema_version = "normalized:v1-beta".into();
        let bytes = serde_json::to_vec(&artifact).unwrap();
        store.put_bytes("normalized/sub_01.json", bytes).await.unwrap();

        let repo = VersionedArtifactRepository::new(store, "v1", CompatPolicy::Strict);
        assert!(repo.load_normalized("normalized/sub_01.json").await.is_err());
    }

    #[test]
    fn empty_export_rows_encode_to_empty_bytes() {
        assert!(encode_export_rows(&[]).unwrap().is_empty());
    }

    #[test]
    fn storage_key_strips_scheme_prefix() {
        assert_eq!(storage_key_from_ref("stub://normalized/x.json"), "normalized/x.json");
        assert_eq!(storage_key_from_ref("normalized/x.json"), "normalized/x.json");
    }
}
