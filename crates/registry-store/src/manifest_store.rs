use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tracing::{instrument, warn};

use crate::blob_store::BlobStore;
use crate::digests::BlobDigest;
use crate::error::{Error, Result};

pub const DOCKER_MANIFEST_V2_JSON: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_IMAGE_MANIFEST_V1_JSON: &str = "application/vnd.oci.image.manifest.v1+json";

fn content_type_allowed(content_type: &str) -> bool {
    matches!(content_type, DOCKER_MANIFEST_V2_JSON | OCI_IMAGE_MANIFEST_V1_JSON)
}

/// Just enough structure to validate presence of the required keys (spec
/// §4.4 step 2); the manifest is otherwise treated as opaque bytes.
#[derive(Deserialize)]
struct ManifestShape {
    #[serde(rename = "schemaVersion")]
    #[allow(dead_code)]
    schema_version: serde_json::Value,
    config: BlobRef,
    layers: Vec<BlobRef>,
}

#[derive(Deserialize)]
struct BlobRef {
    digest: String,
}

/// Persists manifests by repository name, tag, and digest; validates
/// referential integrity against a [BlobStore] (spec §4.4).
#[derive(Clone)]
pub struct ManifestStore {
    manifests_dir: PathBuf,
    blob_store: BlobStore,
}

impl ManifestStore {
    pub async fn open(manifests_dir: impl Into<PathBuf>, blob_store: BlobStore) -> Result<Self> {
        let manifests_dir = manifests_dir.into();
        fs::create_dir_all(&manifests_dir).await?;
        Ok(Self {
            manifests_dir,
            blob_store,
        })
    }

    fn entry_path(&self, repo: &str, reference: &str) -> PathBuf {
        self.manifests_dir.join(repo).join(reference)
    }

    fn content_type_path(entry_path: &Path) -> PathBuf {
        let mut name = entry_path.file_name().unwrap_or_default().to_os_string();
        name.push(".content-type");
        entry_path.with_file_name(name)
    }

    /// Validates content-type, structure, and referential integrity, then
    /// durably writes the manifest under both its tag and its digest.
    #[instrument(skip(self, bytes), fields(repo, reference, manifest.size = bytes.len()))]
    pub async fn put(
        &self,
        repo: &str,
        reference: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<BlobDigest> {
        if !content_type_allowed(content_type) {
            warn!(content_type, "rejecting unsupported manifest content type");
            return Err(Error::UnsupportedManifestContentType(content_type.to_string()));
        }

        let shape: ManifestShape = serde_json::from_slice(bytes)?;

        let config_digest = BlobDigest::parse(&shape.config.digest)?;
        if !self.blob_store.exists(&config_digest).await {
            return Err(Error::ReferencedBlobMissing(shape.config.digest));
        }
        for layer in &shape.layers {
            let digest = BlobDigest::parse(&layer.digest)?;
            if !self.blob_store.exists(&digest).await {
                return Err(Error::ReferencedBlobMissing(layer.digest.clone()));
            }
        }

        let manifest_digest = BlobDigest::of(bytes);
        let repo_dir = self.manifests_dir.join(repo);
        fs::create_dir_all(&repo_dir).await?;

        let manifest_digest_ref = manifest_digest.to_string();
        for target in [reference, manifest_digest_ref.as_str()] {
            let entry_path = self.entry_path(repo, target);
            atomic_write(&entry_path, bytes).await?;
            atomic_write(&Self::content_type_path(&entry_path), content_type.as_bytes()).await?;
        }

        Ok(manifest_digest)
    }

    /// Reads a stored manifest by tag or digest. The returned digest is
    /// recomputed from the bytes on every call, never cached.
    #[instrument(skip(self), fields(repo, reference))]
    pub async fn get(&self, repo: &str, reference: &str) -> Result<(String, BlobDigest, Vec<u8>)> {
        let entry_path = self.entry_path(repo, reference);
        let bytes = match fs::read(&entry_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ManifestUnknown {
                    repo: repo.to_string(),
                    reference: reference.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let content_type = fs::read_to_string(Self::content_type_path(&entry_path)).await?;
        let digest = BlobDigest::of(&bytes);
        Ok((content_type, digest, bytes))
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, bytes).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::BlockStore;

    async fn manifests() -> (tempfile::TempDir, ManifestStore, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let block_store = BlockStore::open(dir.path().join("blocks")).await.unwrap();
        let blob_store = BlobStore::open(dir.path().join("layers"), block_store, 4096)
            .await
            .unwrap();
        let manifest_store = ManifestStore::open(dir.path().join("manifests"), blob_store.clone())
            .await
            .unwrap();
        (dir, manifest_store, blob_store)
    }

    async fn store_blob(dir: &tempfile::TempDir, blob_store: &BlobStore, content: &[u8]) -> BlobDigest {
        let digest = BlobDigest::of(content);
        let src = dir.path().join(format!("src-{}", digest.as_hex()));
        fs::write(&src, content).await.unwrap();
        blob_store.store(&src, &digest).await.unwrap()
    }

    fn manifest_json(config_digest: &BlobDigest, layer_digest: &BlobDigest) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "config": {"digest": config_digest.to_string(), "mediaType": "application/vnd.docker.container.image.v1+json", "size": 2},
            "layers": [{"digest": layer_digest.to_string(), "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 1}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn put_and_get_roundtrip_by_tag_and_digest() {
        let (dir, manifests, blobs) = manifests().await;
        let config = store_blob(&dir, &blobs, b"{}").await;
        let layer = store_blob(&dir, &blobs, b"A").await;
        let body = manifest_json(&config, &layer);

        let digest = manifests
            .put("library/nginx", "latest", DOCKER_MANIFEST_V2_JSON, &body)
            .await
            .unwrap();
        assert_eq!(digest, BlobDigest::of(&body));

        let (ct, got_digest, got_bytes) = manifests.get("library/nginx", "latest").await.unwrap();
        assert_eq!(ct, DOCKER_MANIFEST_V2_JSON);
        assert_eq!(got_digest, digest);
        assert_eq!(got_bytes, body);

        let (_, _, by_digest) = manifests.get("library/nginx", &digest.to_string()).await.unwrap();
        assert_eq!(by_digest, body);
    }

    #[tokio::test]
    async fn put_rejects_unsupported_content_type() {
        let (dir, manifests, blobs) = manifests().await;
        let config = store_blob(&dir, &blobs, b"{}").await;
        let layer = store_blob(&dir, &blobs, b"A").await;
        let body = manifest_json(&config, &layer);

        let err = manifests
            .put("repo", "latest", "text/plain", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedManifestContentType(_)));
    }

    #[tokio::test]
    async fn put_rejects_malformed_structure() {
        let (_dir, manifests, _blobs) = manifests().await;
        let err = manifests
            .put("repo", "latest", DOCKER_MANIFEST_V2_JSON, b"{\"not\":\"a manifest\"}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ManifestStructureInvalid(_)));
    }

    #[tokio::test]
    async fn put_rejects_missing_referenced_blob() {
        let (dir, manifests, blobs) = manifests().await;
        let config = store_blob(&dir, &blobs, b"{}").await;
        let missing = BlobDigest::parse(&format!("sha256:{}", "d".repeat(64))).unwrap();
        let body = manifest_json(&config, &missing);

        let err = manifests
            .put("repo", "latest", DOCKER_MANIFEST_V2_JSON, &body)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReferencedBlobMissing(_)));
        assert!(!dir.path().join("manifests/repo/latest").exists());
    }

    #[tokio::test]
    async fn get_unknown_reference_fails() {
        let (_dir, manifests, _blobs) = manifests().await;
        let err = manifests.get("repo", "missing").await.unwrap_err();
        assert!(matches!(err, Error::ManifestUnknown { .. }));
    }

    #[tokio::test]
    async fn tag_overwrite_leaves_old_digest_retrievable() {
        let (dir, manifests, blobs) = manifests().await;
        let config = store_blob(&dir, &blobs, b"{}").await;
        let layer_a = store_blob(&dir, &blobs, b"A").await;
        let layer_b = store_blob(&dir, &blobs, b"B").await;

        let m1 = manifest_json(&config, &layer_a);
        let digest1 = manifests
            .put("repo", "latest", DOCKER_MANIFEST_V2_JSON, &m1)
            .await
            .unwrap();

        let m2 = manifest_json(&config, &layer_b);
        let digest2 = manifests
            .put("repo", "latest", DOCKER_MANIFEST_V2_JSON, &m2)
            .await
            .unwrap();

        let (_, _, latest_bytes) = manifests.get("repo", "latest").await.unwrap();
        assert_eq!(latest_bytes, m2);

        let (_, _, by_old_digest) = manifests.get("repo", &digest1.to_string()).await.unwrap();
        assert_eq!(by_old_digest, m1);

        let (_, _, by_new_digest) = manifests.get("repo", &digest2.to_string()).await.unwrap();
        assert_eq!(by_new_digest, m2);
    }
}
