use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::time::Duration;

/// Every object-store call is bounded; a hung listing must not stall a tick.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One object found under the export prefix.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Client for the S3-compatible object store holding the daily exports.
pub struct ObjectStoreClient {
    bucket: Box<Bucket>,
}

impl ObjectStoreClient {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// List objects under the export prefix.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
        let pages = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.bucket.list(prefix.to_string(), None),
        )
        .await
        .map_err(|_| StorageError::Timeout(prefix.to_string()))?
        .map_err(StorageError::S3)?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| ObjectSummary {
                key: object.key,
                size: object.size,
            })
            .collect())
    }

    /// Download one archive's bytes.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.bucket.get_object(key))
            .await
            .map_err(|_| StorageError::Timeout(key.to_string()))?
            .map_err(StorageError::S3)?;

        Ok(response.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 operation timed out: {0}")]
    Timeout(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
