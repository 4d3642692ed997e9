//! S3 adapter.
//!
//! Implements the `tga-core` ArtifactSink over AWS S3 or any S3-compatible
//! store reachable through a custom endpoint.

use std::path::Path;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client as S3Client,
};

use tga_core::{errors::Error, ports::ArtifactSink, Result};

/// us-east-1 is the default location and rejects an explicit constraint.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug)]
pub struct S3Settings {
    pub region: String,
    pub bucket: String,
    /// S3-compatible endpoint (MinIO, localstack). Implies path-style addressing.
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct S3Sink {
    client: S3Client,
    bucket: String,
    region: String,
    base_url: String,
}

impl S3Sink {
    /// Credentials come from the default AWS provider chain.
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let region = Region::new(settings.region.clone());
        let region_provider = RegionProviderChain::first_try(region.clone());
        let aws_cfg = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = S3ConfigBuilder::from(&aws_cfg).region(region);
        if let Some(ep) = &settings.endpoint {
            s3_builder = s3_builder.endpoint_url(ep).force_path_style(true);
        }
        let client = S3Client::from_conf(s3_builder.build());

        Self {
            client,
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
            base_url: base_url(&settings.bucket, &settings.region, settings.endpoint.as_deref()),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        object_url(&self.base_url, key)
    }

    async fn create_bucket(&self) -> Result<()> {
        let mut req = self.client.create_bucket().bucket(&self.bucket);
        if let Some(cfg) = location_config(&self.region) {
            req = req.create_bucket_configuration(cfg);
        }
        match req.send().await {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, "bucket created");
                Ok(())
            }
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(e) => {
                tracing::error!(bucket = %self.bucket, error = %DisplayErrorContext(&e), "bucket creation failed");
                Err(Error::SinkUnavailable(format!(
                    "Failed to create bucket '{}': {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                )))
            }
        }
    }
}

#[async_trait]
impl ArtifactSink for S3Sink {
    fn container(&self) -> &str {
        &self.bucket
    }

    async fn ensure_container(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::debug!(bucket = %self.bucket, "bucket exists");
                Ok(())
            }
            // Any failed check (missing, forbidden, odd region) falls through to create;
            // the create error is the one worth reporting.
            Err(e) => {
                tracing::debug!(bucket = %self.bucket, error = %DisplayErrorContext(&e), "bucket check failed, creating");
                self.create_bucket().await
            }
        }
    }

    async fn put_object(&self, key: &str, local_path: &Path) -> Result<String> {
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            Error::SinkWrite(format!("cannot read {}: {e}", local_path.display()))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::SinkWrite(format!(
                    "upload of '{key}' to '{}' failed: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(self.public_url(key))
    }
}

fn location_config(region: &str) -> Option<CreateBucketConfiguration> {
    if region == DEFAULT_REGION {
        return None;
    }
    Some(
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build(),
    )
}

fn base_url(bucket: &str, region: &str, endpoint: Option<&str>) -> String {
    match endpoint {
        Some(ep) => format!("{}/{}", ep.trim_end_matches('/'), bucket),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com"),
    }
}

fn object_url(base_url: &str, key: &str) -> String {
    format!("{base_url}/{}", key.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_hosted_url_for_aws() {
        let base = base_url("tg-archive", "eu-west-1", None);
        assert_eq!(
            object_url(&base, "telegram_channelX_2024_01_02.json"),
            "https://tg-archive.s3.eu-west-1.amazonaws.com/telegram_channelX_2024_01_02.json"
        );
    }

    #[test]
    fn path_style_url_for_custom_endpoint() {
        let base = base_url("tg-archive", "us-east-1", Some("http://localhost:9000/"));
        assert_eq!(object_url(&base, "k.json"), "http://localhost:9000/tg-archive/k.json");
    }

    #[test]
    fn location_constraint_omitted_for_default_region() {
        assert!(location_config("us-east-1").is_none());
        let cfg = location_config("eu-central-1").unwrap();
        assert_eq!(
            cfg.location_constraint(),
            Some(&BucketLocationConstraint::EuCentral1)
        );
    }

    #[tokio::test]
    async fn sink_reports_bucket_and_urls() {
        let sink = S3Sink::from_settings(&S3Settings {
            region: "eu-west-1".into(),
            bucket: "tg-archive".into(),
            endpoint: None,
        })
        .await;
        assert_eq!(sink.container(), "tg-archive");
        assert_eq!(
            sink.public_url("a.json"),
            "https://tg-archive.s3.eu-west-1.amazonaws.com/a.json"
        );
    }
}
