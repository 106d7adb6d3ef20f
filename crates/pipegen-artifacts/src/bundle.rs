//! Bundle keys and retention tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

pub const BUNDLE_EXTENSION: &str = ".tar.gz";
pub const FAILED_SUFFIX: &str = "-failed";

/// Address of one job's bundle: `<pipeline>/<stage>[-failed]/<job>.tar.gz`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleKey {
    pub pipeline_id: String,
    pub stage: String,
    pub job: String,
    /// Bundle captured by the failure hook rather than a successful run.
    pub failed: bool,
}

impl BundleKey {
    pub fn new(
        pipeline_id: impl Into<String>,
        stage: impl Into<String>,
        job: impl Into<String>,
    ) -> StorageResult<Self> {
        let key = Self {
            pipeline_id: pipeline_id.into(),
            stage: stage.into(),
            job: job.into(),
            failed: false,
        };
        for component in [&key.pipeline_id, &key.stage, &key.job] {
            validate_component(component)?;
        }
        Ok(key)
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Prefix every bundle of a pipeline lives under.
    pub fn pipeline_prefix(pipeline_id: &str) -> String {
        format!("{pipeline_id}/")
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.failed { FAILED_SUFFIX } else { "" };
        write!(
            f,
            "{}/{}{}/{}{}",
            self.pipeline_id, self.stage, suffix, self.job, BUNDLE_EXTENSION
        )
    }
}

fn validate_component(component: &str) -> StorageResult<()> {
    let reason = if component.is_empty() {
        "must not be empty"
    } else if component.contains('/') {
        "must not contain `/`"
    } else if component == "." || component == ".." {
        "must not be a relative path segment"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidKey {
        component: component.to_string(),
        reason: reason.to_string(),
    })
}

/// Retention tag attached to a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum BundleTag {
    SuccessfulJob,
    FailedJob,
    Custom(String),
}

impl BundleTag {
    pub fn as_str(&self) -> &str {
        match self {
            BundleTag::SuccessfulJob => "successful-job",
            BundleTag::FailedJob => "failed-job",
            BundleTag::Custom(tag) => tag,
        }
    }
}

impl fmt::Display for BundleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for BundleTag {
    fn from(s: String) -> Self {
        match s.as_str() {
            "successful-job" => BundleTag::SuccessfulJob,
            "failed-job" => BundleTag::FailedJob,
            _ => BundleTag::Custom(s),
        }
    }
}

impl From<BundleTag> for String {
    fn from(tag: BundleTag) -> Self {
        tag.as_str().to_string()
    }
}

impl FromStr for BundleTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BundleTag::from(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = BundleKey::new("4242", "build", "build:centos7").unwrap();
        assert_eq!(key.to_string(), "4242/build/build:centos7.tar.gz");
        assert_eq!(
            key.failed().to_string(),
            "4242/build-failed/build:centos7.tar.gz"
        );
    }

    #[test]
    fn test_key_rejects_slash_and_empty() {
        assert!(matches!(
            BundleKey::new("4242", "build/x", "job"),
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(matches!(
            BundleKey::new("", "build", "job"),
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(BundleKey::new("4242", "..", "job").is_err());
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!("successful-job".parse::<BundleTag>().unwrap(), BundleTag::SuccessfulJob);
        assert_eq!("failed-job".parse::<BundleTag>().unwrap(), BundleTag::FailedJob);
        assert_eq!(
            "nightly".parse::<BundleTag>().unwrap(),
            BundleTag::Custom("nightly".to_string())
        );
    }
}
