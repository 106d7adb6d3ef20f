//! Structured lifecycle events for generation and artifact staging.
//!
//! Each emitter logs one `event = "..."` line with stable field names so log
//! aggregation can key on them.

use tracing::{info, warn};

/// RAII guard that tags every log line with the pipeline id while alive.
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    pub fn enter(pipeline_id: &str) -> Self {
        let span = tracing::info_span!("pipegen.pipeline", pipeline_id = %pipeline_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_pipeline_generated(kind: &str, stages: usize, jobs: usize) {
    info!(event = "pipeline.generated", kind = %kind, stages = stages, jobs = jobs);
}

pub fn emit_bundle_uploaded(key: &str, files: usize, bytes: usize, digest: &str) {
    info!(
        event = "bundle.uploaded",
        key = %key,
        files = files,
        bytes = bytes,
        digest = %digest,
    );
}

pub fn emit_bundle_downloaded(key: &str, entries: usize) {
    info!(event = "bundle.downloaded", key = %key, entries = entries);
}

/// A download matched nothing; later build steps decide whether that matters.
pub fn emit_artifact_miss(prefix: &str) {
    warn!(event = "bundle.miss", prefix = %prefix);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_span_create() {
        let _span = PipelineSpan::enter("4242");
        emit_pipeline_generated("host", 5, 12);
    }
}
