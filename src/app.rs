use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::ResolvedJob;
use crate::error::CdsError;
use crate::expand::expand;
use crate::filter::EXCLUDED_KEYS;
use crate::metadata::{MetadataClient, ProductMetadata};
use crate::naming::artifact_name;
use crate::orchestrator::{CancelToken, DownloadOrchestrator, RunReport};
use crate::split::plan_split_keys;
use crate::store::Storage;
use crate::transfer::TransferClient;
use crate::update::{
    UpdateOptions, UpdateReport, apply_update, lag_behind, parse_latency_days, plan_latest,
    plan_update,
};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub product_id: String,
    pub split_keys: Vec<String>,
    pub report: RunReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub product_id: String,
    pub split_keys: Vec<String>,
    pub selection_limit: Option<u64>,
    pub artifacts: Vec<PlannedArtifact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedArtifact {
    pub artifact: String,
    pub split_values: Vec<String>,
    pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<M: MetadataClient, T: TransferClient> {
    metadata: M,
    transfer: Arc<T>,
    cancel: CancelToken,
}

impl<M: MetadataClient, T: TransferClient + 'static> App<M, T> {
    pub fn new(metadata: M, transfer: T) -> Self {
        Self {
            metadata,
            transfer: Arc::new(transfer),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Split keys and artifact names for `job`, without downloading.
    pub fn plan(
        &self,
        job: &ResolvedJob,
        destination: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<PlanResult, CdsError> {
        let (split_keys, selection_limit) = self.resolve_split_keys(job, sink)?;
        let storage = destination.map(Storage::from_path).transpose()?;

        let artifacts = expand(&job.filter, &split_keys)?
            .map(|sub| {
                let artifact = artifact_name(&sub, &job.product_id);
                PlannedArtifact {
                    exists: storage
                        .as_ref()
                        .map(|storage| storage.exists(&artifact))
                        .unwrap_or(false),
                    split_values: sub.split_tuple(),
                    artifact,
                }
            })
            .collect();

        Ok(PlanResult {
            product_id: job.product_id.clone(),
            split_keys,
            selection_limit,
            artifacts,
        })
    }

    pub fn download(
        &self,
        job: &ResolvedJob,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, CdsError> {
        let storage = Storage::from_path(destination)?;
        storage.ensure_root()?;
        let (split_keys, _) = self.resolve_split_keys(job, sink)?;
        let sub_filters = expand(&job.filter, &split_keys)?;

        sink.event(ProgressEvent {
            message: format!("phase=Download; {} sub-requests", sub_filters.len()),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let report = self.orchestrator(job).run(
            &job.product_id,
            sub_filters,
            &storage,
            job.overwrite,
        )?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; downloaded={} skipped={} failed={}",
                report.downloaded(),
                report.skipped(),
                report.failed()
            ),
            elapsed: Some(start.elapsed()),
        });

        Ok(DownloadResult {
            product_id: job.product_id.clone(),
            split_keys,
            report,
        })
    }

    /// Fetches the artifacts missing from `destination` up to the cutoff and
    /// refreshes the most recent one.
    pub fn update(
        &self,
        job: &ResolvedJob,
        destination: &Path,
        options: &UpdateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<UpdateReport, CdsError> {
        let storage = Storage::from_path(destination)?;
        let metadata = self.fetch_metadata(&job.product_id, sink)?;
        let split_keys = match &job.split_keys {
            Some(keys) => keys.clone(),
            None => plan_split_keys(&job.filter, EXCLUDED_KEYS, metadata.selection_limit)?,
        };

        sink.event(ProgressEvent {
            message: "phase=Plan; comparing storage with the product domain".to_string(),
            elapsed: None,
        });
        let plan = plan_update(&job.filter, &metadata, &storage, &split_keys, options)?;
        sink.event(ProgressEvent {
            message: format!("phase=Download; {} missing", plan.missing.len()),
            elapsed: None,
        });

        let start = std::time::Instant::now();
        let report = apply_update(&self.orchestrator(job), &job.product_id, plan, &storage)?;
        sink.event(ProgressEvent {
            message: format!("phase=Done; relocated={}", report.relocations.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    /// Downloads the day `latency` before `now`, always overwriting.
    pub fn update_latest(
        &self,
        job: &ResolvedJob,
        destination: &Path,
        latency: &str,
        now: NaiveDateTime,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, CdsError> {
        let at = lag_behind(now, parse_latency_days(latency)?, latency)?;
        let storage = Storage::from_path(destination)?;
        storage.ensure_root()?;
        let metadata = self.fetch_metadata(&job.product_id, sink)?;
        let sub_filters = plan_latest(&job.filter, &metadata, job.split_keys.as_deref(), at)?;
        let split_keys = sub_filters
            .first()
            .map(|sub| sub.split_keys().map(str::to_string).collect())
            .unwrap_or_default();

        sink.event(ProgressEvent {
            message: format!("phase=Download; {} for {}", sub_filters.len(), at.date()),
            elapsed: None,
        });
        let report = self
            .orchestrator(job)
            .run(&job.product_id, sub_filters, &storage, true)?;

        Ok(DownloadResult {
            product_id: job.product_id.clone(),
            split_keys,
            report,
        })
    }

    fn orchestrator(&self, job: &ResolvedJob) -> DownloadOrchestrator<T> {
        DownloadOrchestrator::new(Arc::clone(&self.transfer), job.pool.clone())
            .with_cancel_token(self.cancel.clone())
    }

    fn fetch_metadata(
        &self,
        product_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<ProductMetadata, CdsError> {
        sink.event(ProgressEvent {
            message: "metadata.request".to_string(),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let metadata = self.metadata.product_metadata(product_id)?;
        let latency = start.elapsed().as_millis();
        sink.event(ProgressEvent {
            message: format!("metadata.response latency_ms={latency}"),
            elapsed: None,
        });
        Ok(metadata)
    }

    /// Explicit split keys are used as given; otherwise the store's selection
    /// limit decides.
    fn resolve_split_keys(
        &self,
        job: &ResolvedJob,
        sink: &dyn ProgressSink,
    ) -> Result<(Vec<String>, Option<u64>), CdsError> {
        if let Some(keys) = &job.split_keys {
            return Ok((keys.clone(), None));
        }
        let metadata = self.fetch_metadata(&job.product_id, sink)?;
        let keys = plan_split_keys(&job.filter, EXCLUDED_KEYS, metadata.selection_limit)?;
        Ok((keys, Some(metadata.selection_limit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use std::sync::Mutex;

    struct Silent;

    impl ProgressSink for Silent {
        fn event(&self, _event: ProgressEvent) {}
    }

    #[derive(Default)]
    struct CountingMetadata {
        calls: Mutex<usize>,
    }

    impl MetadataClient for CountingMetadata {
        fn product_metadata(&self, _product_id: &str) -> Result<ProductMetadata, CdsError> {
            *self.calls.lock().unwrap() += 1;
            Ok(ProductMetadata {
                selection_limit: 2,
                dimensions: Vec::new(),
            })
        }
    }

    struct NoTransfer;

    impl TransferClient for NoTransfer {
        fn retrieve(&self, _: &str, _: &Filter, _: &Path) -> Result<(), CdsError> {
            Err(CdsError::DownloadFailed("not expected".to_string()))
        }
    }

    fn job() -> ResolvedJob {
        let filter: Filter =
            serde_json::from_str(r#"{"year": ["1980", "1981"], "month": ["01", "02"]}"#).unwrap();
        ResolvedJob::new("p", filter)
    }

    #[test]
    fn explicit_split_keys_skip_metadata() {
        let app = App::new(CountingMetadata::default(), NoTransfer);
        let mut job = job();
        job.split_keys = Some(vec!["year".to_string(), "month".to_string()]);

        let plan = app.plan(&job, None, &Silent).unwrap();
        assert_eq!(plan.artifacts.len(), 4);
        assert_eq!(plan.selection_limit, None);
        assert_eq!(*app.metadata.calls.lock().unwrap(), 0);
    }

    #[test]
    fn planned_split_keys_follow_selection_limit() {
        let app = App::new(CountingMetadata::default(), NoTransfer);
        let plan = app.plan(&job(), None, &Silent).unwrap();
        assert_eq!(plan.split_keys, vec!["year"]);
        assert_eq!(plan.selection_limit, Some(2));
        assert_eq!(plan.artifacts[0].artifact, "1980_p.grib");
        assert!(plan.artifacts.iter().all(|item| !item.exists));
    }
}
