use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CdsError;
use crate::filter::Filter;
use crate::orchestrator::{DEFAULT_CONCURRENCY, PoolOptions};

pub const DEFAULT_JOB_FILE: &str = "cds-job.json";

#[derive(Debug, Deserialize, Serialize)]
pub struct JobConfig {
    #[serde(alias = "cds_product")]
    pub product_id: String,
    #[serde(alias = "cds_filter")]
    pub filter: Filter,
    #[serde(default)]
    pub split_keys: Option<Vec<String>>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub product_id: String,
    pub filter: Filter,
    pub split_keys: Option<Vec<String>>,
    pub overwrite: bool,
    pub pool: PoolOptions,
}

impl ResolvedJob {
    pub fn new(product_id: impl Into<String>, filter: Filter) -> Self {
        Self {
            product_id: product_id.into(),
            filter,
            split_keys: None,
            overwrite: false,
            pool: PoolOptions::default(),
        }
    }
}

/// Command-line values that take precedence over the job file.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub split_keys: Vec<String>,
    pub overwrite: bool,
    pub concurrency: Option<usize>,
    pub task_timeout_secs: Option<u64>,
}

impl JobOverrides {
    pub fn apply(self, mut job: ResolvedJob) -> ResolvedJob {
        if !self.split_keys.is_empty() {
            job.split_keys = Some(self.split_keys);
        }
        if self.overwrite {
            job.overwrite = true;
        }
        if let Some(concurrency) = self.concurrency {
            job.pool.concurrency = concurrency.max(1);
        }
        if let Some(secs) = self.task_timeout_secs {
            job.pool.task_timeout = Some(Duration::from_secs(secs));
        }
        job
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedJob, CdsError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_JOB_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CdsError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CdsError::ConfigRead(config_path.clone()))?;
        let config: JobConfig = serde_json::from_str(&content)
            .map_err(|err| CdsError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: JobConfig) -> Result<ResolvedJob, CdsError> {
        if config.product_id.trim().is_empty() {
            return Err(CdsError::ConfigParse("product_id is empty".to_string()));
        }
        if config.filter.is_empty() {
            return Err(CdsError::InvalidFilter("filter has no keys".to_string()));
        }

        let pool = PoolOptions {
            concurrency: config.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            task_timeout: config.task_timeout_secs.map(Duration::from_secs),
        };

        Ok(ResolvedJob {
            product_id: config.product_id,
            filter: config.filter,
            split_keys: config.split_keys,
            overwrite: config.overwrite.unwrap_or(false),
            pool,
        })
    }
}
