use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::CdsError;
use crate::filter::Filter;

pub const DEFAULT_RETRIEVE_TOOL: &str = "cds-retrieve";

/// Performs the actual retrieval of one request into `destination`.
pub trait TransferClient: Send + Sync {
    fn retrieve(&self, product_id: &str, request: &Filter, destination: &Path)
    -> Result<(), CdsError>;
}

/// Delegates retrieval to an external tool invoked as
/// `<tool> <product_id> <request.json> <destination>`.
///
/// Credentials are the tool's concern (e.g. `CDSAPI_URL`/`CDSAPI_KEY` in its
/// environment or its own rc file).
#[derive(Debug, Clone)]
pub struct CommandTransferClient {
    program: Option<PathBuf>,
    name: String,
}

impl CommandTransferClient {
    pub fn new() -> Self {
        let name = std::env::var("CDS_RETRIEVE_TOOL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RETRIEVE_TOOL.to_string());
        Self::with_program(name)
    }

    pub fn with_program(name: impl Into<String>) -> Self {
        let name = name.into();
        let candidate = PathBuf::from(&name);
        let program = if candidate.components().count() > 1 {
            candidate.exists().then_some(candidate)
        } else {
            find_in_path(&name)
        };
        Self { program, name }
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn require_program(&self) -> Result<&PathBuf, CdsError> {
        self.program
            .as_ref()
            .ok_or_else(|| CdsError::MissingTool(self.name.clone()))
    }
}

impl Default for CommandTransferClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferClient for CommandTransferClient {
    fn retrieve(
        &self,
        product_id: &str,
        request: &Filter,
        destination: &Path,
    ) -> Result<(), CdsError> {
        let program = self.require_program()?;

        let mut request_file = tempfile::Builder::new()
            .prefix("cds-request")
            .suffix(".json")
            .tempfile()
            .map_err(|err| CdsError::Filesystem(err.to_string()))?;
        let body = serde_json::to_vec_pretty(request)
            .map_err(|err| CdsError::DownloadFailed(err.to_string()))?;
        request_file
            .write_all(&body)
            .and_then(|_| request_file.flush())
            .map_err(|err| CdsError::Filesystem(err.to_string()))?;

        debug!(
            program = %program.display(),
            product = product_id,
            destination = %destination.display(),
            "invoking retrieve tool"
        );
        let output = Command::new(program)
            .arg(product_id)
            .arg(request_file.path())
            .arg(destination)
            .output()
            .map_err(|err| CdsError::DownloadFailed(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program.display(), output.status)
        } else {
            stderr
        };
        Err(CdsError::DownloadFailed(message))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
