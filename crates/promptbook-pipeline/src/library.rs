//! A collection of validated pipelines addressed by their URL.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use promptbook_types::{PromptbookError, Result};

use crate::compiler::compile;
use crate::validation::{validate_pipeline, ValidatedPipeline};

/// File suffix of pipeline sources picked up by [`PipelineLibrary::from_directory`].
pub const PIPELINE_FILE_SUFFIX: &str = ".ptbk.md";

#[derive(Debug, Clone, Default)]
pub struct PipelineLibrary {
    pipelines: BTreeMap<String, Arc<ValidatedPipeline>>,
}

impl PipelineLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and validate every source, then add them all.
    pub fn from_sources(sources: &[&str]) -> Result<Self> {
        let mut library = Self::new();
        for source in sources {
            library.add(validate_pipeline(compile(source)?)?)?;
        }
        Ok(library)
    }

    /// Load every `*.ptbk.md` file directly inside `dir`, in file name order.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_pipeline = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(PIPELINE_FILE_SUFFIX));
            if path.is_file() && is_pipeline {
                paths.push(path);
            }
        }
        paths.sort();

        let mut library = Self::new();
        for path in paths {
            let source = std::fs::read_to_string(&path)?;
            let pipeline = compile(&source)
                .and_then(validate_pipeline)
                .map_err(|e| {
                    PromptbookError::Other(format!("{}: {e}", path.display()))
                })?;
            library.add(pipeline)?;
        }
        tracing::debug!(dir = %dir.display(), pipelines = library.len(), "loaded pipeline library");
        Ok(library)
    }

    /// Add a pipeline; its URL must be present and not yet taken.
    pub fn add(&mut self, pipeline: ValidatedPipeline) -> Result<Arc<ValidatedPipeline>> {
        let url = pipeline.pipeline_url.clone().ok_or_else(|| {
            PromptbookError::Logic(format!(
                "Pipeline \"{}\" has no PROMPTBOOK URL and can not be added to a library",
                pipeline.title
            ))
        })?;
        if self.pipelines.contains_key(&url) {
            return Err(PromptbookError::Logic(format!(
                "Pipeline with URL {url} is already in the library"
            )));
        }
        let shared = Arc::new(pipeline);
        self.pipelines.insert(url, shared.clone());
        Ok(shared)
    }

    pub fn get(&self, url: &str) -> Option<Arc<ValidatedPipeline>> {
        self.pipelines.get(url).cloned()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
