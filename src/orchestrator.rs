//! Conversion orchestration: job intake, background execution, progress.
//!
//! [`Orchestrator`] is the library entry point. `start` validates nothing
//! itself (requests arrive pre-validated by their builder), registers a job,
//! and spawns its execution; callers poll `status` or subscribe by polling.
//! Two execution flows exist: per-input conversion, producing one package
//! set per input, and merge conversion, combining every input into a single
//! page run before splitting on the byte budget.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tokio::spawn;
use uuid::Uuid;

use crate::batcher::CapacityBatcher;
use crate::device;
use crate::error::{Error, Result};
use crate::generator::{EbookConvert, PackageAssembler, PackagePlan, Transcoder};
use crate::job::{CancelToken, ConversionJob, JobRegistry, Phase};
use crate::naming::{self, NameContext};
use crate::pipeline::TransformPipeline;
use crate::reader::{LocalSourceReader, SourceReader};
use crate::types::{ConversionRequest, Page, ProcessedPage};
use crate::upscale::{DisabledUpscaler, Upscaler};

/// Shared conversion service. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: JobRegistry,
    staging_root: PathBuf,
    upscaler: Arc<dyn Upscaler>,
    transcoder: Arc<dyn Transcoder>,
}

impl Orchestrator {
    /// Creates an orchestrator staging extracted archives under
    /// `staging_root`, with no AI upscaler and the default `ebook-convert`
    /// transcoder.
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            registry: JobRegistry::new(),
            staging_root: staging_root.into(),
            upscaler: Arc::new(DisabledUpscaler),
            transcoder: Arc::new(EbookConvert::default()),
        }
    }

    /// Replaces the AI upscaling backend.
    pub fn with_upscaler(mut self, upscaler: Arc<dyn Upscaler>) -> Self {
        self.upscaler = upscaler;
        self
    }

    /// Replaces the MOBI transcoder.
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Registers and starts a conversion job, returning its id immediately.
    ///
    /// Missing input paths are rejected here, before any job record exists;
    /// everything later is reported through the job itself.
    pub fn start(&self, request: ConversionRequest) -> Result<Uuid> {
        for input in &request.inputs {
            if !input.exists() {
                return Err(Error::NotFound(format!(
                    "Input does not exist: {}",
                    input.display()
                )));
            }
        }

        let job = ConversionJob::new(request.session_id.clone());
        let (job_id, cancel) = self.registry.insert(job);
        info!(
            "Starting conversion job {} ({} inputs, merge={})",
            job_id,
            request.inputs.len(),
            request.merge_files
        );

        let orchestrator = self.clone();
        spawn(async move {
            let result = orchestrator.run_job(job_id, &request, &cancel).await;
            match result {
                Ok(output_files) => {
                    orchestrator.registry.update(job_id, |job| {
                        if let Err(e) = job.complete(output_files) {
                            error!("Job {} could not complete: {}", job_id, e);
                        }
                    });
                    info!("Job {} completed", job_id);
                }
                Err(e) => {
                    error!("Job {} failed: {}", job_id, e);
                    orchestrator
                        .registry
                        .update(job_id, |job| job.fail(e.to_string()));
                }
            }
            orchestrator.cleanup_staging(job_id).await;
        });

        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub fn status(&self, job_id: Uuid) -> Result<ConversionJob> {
        self.registry
            .get(job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {}", job_id)))
    }

    pub fn list(&self) -> Vec<ConversionJob> {
        self.registry.list()
    }

    pub fn list_for_session(&self, session_id: &str) -> Vec<ConversionJob> {
        self.registry.list_for_session(session_id)
    }

    /// Requests cooperative cancellation of a running job.
    pub fn cancel(&self, job_id: Uuid) -> Result<()> {
        if self.registry.get(job_id).is_none() {
            return Err(Error::NotFound(format!("Job {}", job_id)));
        }
        self.registry.cancel(job_id);
        Ok(())
    }

    fn staging_dir(&self, job_id: Uuid) -> PathBuf {
        self.staging_root.join(job_id.to_string())
    }

    async fn cleanup_staging(&self, job_id: Uuid) {
        let dir = self.staging_dir(job_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.ok();
        }
    }

    async fn run_job(
        &self,
        job_id: Uuid,
        request: &ConversionRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<String>> {
        let reader = LocalSourceReader::new(request.extract_mode);
        let pipeline = Arc::new(TransformPipeline::new(
            request.image_options.clone(),
            request.quality,
            Arc::clone(&self.upscaler),
        ));
        let assembler = PackageAssembler::new(
            &request.output_dir,
            request.output_format,
            pipeline.target_dimensions(),
            Arc::clone(&self.transcoder),
        );

        self.advance(job_id, Phase::Extracting)?;

        let outputs = if request.merge_files {
            self.run_merge(job_id, request, cancel, &reader, &pipeline, &assembler)
                .await?
        } else {
            self.run_per_input(job_id, request, cancel, &reader, &pipeline, &assembler)
                .await?
        };

        Ok(outputs)
    }

    /// Converts each input into its own package set.
    ///
    /// Progress divides evenly across inputs; within each input's slice the
    /// first half covers extraction and the second half conversion.
    async fn run_per_input(
        &self,
        job_id: Uuid,
        request: &ConversionRequest,
        cancel: &CancelToken,
        reader: &LocalSourceReader,
        pipeline: &Arc<TransformPipeline>,
        assembler: &PackageAssembler,
    ) -> Result<Vec<String>> {
        let inputs = request.ordered_inputs();
        let input_count = inputs.len();
        let mut output_files: Vec<String> = Vec::new();
        let mut total_split = 0usize;

        for (i, input) in inputs.iter().enumerate() {
            cancel.checkpoint()?;

            let base = (i as f32 / input_count as f32) * 100.0;
            let span = 100.0 / input_count as f32;
            let input_name = input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| input.display().to_string());

            self.registry.update(job_id, |job| {
                job.current_file = Some(input_name.clone());
                job.set_progress(base);
            });

            let staging = self.staging_dir(job_id).join(format!("input_{:03}", i));
            let pages = reader.read_pages(input, &staging).await?;
            self.set_progress(job_id, base + span * 0.5);
            cancel.checkpoint()?;

            // The job enters Converting once and stays there while later
            // inputs are extracted; current_file tracks the detail.
            self.advance_if(job_id, Phase::Extracting, Phase::Converting)?;

            let registry = self.registry.clone();
            let processed = Arc::clone(pipeline)
                .process_pages(pages, cancel, move |done, total| {
                    let local = 0.5 + 0.5 * (done as f32 / total as f32);
                    registry.update(job_id, |job| job.set_progress(base + span * local));
                })
                .await?;

            let (files, split) = self
                .package(job_id, request, assembler, &processed, pipeline, i + 1)
                .await?;
            total_split += split;
            output_files.extend(files);

            let split_so_far = total_split;
            self.registry.update(job_id, |job| {
                job.split_count = split_so_far;
                job.set_progress(base + span);
            });
        }

        Ok(output_files)
    }

    /// Combines every input into one page run, then splits on the byte
    /// budget. Extraction spans progress 0-30, the merge step lands at 35,
    /// and conversion runs 40-95.
    async fn run_merge(
        &self,
        job_id: Uuid,
        request: &ConversionRequest,
        cancel: &CancelToken,
        reader: &LocalSourceReader,
        pipeline: &Arc<TransformPipeline>,
        assembler: &PackageAssembler,
    ) -> Result<Vec<String>> {
        let inputs = request.ordered_inputs();
        let input_count = inputs.len();
        let mut page_lists: Vec<Vec<Page>> = Vec::with_capacity(input_count);

        for (i, input) in inputs.iter().enumerate() {
            cancel.checkpoint()?;
            let input_name = input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| input.display().to_string());
            self.registry
                .update(job_id, |job| job.current_file = Some(input_name.clone()));

            let staging = self.staging_dir(job_id).join(format!("input_{:03}", i));
            page_lists.push(reader.read_pages(input, &staging).await?);
            self.set_progress(job_id, 30.0 * (i + 1) as f32 / input_count as f32);
        }

        cancel.checkpoint()?;
        self.advance(job_id, Phase::Merging)?;

        // Reindex across the whole run so reading order spans inputs.
        let mut merged: Vec<Page> = Vec::new();
        for pages in page_lists {
            for page in pages {
                let index = merged.len();
                merged.push(Page::new(index, page.source));
            }
        }
        self.set_progress(job_id, 35.0);

        // Pre-flight split estimate so pollers see the expected package
        // count before conversion finishes.
        let mut batcher = CapacityBatcher::new(request.max_output_size_bytes());
        let paths: Vec<PathBuf> = merged.iter().map(|p| p.source.clone()).collect();
        if let Ok(estimated) = batcher.suggest_split_count(&paths) {
            self.registry
                .update(job_id, |job| job.split_count = estimated);
        }

        cancel.checkpoint()?;
        self.advance(job_id, Phase::Converting)?;
        self.set_progress(job_id, 40.0);

        let registry = self.registry.clone();
        let processed = Arc::clone(pipeline)
            .process_pages(merged, cancel, move |done, total| {
                let progress = 40.0 + 55.0 * (done as f32 / total as f32);
                registry.update(job_id, |job| job.set_progress(progress));
            })
            .await?;

        let (files, split) = self
            .package(job_id, request, assembler, &processed, pipeline, 1)
            .await?;
        self.registry.update(job_id, |job| job.split_count = split);
        Ok(files)
    }

    /// Splits transformed pages on the byte budget and assembles each part.
    async fn package(
        &self,
        job_id: Uuid,
        request: &ConversionRequest,
        assembler: &PackageAssembler,
        pages: &[ProcessedPage],
        pipeline: &Arc<TransformPipeline>,
        index: usize,
    ) -> Result<(Vec<String>, usize)> {
        let batcher = CapacityBatcher::new(request.max_output_size_bytes());
        let ranges = batcher.split_pages(pages);
        let total_parts = ranges.len();

        let metadata = &request.metadata;
        let context = NameContext {
            series: metadata
                .series
                .clone()
                .unwrap_or_else(|| metadata.title.clone()),
            title: metadata.title.clone(),
            chapter: metadata
                .chapter
                .clone()
                .unwrap_or_else(|| index.to_string()),
            volume: metadata.volume.clone().unwrap_or_default(),
            index,
        };
        let rendered = naming::render_template(&request.naming_template, &context)?;
        let filename_base = naming::sanitize_filename(&rendered);
        let title = metadata.display_title();

        let cover_bytes = match &request.cover_image {
            Some(path) => Some(
                Arc::clone(pipeline)
                    .process_cover(path)
                    .await?,
            ),
            None => None,
        };

        let mut files = Vec::new();
        let mut warnings = Vec::new();
        for (part, range) in ranges.into_iter().enumerate() {
            let plan = PackagePlan::for_part(&filename_base, &title, part + 1, total_parts);
            // The explicit cover goes on the first part; later parts open
            // with their own first page.
            let cover = if part == 0 { cover_bytes.as_deref() } else { None };
            let assembled = assembler
                .assemble(&plan, &pages[range], metadata, cover)
                .await?;
            files.extend(
                assembled
                    .files
                    .into_iter()
                    .map(|p| p.display().to_string()),
            );
            warnings.extend(assembled.warnings);
        }

        if !warnings.is_empty() {
            let message = warnings.join("; ");
            self.registry.update(job_id, |job| {
                job.error = Some(message.clone());
            });
        }

        Ok((files, total_parts))
    }

    fn advance(&self, job_id: Uuid, next: Phase) -> Result<()> {
        let mut outcome = Ok(());
        self.registry.update(job_id, |job| {
            outcome = job.advance(next);
        });
        outcome
    }

    /// Advances only when the job currently sits in `from`; otherwise a
    /// no-op, used where a flow revisits an earlier stage.
    fn advance_if(&self, job_id: Uuid, from: Phase, next: Phase) -> Result<()> {
        let mut outcome = Ok(());
        self.registry.update(job_id, |job| {
            if job.phase == from {
                outcome = job.advance(next);
            }
        });
        outcome
    }

    fn set_progress(&self, job_id: Uuid, value: f32) {
        self.registry.update(job_id, |job| job.set_progress(value));
    }
}

/// Resolved target dimensions for a request, exposed for callers that want
/// to report them without constructing a pipeline.
pub fn request_dimensions(request: &ConversionRequest) -> (u32, u32) {
    device::resolve_dimensions(
        &request.image_options.device_profile_id,
        request.image_options.custom_width,
        request.image_options.custom_height,
    )
}
