// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Fans independent per-file tasks out over a bounded pool of blocking
//! workers. A failing (or panicking) task is recorded and does not stop the
//! others.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::ImageFormat;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dot_counts::{count_dots, CountParams, DotCountRecord};
use crate::error::{QuantError, Result};
use crate::image_tiff::{ChannelImage, ChannelOrder, SaveChannels};

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub workers: usize,
    /// Matched case-insensitively, without the dot.
    pub extensions: Vec<String>,
    pub channel_order: ChannelOrder,
    /// If given, failures are appended here as `path<TAB>error` lines.
    pub error_log: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        BatchOptions{workers,
                     extensions: vec!["tif".to_string(), "tiff".to_string()],
                     channel_order: ChannelOrder::Rgb,
                     error_log: None}
    }
}

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// All files under `root` (recursively) with one of `extensions`, sorted.
/// Symbolic links are not followed.
pub fn discover_images(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_extension(&path, extensions) {
                found.push(path);
            }
        }
    }
    if found.is_empty() {
        return Err(QuantError::NoImages(root.to_path_buf()));
    }
    found.sort();
    Ok(found)
}

/// Where the processed copy of `input` goes: the same relative location
/// under `output_root` as `input` has under `input_root`, named
/// `<stem>_Processed.tif`.
pub fn processed_output_path(input: &Path, input_root: &Path, output_root: &Path) -> PathBuf {
    let relative_dir = input.strip_prefix(input_root).ok()
        .and_then(|rel| rel.parent())
        .unwrap_or_else(|| Path::new(""));
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_root.join(relative_dir).join(format!("{}_Processed.tif", stem))
}

/// Runs `task` on every item with at most `workers` running at once.
/// Outcomes are returned in the order of `items`.
pub async fn run_pool<I, T, F>(items: Vec<I>, workers: usize, task: F)
                               -> Result<Vec<TaskOutcome<T>>>
where I: Send + 'static,
      T: Send + 'static,
      F: Fn(I) -> Result<T> + Send + Sync + 'static
{
    if workers == 0 {
        return Err(QuantError::NoWorkers);
    }
    let task = Arc::new(task);
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set = JoinSet::new();
    let count = items.len();
    for (index, item) in items.into_iter().enumerate() {
        let task = task.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            // Held until the blocking work finishes. The semaphore is never
            // closed.
            let _permit = semaphore.acquire_owned().await.ok();
            let result = tokio::task::spawn_blocking(move || task(item)).await;
            let outcome = match result {
                Ok(Ok(value)) => TaskOutcome::Done(value),
                Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                Err(e) => TaskOutcome::Failed(format!("task panicked: {}", e)),
            };
            (index, outcome)
        });
    }
    let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, outcome) = joined?;
        outcomes[index] = Some(outcome);
    }
    Ok(outcomes.into_iter()
       .map(|o| o.unwrap_or_else(|| TaskOutcome::Failed("task did not run".to_string())))
       .collect())
}

pub fn write_error_log(path: &Path, failures: &[(PathBuf, String)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut log = BufWriter::new(
        File::options().create(true).append(true).open(path)?);
    for (failed_path, message) in failures {
        writeln!(log, "{}\t{}", failed_path.display(), message.replace('\n', " "))?;
    }
    log.flush()?;
    Ok(())
}

fn finish_failures(failures: &[(PathBuf, String)], options: &BatchOptions) -> Result<()> {
    for (path, message) in failures {
        error!("{:?} failed: {}", path, message);
    }
    if let Some(log_path) = &options.error_log {
        if !failures.is_empty() {
            write_error_log(log_path, failures)?;
            warn!("{} failures logged to {:?}", failures.len(), log_path);
        }
    }
    Ok(())
}

/// `<output>.partial`, where `output` is written until complete.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

// Only a completely written image ever appears under `output`, so a later
// run never skips a truncated one.
fn save_complete(image: &ChannelImage, output: &Path) -> Result<()> {
    let format = ImageFormat::from_path(output)?;
    let partial = partial_path(output);
    if let Err(e) = image.save_as(&partial, SaveChannels::All, format) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, output)?;
    Ok(())
}

enum ImageOutcome {
    Processed(PathBuf),
    Skipped(PathBuf),
}

/// Applies `op` to each image under `input_root` and saves the result under
/// `output_root`; images whose output already exists are skipped.
pub async fn process_images<F>(input_root: &Path, output_root: &Path, options: &BatchOptions,
                               op: F) -> Result<BatchReport>
where F: Fn(&mut ChannelImage) -> Result<()> + Send + Sync + 'static
{
    let start = Instant::now();
    let images = discover_images(input_root, &options.extensions)?;
    info!("Processing {} images under {:?} with {} workers",
          images.len(), input_root, options.workers);
    let input_root_owned = input_root.to_path_buf();
    let output_root_owned = output_root.to_path_buf();
    let order = options.channel_order;
    let outcomes = run_pool(images.clone(), options.workers, move |path: PathBuf| {
        let output = processed_output_path(&path, &input_root_owned, &output_root_owned);
        if output.exists() {
            info!("{:?} already exists", output);
            return Ok(ImageOutcome::Skipped(output));
        }
        let mut image = ChannelImage::load(&path, order)?;
        op(&mut image)?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        save_complete(&image, &output)?;
        info!("{:?} processed and saved as {:?}", path, output);
        Ok(ImageOutcome::Processed(output))
    }).await?;

    let mut report = BatchReport::default();
    for (path, outcome) in images.into_iter().zip(outcomes) {
        match outcome {
            TaskOutcome::Done(ImageOutcome::Processed(out)) => report.processed.push(out),
            TaskOutcome::Done(ImageOutcome::Skipped(out)) => report.skipped.push(out),
            TaskOutcome::Failed(message) => report.failed.push((path, message)),
        }
    }
    finish_failures(&report.failed, options)?;
    info!("Processed {}, skipped {}, failed {} in {:?}",
          report.processed.len(), report.skipped.len(), report.failed.len(), start.elapsed());
    Ok(report)
}

/// Dot counts for every image under `input_root`, in path order, plus the
/// images that failed.
pub async fn count_images(input_root: &Path, options: &BatchOptions, params: &CountParams)
                          -> Result<(Vec<DotCountRecord>, Vec<(PathBuf, String)>)> {
    let start = Instant::now();
    let images = discover_images(input_root, &options.extensions)?;
    let total = images.len();
    info!("Counting dots in {} images with {} workers", total, options.workers);
    let params = CountParams{channel_order: options.channel_order, ..params.clone()};
    let outcomes = run_pool(images.clone(), options.workers,
                            move |path: PathBuf| count_dots(&path, &params)).await?;
    let mut records = Vec::new();
    let mut failures = Vec::new();
    for (path, outcome) in images.into_iter().zip(outcomes) {
        match outcome {
            TaskOutcome::Done(record) => records.push(record),
            TaskOutcome::Failed(message) => failures.push((path, message)),
        }
    }
    finish_failures(&failures, options)?;
    info!("Counted {}/{} images in {:?}", records.len(), total, start.elapsed());
    Ok((records, failures))
}

// mod tests.
