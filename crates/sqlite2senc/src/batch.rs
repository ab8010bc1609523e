//! Input discovery and per-file job planning for the command line driver.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::warn;
use rayon::prelude::*;
use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    File,
    Directory,
    Zip,
}

/// One database and where its cell goes. For zip output `output` is the
/// entry name inside the chart set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

pub fn is_sqlite(path: &Path) -> bool {
    has_extension(path, "sqlite")
}

pub fn is_zip(path: &Path) -> bool {
    has_extension(path, "zip")
}

pub fn target_kind(output: &Path, input_is_dir: bool) -> Target {
    if is_zip(output) {
        Target::Zip
    } else if input_is_dir || output.is_dir() {
        Target::Directory
    } else {
        Target::File
    }
}

/// Extract a zipped input tree into a temporary directory that lives as
/// long as the returned handle.
pub fn unpack_zip(path: &Path) -> Result<TempDir> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("reading {}", path.display()))?;
    let dir = tempfile::tempdir().context("creating unpack directory")?;
    archive
        .extract(dir.path())
        .with_context(|| format!("extracting {}", path.display()))?;
    Ok(dir)
}

pub fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input {} does not exist", input.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_sqlite(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

pub fn cell_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.senc", stem)
}

/// Pair every input with its output. Directory output mirrors the input
/// tree below `root`; two inputs landing on the same output are an error.
pub fn plan_jobs(root: &Path, inputs: &[PathBuf], target: Target, output: &Path) -> Result<Vec<Job>> {
    if target == Target::File && inputs.len() > 1 {
        bail!("{} inputs need a directory or .zip output", inputs.len());
    }
    let base = if root.is_dir() {
        root
    } else {
        root.parent().unwrap_or(root)
    };

    let jobs: Vec<Job> = inputs
        .iter()
        .map(|input| {
            let out = match target {
                Target::File => output.to_path_buf(),
                Target::Directory => {
                    let relative = input
                        .parent()
                        .and_then(|p| p.strip_prefix(base).ok())
                        .unwrap_or_else(|| Path::new(""));
                    output.join(relative).join(cell_name(input))
                }
                Target::Zip => PathBuf::from(cell_name(input)),
            };
            Job {
                input: input.clone(),
                output: out,
            }
        })
        .collect();

    let mut seen: HashMap<&Path, &Path> = HashMap::new();
    for job in &jobs {
        if let Some(other) = seen.insert(&job.output, &job.input) {
            bail!(
                "{} and {} would both be written to {}",
                other.display(),
                job.input.display(),
                job.output.display()
            );
        }
    }
    Ok(jobs)
}

/// Run `work` over every job, either stopping at the first failure or
/// collecting all of them.
pub fn run_all<T, F>(jobs: &[Job], ignore_errors: bool, work: F) -> Result<(Vec<T>, Vec<String>)>
where
    T: Send,
    F: Fn(&Job) -> Result<T> + Sync,
{
    if !ignore_errors {
        let done = jobs
            .par_iter()
            .map(|job| work(job).with_context(|| format!("converting {}", job.input.display())))
            .collect::<Result<Vec<T>>>()?;
        return Ok((done, Vec::new()));
    }

    let results: Vec<(&Job, Result<T>)> = jobs.par_iter().map(|job| (job, work(job))).collect();
    let mut done = Vec::new();
    let mut errors = Vec::new();
    for (job, result) in results {
        match result {
            Ok(v) => done.push(v),
            Err(err) => {
                warn!("Error processing {}: {:#}", job.input.display(), err);
                errors.push(format!("{}: {:#}", job.input.display(), err));
            }
        }
    }
    Ok((done, errors))
}

/// Print collected failures; any failure makes the run fail.
pub fn finish(errors: &[String], total: usize) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    eprintln!("{} of {} conversions failed:", errors.len(), total);
    for e in errors {
        eprintln!("  {}", e);
    }
    bail!("{} of {} conversions failed", errors.len(), total)
}
