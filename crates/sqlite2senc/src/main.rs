use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use std::{fs, path::PathBuf, sync::Arc, time::Instant};

use senc::{EdgeVectorMode, MappingCatalog, SessionOptions};
use sqlite2senc::batch::{
    collect_inputs, finish, is_zip, plan_jobs, run_all, target_kind, unpack_zip, Target,
};
use sqlite2senc::{convert_file, convert_to_writer, write_chart_set, ConvertOptions};

/// Which polygon rings get edge-vector tables.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum EdgeVectors {
    /// No edge vectors on areas.
    None,
    /// Outer ring only.
    Ext,
    /// Every ring, holes included.
    All,
}

impl std::fmt::Display for EdgeVectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeVectors::None => "none",
            EdgeVectors::Ext => "ext",
            EdgeVectors::All => "all",
        };

        f.write_str(s)
    }
}

impl From<EdgeVectors> for EdgeVectorMode {
    fn from(v: EdgeVectors) -> Self {
        match v {
            EdgeVectors::None => EdgeVectorMode::None,
            EdgeVectors::Ext => EdgeVectorMode::Exterior,
            EdgeVectors::All => EdgeVectorMode::All,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "sqlite2senc", version, about = "Convert SQLite chart databases to SENC cells")]
struct Args {
    /// A .sqlite file, or a directory or .zip searched recursively for them
    input: PathBuf,

    /// Output .senc file, output directory, or .zip chart set
    output: PathBuf,

    /// Directory with s57objectclasses.csv and s57attributes.csv
    #[arg(long, env = "SENC_S57_DIR", default_value = "s57data")]
    s57_dir: PathBuf,

    /// Where TXTDSC files are looked up (default: next to each input)
    #[arg(long)]
    basedir: Option<PathBuf>,

    /// Scale used when a database has no dsid scale
    #[arg(long)]
    scale: Option<u32>,

    #[arg(long, value_enum, default_value_t = EdgeVectors::All)]
    edge_vectors: EdgeVectors,

    /// Fail on unknown object classes and attributes instead of skipping them
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Keep going after a failed file and list all failures at the end
    #[arg(short = 'i', long, default_value_t = false)]
    ignore_errors: bool,

    /// Chart set name for .zip output (default: the zip file stem)
    #[arg(long)]
    set_name: Option<String>,

    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let started = Instant::now();

    let catalog = Arc::new(
        MappingCatalog::load_dir(&args.s57_dir)
            .with_context(|| format!("loading mapping tables from {}", args.s57_dir.display()))?,
    );
    debug!(
        "catalog: {} classes, {} attributes",
        catalog.class_count(),
        catalog.attribute_count()
    );

    let options = ConvertOptions {
        basedir: args.basedir.clone(),
        scale: args.scale,
        session: SessionOptions {
            strict: args.strict,
            edge_vectors: args.edge_vectors.into(),
        },
    };

    let unpacked = if is_zip(&args.input) && args.input.is_file() {
        info!("Unpacking {}", args.input.display());
        Some(unpack_zip(&args.input)?)
    } else {
        None
    };
    let root = match &unpacked {
        Some(dir) => dir.path().to_path_buf(),
        None => args.input.clone(),
    };

    let inputs = collect_inputs(&root)?;
    if inputs.is_empty() {
        bail!("no .sqlite files found in {}", args.input.display());
    }
    let target = target_kind(&args.output, root.is_dir());
    let jobs = plan_jobs(&root, &inputs, target, &args.output)?;
    info!("Processing {} databases ({:?} output)...", jobs.len(), target);

    let errors = match target {
        Target::File | Target::Directory => {
            if target == Target::Directory {
                fs::create_dir_all(&args.output)
                    .with_context(|| format!("creating {}", args.output.display()))?;
            }
            run_all(&jobs, args.ignore_errors, |job| {
                if job.output.exists() && !args.overwrite {
                    info!("Skipping existing file {}", job.output.display());
                    return Ok(());
                }
                if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                convert_file(Arc::clone(&catalog), &job.input, &job.output, &options).map(|_| ())
            })?
            .1
        }
        Target::Zip => {
            if args.output.exists() && !args.overwrite {
                info!("Skipping existing file {}", args.output.display());
                return Ok(());
            }
            let set_name = match &args.set_name {
                Some(name) => name.clone(),
                None => args
                    .output
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "charts".to_string()),
            };
            let (cells, errors) = run_all(&jobs, args.ignore_errors, |job| {
                let mut bytes = Vec::new();
                convert_to_writer(Arc::clone(&catalog), &job.input, &mut bytes, &options)?;
                Ok((job.output.to_string_lossy().into_owned(), bytes))
            })?;
            write_chart_set(&args.output, &set_name, &cells)?;
            errors
        }
    };

    info!("Done in {:.1}s", started.elapsed().as_secs_f64());
    finish(&errors, jobs.len())
}
