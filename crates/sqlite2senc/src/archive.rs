//! Chart-set zip output: every cell under `<set>/`, then a `Chartinfo.txt`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::convert::tmp_path;

pub const CHART_INFO_FILE: &str = "Chartinfo.txt";

/// Write `cells` (entry name, SENC bytes) as one chart set. The archive is
/// built next to `zip_path` and only renamed into place once complete.
pub fn write_chart_set(zip_path: &Path, set_name: &str, cells: &[(String, Vec<u8>)]) -> Result<()> {
    let tmp = tmp_path(zip_path);
    let result = write_archive(&tmp, set_name, cells)
        .and_then(|_| fs::rename(&tmp, zip_path).with_context(|| format!("renaming {}", tmp.display())));

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp) {
            debug!("could not remove {}: {}", tmp.display(), e);
        }
    } else {
        info!("wrote {} cells to {}", cells.len(), zip_path.display());
    }
    result
}

fn write_archive(path: &Path, set_name: &str, cells: &[(String, Vec<u8>)]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in cells {
        let entry = format!("{}/{}", set_name, name);
        debug!("adding {}", entry);
        zip.start_file(entry, options)?;
        zip.write_all(bytes)?;
    }

    zip.start_file(format!("{}/{}", set_name, CHART_INFO_FILE), options)?;
    writeln!(zip, "ChartInfo:{}", set_name)?;

    let mut out = zip.finish()?;
    out.flush()?;
    Ok(())
}
