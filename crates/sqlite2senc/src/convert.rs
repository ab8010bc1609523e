//! One SQLite database to one SENC cell.
//!
//! The database carries a `geometry_columns` table naming, per feature
//! table, its WKB geometry column. Every other column of a feature table is
//! an attribute. An optional `dsid` table overrides header fields.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};

use senc::{
    parse_wkb, AttributeValue, Extent, FeatureAttribute, GeoPoint, Geometry, MappingCatalog,
    SencHeader, SencSession, SessionOptions,
};

/// Table that gets sounding batching instead of one feature per row.
pub const SOUNDING_TABLE: &str = "soundg";

/// Sounding columns that split the batches.
const SOUNDING_GROUP_COLUMNS: [&str; 2] = ["SCAMIN", "SCAMAX"];

const TEXT_COLUMN: &str = "TXTDSC";

/// Header box when the database holds no geometry at all.
const FALLBACK_NW: (f64, f64) = (-179.0, 80.0);
const FALLBACK_SE: (f64, f64) = (179.0, -80.0);

const DEFAULT_SCALE: u32 = 1000;

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Directory holding TXTDSC files; the input's directory when unset.
    pub basedir: Option<PathBuf>,
    /// Scale used when the database has no `dsid.dspm_cscl`.
    pub scale: Option<u32>,
    pub session: SessionOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub features: u32,
    pub texts: usize,
    pub skipped_tables: usize,
}

#[derive(Debug, Clone)]
struct GeometryTable {
    name: String,
    column: String,
}

/// Convert `input` into `output`, going through `<output>.tmp` so a failed
/// run never leaves a complete-looking cell behind.
pub fn convert_file(
    catalog: Arc<MappingCatalog>,
    input: &Path,
    output: &Path,
    options: &ConvertOptions,
) -> Result<ConvertStats> {
    let tmp = tmp_path(output);

    match write_tmp(catalog, input, &tmp, options) {
        Ok(stats) => {
            fs::rename(&tmp, output)
                .with_context(|| format!("renaming {} to {}", tmp.display(), output.display()))?;
            info!(
                "OK {} -> {} ({} features)",
                input.display(),
                output.display(),
                stats.features
            );
            Ok(stats)
        }
        Err(err) => {
            if let Err(e) = fs::remove_file(&tmp) {
                debug!("could not remove {}: {}", tmp.display(), e);
            }
            Err(err)
        }
    }
}

fn write_tmp(
    catalog: Arc<MappingCatalog>,
    input: &Path,
    tmp: &Path,
    options: &ConvertOptions,
) -> Result<ConvertStats> {
    let file = File::create(tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut out = BufWriter::new(file);
    let stats = convert_to_writer(catalog, input, &mut out, options)?;
    out.flush().with_context(|| format!("writing {}", tmp.display()))?;
    Ok(stats)
}

/// `<path>.tmp` next to `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Run the whole conversion into any writer.
pub fn convert_to_writer<W: Write>(
    catalog: Arc<MappingCatalog>,
    input: &Path,
    writer: W,
    options: &ConvertOptions,
) -> Result<ConvertStats> {
    info!("opening {}", input.display());
    let conn = Connection::open_with_flags(
        input,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("opening {}", input.display()))?;

    let tables = geometry_tables(&conn)?;
    let extent = scan_extent(&conn, &tables)?;
    debug!("{}: extent {}", input.display(), extent);

    let header = build_header(&conn, input, &extent, options.scale);

    let basedir = match &options.basedir {
        Some(dir) => dir.clone(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    let mut session = SencSession::new(Arc::clone(&catalog), writer, &header, options.session)?;
    let mut stats = ConvertStats::default();

    for table in &tables {
        debug!("reading table {}", table.name);
        if table.name.eq_ignore_ascii_case(SOUNDING_TABLE) {
            write_soundings(&mut session, &conn, table)?;
            continue;
        }
        if catalog.class_by_name(&table.name).is_none() {
            if options.session.strict {
                bail!("{}: unknown object class {}", input.display(), table.name);
            }
            warn!("{}: ignoring unknown table {}", input.display(), table.name);
            stats.skipped_tables += 1;
            continue;
        }
        stats.texts += write_table(&mut session, &conn, table, &basedir)?;
    }

    session.close()?;
    stats.features = session.feature_count();
    Ok(stats)
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn geometry_tables(conn: &Connection) -> Result<Vec<GeometryTable>> {
    let mut stmt = conn
        .prepare("SELECT f_table_name, f_geometry_column, geometry_format FROM geometry_columns")
        .context("reading geometry_columns")?;
    let mut rows = stmt.query([])?;

    let mut tables = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let column: String = row.get(1)?;
        let format: Option<String> = row.get(2)?;
        if format.as_deref() != Some("WKB") {
            bail!(
                "invalid geometry format {} in {}, expected WKB",
                format.unwrap_or_default(),
                name
            );
        }
        tables.push(GeometryTable { name, column });
    }
    Ok(tables)
}

fn scan_extent(conn: &Connection, tables: &[GeometryTable]) -> Result<Extent> {
    let mut extent = Extent::default();
    for table in tables {
        let sql = format!("SELECT {} FROM {}", quote(&table.column), quote(&table.name));
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("reading {}", table.name))?;
        let mut rows = stmt.query([])?;

        let mut id = 1usize;
        while let Some(row) = rows.next()? {
            let blob = match row.get_ref(0)? {
                ValueRef::Null => continue,
                ValueRef::Blob(blob) => blob,
                _ => bail!("{}.{} is not a blob", table.name, table.column),
            };
            let context = format!("{}:{}", table.name, id);
            parse_wkb(blob, &context)?.extend(&mut extent);
            id += 1;
        }
    }
    Ok(extent)
}

fn build_header(conn: &Connection, input: &Path, extent: &Extent, scale: Option<u32>) -> SencHeader {
    let (nw, se) = extent.corners().unwrap_or((
        GeoPoint::new(FALLBACK_NW.0, FALLBACK_NW.1),
        GeoPoint::new(FALLBACK_SE.0, FALLBACK_SE.1),
    ));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut header = SencHeader::new(stem, nw, se);
    header.scale = scale.unwrap_or(DEFAULT_SCALE);

    match apply_dsid(conn, &mut header) {
        Ok(true) => {}
        Ok(false) => warn!("{}: no dsid record found, using defaults", input.display()),
        Err(e) => warn!("{}: cannot read dsid: {:#}", input.display(), e),
    }
    header
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_owned).collect()
}

fn row_values(row: &Row<'_>, count: usize) -> rusqlite::Result<Vec<Value>> {
    (0..count).map(|i| row.get::<_, Value>(i)).collect()
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Returns whether a dsid row was found.
fn apply_dsid(conn: &Connection, header: &mut SencHeader) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT * FROM dsid")?;
    let names = column_names(&stmt);
    let column = |wanted: &str| names.iter().position(|n| n.eq_ignore_ascii_case(wanted));
    let (scale_col, edition_col, date_col, name_col) = (
        column("dspm_cscl"),
        column("dsid_edtn"),
        column("dsid_isdt"),
        column("dsid_dsnm"),
    );

    let mut rows = stmt.query([])?;
    let mut found = false;
    while let Some(row) = rows.next()? {
        found = true;
        let values = row_values(row, names.len())?;
        let get = |col: Option<usize>| col.and_then(|i| values.get(i)).filter(|v| **v != Value::Null);

        match get(scale_col).and_then(value_as_i64) {
            Some(scale) => match u32::try_from(scale) {
                Ok(scale) => {
                    info!("scale {} found in dsid", scale);
                    header.scale = scale;
                }
                Err(_) => warn!("invalid scale {} in dsid, using {}", scale, header.scale),
            },
            None => warn!("no scale found in dsid, using default {}", header.scale),
        }

        match get(edition_col).and_then(value_as_i64) {
            Some(edition) => {
                let clamped = edition.clamp(0, i64::from(u16::MAX));
                if clamped != edition {
                    warn!("cell edition {} out of range, setting to {}", edition, clamped);
                }
                header.edition = clamped as u16;
            }
            None => warn!("no edition found in dsid, using default {}", header.edition),
        }

        match get(date_col).and_then(value_as_text) {
            Some(date) => {
                debug!("found update date {} in dsid", date);
                header.update_date = Some(date);
            }
            None => warn!("no update date found in dsid"),
        }

        match get(name_col).and_then(value_as_text) {
            Some(name) => {
                let name = Path::new(&name).with_extension("").to_string_lossy().into_owned();
                info!("found chart name {} in dsid", name);
                header.name = name;
            }
            None => warn!("no chart name in dsid, using default {}", header.name),
        }
    }
    Ok(found)
}

/// Columns declared with a JSON type.
fn json_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let mut rows = stmt.query([table])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let declared: Option<String> = row.get(1)?;
        if declared.map_or(false, |t| t.to_ascii_uppercase().starts_with("JSON")) {
            out.push(name);
        }
    }
    Ok(out)
}

/// Flatten a JSON column to the comma-joined text the renderer expects.
fn expand_json(text: &str) -> Result<String> {
    fn scalar(v: &serde_json::Value) -> String {
        match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(match &value {
        serde_json::Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(","),
        other => scalar(other),
    })
}

fn attribute_value(value: ValueRef<'_>, json: bool) -> Result<AttributeValue> {
    Ok(match value {
        ValueRef::Null | ValueRef::Blob(_) => AttributeValue::Null,
        ValueRef::Integer(i) => AttributeValue::Int(i),
        ValueRef::Real(f) => AttributeValue::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if json {
                AttributeValue::Text(expand_json(&text)?)
            } else {
                AttributeValue::Text(text.into_owned())
            }
        }
    })
}

/// One feature per row. Returns the number of text descriptions added.
fn write_table<W: Write>(
    session: &mut SencSession<W>,
    conn: &Connection,
    table: &GeometryTable,
    basedir: &Path,
) -> Result<usize> {
    let json = json_columns(conn, &table.name)?;
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {}", quote(&table.name)))
        .with_context(|| format!("reading {}", table.name))?;
    let names = column_names(&stmt);
    let mut rows = stmt.query([])?;

    let mut texts = 0;
    let mut id = 1usize;
    while let Some(row) = rows.next()? {
        let context = format!("{}:{}", table.name, id);
        id += 1;

        let mut geometry = None;
        let mut attributes = Vec::new();
        let mut txtdsc = None;

        for (i, name) in names.iter().enumerate() {
            let value = row.get_ref(i)?;
            if value == ValueRef::Null {
                continue;
            }
            if *name == table.column {
                let blob = value
                    .as_blob()
                    .with_context(|| format!("{}: geometry is not a blob", context))?;
                geometry = Some(parse_wkb(blob, &context)?);
                continue;
            }

            let value = attribute_value(value, json.contains(name))
                .with_context(|| format!("{}: column {}", context, name))?;
            if name.eq_ignore_ascii_case(TEXT_COLUMN) {
                if let AttributeValue::Text(file) = &value {
                    txtdsc = Some(file.clone());
                }
            }
            attributes.push(FeatureAttribute {
                name: name.clone(),
                value,
            });
        }

        let geometries: &[Geometry] = match &geometry {
            Some(g) => std::slice::from_ref(g),
            None => &[],
        };
        session
            .add_feature(&table.name, &attributes, geometries)
            .with_context(|| format!("writing {}", context))?;

        if let Some(file) = txtdsc {
            let path = basedir.join(&file);
            match fs::read(&path) {
                Ok(bytes) => {
                    if session.add_txt(&file, &String::from_utf8_lossy(&bytes))? {
                        debug!("added text {}", file);
                        texts += 1;
                    }
                }
                Err(e) => warn!("text file {} not readable: {}", path.display(), e),
            }
        }
    }
    Ok(texts)
}

fn sounding_points(geometry: Geometry, context: &str) -> Result<Vec<GeoPoint>> {
    let points = match geometry {
        Geometry::Point(p) => vec![p],
        Geometry::MultiPoint(points) => points,
        other => bail!("{}: unsupported sounding geometry {}", context, other.kind()),
    };
    if points.iter().any(|p| p.depth.is_none()) {
        bail!("{}: no depth in sounding geometry", context);
    }
    Ok(points)
}

/// Soundings grouped by their SCAMIN/SCAMAX combination.
fn write_soundings<W: Write>(
    session: &mut SencSession<W>,
    conn: &Connection,
    table: &GeometryTable,
) -> Result<()> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let group_columns: Vec<String> = stmt
        .query_map([&table.name], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|n| SOUNDING_GROUP_COLUMNS.contains(&n.to_ascii_uppercase().as_str()))
        .collect();

    let groups: Vec<Vec<Value>> = if group_columns.is_empty() {
        vec![Vec::new()]
    } else {
        let select = group_columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        let mut stmt = conn.prepare(&format!("SELECT DISTINCT {} FROM {}", select, quote(&table.name)))?;
        let mut rows = stmt.query([])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            groups.push(row_values(row, group_columns.len())?);
        }
        groups
    };

    for group in &groups {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (column, value) in group_columns.iter().zip(group) {
            if *value == Value::Null {
                clauses.push(format!("{} IS NULL", quote(column)));
            } else {
                clauses.push(format!("{} = ?", quote(column)));
                params.push(value.clone());
            }
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let group_attributes: Vec<FeatureAttribute> = group_columns
            .iter()
            .zip(group)
            .map(|(column, value)| FeatureAttribute::new(column.clone(), sql_value(value)))
            .collect();

        let mut stmt = conn.prepare(&format!("SELECT * FROM {}{}", quote(&table.name), filter))?;
        let names = column_names(&stmt);
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut batch: Vec<GeoPoint> = Vec::new();
        let mut id = 1usize;
        while let Some(row) = rows.next()? {
            let context = format!("{}:{}", table.name, id);
            id += 1;

            let mut geometry = None;
            let mut attributes = Vec::new();
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i)?;
                if value == ValueRef::Null {
                    continue;
                }
                if *name == table.column {
                    let blob = value
                        .as_blob()
                        .with_context(|| format!("{}: geometry is not a blob", context))?;
                    geometry = Some(parse_wkb(blob, &context)?);
                } else {
                    attributes.push(FeatureAttribute::new(name.clone(), attribute_value(value, false)?));
                }
            }
            let geometry = match geometry {
                Some(g) => g,
                None => continue,
            };

            if let Geometry::MultiPoint(_) = geometry {
                // a multipoint row is its own batch with its own attributes
                let points = sounding_points(geometry, &context)?;
                session.add_soundings(&points, &attributes)?;
                continue;
            }

            batch.extend(sounding_points(geometry, &context)?);
            if batch.len() >= senc::session::SOUNDING_CHUNK {
                session.add_soundings(&batch, &group_attributes)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            session.add_soundings(&batch, &group_attributes)?;
        }
    }
    Ok(())
}

fn sql_value(value: &Value) -> AttributeValue {
    match value {
        Value::Integer(i) => AttributeValue::Int(*i),
        Value::Real(f) => AttributeValue::Float(*f),
        Value::Text(s) => AttributeValue::Text(s.clone()),
        Value::Null | Value::Blob(_) => AttributeValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lists_are_comma_joined() {
        assert_eq!(expand_json("[1, 2, 3]").unwrap(), "1,2,3");
        assert_eq!(expand_json("[\"a\", \"b\"]").unwrap(), "a,b");
        assert_eq!(expand_json("\"single\"").unwrap(), "single");
        assert_eq!(expand_json("4.5").unwrap(), "4.5");
        assert!(expand_json("[1,").is_err());
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote("soundg"), "\"soundg\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/out/cell.senc")), PathBuf::from("/out/cell.senc.tmp"));
    }

    #[test]
    fn dsid_values_coerce() {
        assert_eq!(value_as_i64(&Value::Text(" 12 ".into())), Some(12));
        assert_eq!(value_as_i64(&Value::Real(3.7)), Some(3));
        assert_eq!(value_as_i64(&Value::Blob(vec![1])), None);
        assert_eq!(value_as_text(&Value::Integer(20240101)), Some("20240101".into()));
    }
}
