//! Feature/attribute builder: one open output cell.
//!
//! Records of a feature are always emitted as Feature-ID, then every
//! geometry record (each followed by the edge-vector tables it links to),
//! then attributes. A feature is assembled in memory first and written in
//! one go, so a failing feature leaves nothing behind in the stream.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::catalog::{MappingCatalog, ObjectClass, ValueKind};
use crate::error::{Result, SencError};
use crate::extent::Extent;
use crate::geometry::{GeoPoint, Geometry, Polygon};
use crate::projection::{project, EastNorth};
use crate::record::{self, EncodedValue};
use crate::tessellate::tessellate;

pub const SENC_VERSION: u16 = 201;

/// Most points a single sounding record carries.
pub const SOUNDING_CHUNK: usize = 100;

pub const SOUNDING_CLASS: &str = "SOUNDG";

/// Cell metadata written as the leading records.
#[derive(Debug, Clone, PartialEq)]
pub struct SencHeader {
    pub nw: GeoPoint,
    pub se: GeoPoint,
    pub scale: u32,
    pub name: String,
    pub edition: u16,
    pub version: u16,
    pub update_date: Option<String>,
}

impl SencHeader {
    pub fn new(name: impl Into<String>, nw: GeoPoint, se: GeoPoint) -> Self {
        Self {
            nw,
            se,
            scale: 1000,
            name: name.into(),
            edition: 1,
            version: SENC_VERSION,
            update_date: None,
        }
    }

    /// Center of the cell box; the origin of every projected coordinate.
    pub fn reference(&self) -> GeoPoint {
        GeoPoint::new(
            (self.nw.lon + self.se.lon) / 2.0,
            (self.nw.lat + self.se.lat) / 2.0,
        )
    }
}

/// Which polygon rings get their own edge-vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeVectorMode {
    None,
    Exterior,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Fail on unknown classes/attributes instead of skipping them.
    pub strict: bool,
    pub edge_vectors: EdgeVectorMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    fn invalid(&self, attribute: &str, kind: ValueKind) -> SencError {
        SencError::AttributeValue {
            attribute: attribute.to_owned(),
            value: self.to_text().into_owned(),
            kind: kind.name(),
        }
    }

    /// Integer on the wire: 32 bit, negative values as two's complement.
    fn to_wire_int(&self, attribute: &str) -> Result<u32> {
        let value = match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            AttributeValue::Text(s) => {
                // list values keep their first element
                let first = s.split(',').next().unwrap_or("").trim();
                first
                    .parse::<i64>()
                    .ok()
                    .or_else(|| first.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            }
            _ => None,
        };

        match value {
            Some(v) if v >= i64::from(i32::MIN) && v <= i64::from(u32::MAX) => Ok(v as u32),
            _ => Err(self.invalid(attribute, ValueKind::Int)),
        }
    }

    fn to_wire_double(&self, attribute: &str) -> Result<f64> {
        match self {
            AttributeValue::Int(v) => Ok(*v as f64),
            AttributeValue::Float(f) => Ok(*f),
            AttributeValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| self.invalid(attribute, ValueKind::Float)),
            AttributeValue::Null => Err(self.invalid(attribute, ValueKind::Float)),
        }
    }

    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            AttributeValue::Null => Cow::Borrowed(""),
            AttributeValue::Int(v) => Cow::Owned(v.to_string()),
            AttributeValue::Float(f) => Cow::Owned(f.to_string()),
            AttributeValue::Text(s) => Cow::Borrowed(s),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(AttributeValue::Null, Into::into)
    }
}

/// A named attribute as it comes from the source table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureAttribute {
    pub name: String,
    pub value: AttributeValue,
}

impl FeatureAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub struct SencSession<W: Write> {
    catalog: Arc<MappingCatalog>,
    out: Option<W>,
    name: String,
    options: SessionOptions,
    reference: GeoPoint,
    next_feature_id: u32,
    next_edge_index: u32,
    text_names: HashSet<String>,
}

impl SencSession<BufWriter<File>> {
    /// Create `path` and write the header records.
    pub fn create<P: AsRef<Path>>(
        catalog: Arc<MappingCatalog>,
        path: P,
        header: &SencHeader,
        options: SessionOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        debug!("opened {} for cell {}", path.display(), header.name);
        Self::new(catalog, BufWriter::new(file), header, options)
    }
}

impl<W: Write> SencSession<W> {
    pub fn new(
        catalog: Arc<MappingCatalog>,
        writer: W,
        header: &SencHeader,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut session = Self {
            catalog,
            out: Some(writer),
            name: header.name.clone(),
            options,
            reference: header.reference(),
            next_feature_id: 1,
            next_edge_index: 1,
            text_names: HashSet::new(),
        };

        let mut records = vec![
            record::version(header.version),
            record::cell_name(&header.name),
            record::cell_edition(header.edition),
            record::extent(&header.nw, &header.se),
            record::native_scale(header.scale),
        ];
        if let Some(date) = header.update_date.as_deref() {
            records.push(record::cell_update_date(date));
        }
        session.write_records(&records)?;

        debug!(
            "cell {}: reference ({:.6}, {:.6}), scale 1:{}, edition {}",
            header.name, session.reference.lon, session.reference.lat, header.scale, header.edition
        );
        Ok(session)
    }

    pub fn reference(&self) -> GeoPoint {
        self.reference
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn catalog(&self) -> &MappingCatalog {
        &self.catalog
    }

    /// Features emitted so far (soundings chunks included).
    pub fn feature_count(&self) -> u32 {
        self.next_feature_id - 1
    }

    /// Edge-vector tables emitted so far.
    pub fn edge_vector_count(&self) -> u32 {
        self.next_edge_index - 1
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    /// Project against this cell's reference point.
    pub fn project(&self, point: &GeoPoint) -> EastNorth {
        project(point, &self.reference)
    }

    /// Emit one feature. Returns `false` if the class is unknown and the
    /// session is not strict.
    pub fn add_feature(
        &mut self,
        name: &str,
        attributes: &[FeatureAttribute],
        geometries: &[Geometry],
    ) -> Result<bool> {
        let catalog = Arc::clone(&self.catalog);
        let class = match catalog.class_by_name(name) {
            Some(class) => class,
            None if self.options.strict => return Err(SencError::UnknownClass(name.to_owned())),
            None => {
                warn!("{}: skipping feature of unknown class {}", self.name, name);
                return Ok(false);
            }
        };

        let counters = (self.next_feature_id, self.next_edge_index);
        let records = match self.build_feature(&catalog, class, attributes, geometries) {
            Ok(records) => records,
            Err(e) => {
                (self.next_feature_id, self.next_edge_index) = counters;
                return Err(e);
            }
        };

        self.write_records(&records)?;
        Ok(true)
    }

    /// Emit depth points as `SOUNDG` features of at most
    /// [`SOUNDING_CHUNK`] points each, all sharing `attributes`.
    pub fn add_soundings(&mut self, points: &[GeoPoint], attributes: &[FeatureAttribute]) -> Result<bool> {
        if let Some(p) = points.iter().find(|p| p.depth.is_none()) {
            return Err(SencError::format(
                SOUNDING_CLASS,
                format!("sounding at ({}, {}) has no depth", p.lon, p.lat),
            ));
        }
        if points.is_empty() {
            return Ok(false);
        }

        for chunk in points.chunks(SOUNDING_CHUNK) {
            let geometry = [Geometry::MultiPoint(chunk.to_vec())];
            if !self.add_feature(SOUNDING_CLASS, attributes, &geometry)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Emit a text description once per name; repeats return `false`.
    pub fn add_txt(&mut self, name: &str, text: &str) -> Result<bool> {
        if self.text_names.contains(name) {
            debug!("{}: text {} already written", self.name, name);
            return Ok(false);
        }
        self.write_records(&[record::text_description(name, text)])?;
        self.text_names.insert(name.to_owned());
        Ok(true)
    }

    /// Flush and release the stream. Further calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            debug!(
                "closed cell {}: {} features, {} edge vectors",
                self.name,
                self.feature_count(),
                self.edge_vector_count()
            );
        }
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        let mut out = self
            .out
            .take()
            .ok_or_else(|| SencError::Consistency(format!("cell {} already closed", self.name)))?;
        out.flush()?;
        Ok(out)
    }

    fn write_records(&mut self, records: &[Vec<u8>]) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| SencError::Consistency(format!("write to closed cell {}", self.name)))?;
        for r in records {
            out.write_all(r)?;
        }
        Ok(())
    }

    fn allocate_feature_id(&mut self) -> Result<u16> {
        let id = u16::try_from(self.next_feature_id).map_err(|_| {
            SencError::Consistency(format!("cell {} exceeds {} features", self.name, u16::MAX))
        })?;
        self.next_feature_id += 1;
        Ok(id)
    }

    fn allocate_edge_index(&mut self) -> u32 {
        let index = self.next_edge_index;
        self.next_edge_index += 1;
        index
    }

    fn build_feature(
        &mut self,
        catalog: &MappingCatalog,
        class: &ObjectClass,
        attributes: &[FeatureAttribute],
        geometries: &[Geometry],
    ) -> Result<Vec<Vec<u8>>> {
        let id = self.allocate_feature_id()?;
        let mut records = vec![record::feature_id(class.code, id)];

        for geometry in geometries {
            self.geometry_records(geometry, &mut records)?;
        }

        for attribute in attributes {
            if attribute.value.is_null() {
                continue;
            }
            let descriptor = match catalog.attribute_by_name(&attribute.name) {
                Some(descriptor) => descriptor,
                None if self.options.strict => {
                    return Err(SencError::UnknownAttribute {
                        attribute: attribute.name.clone(),
                        feature: class.acronym.clone(),
                        id: u32::from(id),
                    })
                }
                None => {
                    debug!(
                        "{}: unknown attribute {} on {} id={}",
                        self.name, attribute.name, class.acronym, id
                    );
                    continue;
                }
            };

            let value = &attribute.value;
            let text;
            let encoded = match descriptor.encoding() {
                ValueKind::Int => EncodedValue::Int(value.to_wire_int(&attribute.name)?),
                ValueKind::Float => EncodedValue::Double(value.to_wire_double(&attribute.name)?),
                ValueKind::String => {
                    text = value.to_text();
                    EncodedValue::Text(&text)
                }
            };
            records.push(record::attribute(descriptor.code, encoded));
        }

        Ok(records)
    }

    fn geometry_records(&mut self, geometry: &Geometry, out: &mut Vec<Vec<u8>>) -> Result<()> {
        match geometry {
            Geometry::Point(p) => out.push(record::point(p)),
            Geometry::LineString(points) => {
                let bounds = bounds_of(points);
                let projected: Vec<EastNorth> = points.iter().map(|p| self.project(p)).collect();
                let index = self.allocate_edge_index();
                out.push(record::line(&bounds, index));
                out.push(record::edge_vector_table(index, &projected));
            }
            Geometry::Polygon(polygon) => self.area_records(polygon, out)?,
            Geometry::MultiPolygon(polygons) => {
                for polygon in polygons {
                    self.area_records(polygon, out)?;
                }
            }
            Geometry::MultiPoint(points) => {
                let bounds = bounds_of(points);
                let values: Vec<(EastNorth, f64)> = points
                    .iter()
                    .map(|p| (self.project(p), p.depth.unwrap_or(0.0)))
                    .collect();
                out.push(record::multipoint(&bounds, &values));
            }
        }
        Ok(())
    }

    fn area_records(&mut self, polygon: &Polygon, out: &mut Vec<Vec<u8>>) -> Result<()> {
        if polygon.is_empty() {
            return Ok(());
        }

        let triangles = tessellate(polygon, &self.reference)?;

        let mut bounds = Extent::default();
        polygon.points().for_each(|p| bounds.add(p));

        let rings = match self.options.edge_vectors {
            EdgeVectorMode::None => 0,
            EdgeVectorMode::Exterior => 1,
            EdgeVectorMode::All => polygon.rings.len(),
        };

        let mut indices = Vec::new();
        let mut tables = Vec::new();
        for ring in polygon.rings.iter().take(rings).filter(|r| !r.is_empty()) {
            let projected: Vec<EastNorth> = ring.iter().map(|p| self.project(p)).collect();
            let index = self.allocate_edge_index();
            indices.push(index);
            tables.push(record::edge_vector_table(index, &projected));
        }

        out.push(record::area(&bounds, &triangles, &indices));
        out.extend(tables);
        Ok(())
    }
}

fn bounds_of(points: &[GeoPoint]) -> Extent {
    let mut bounds = Extent::default();
    points.iter().for_each(|p| bounds.add(p));
    bounds
}
