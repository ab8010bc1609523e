//! S-57 object class and attribute lookup tables.
//!
//! The tables are the usual `s57objectclasses.csv` / `s57attributes.csv`
//! pair. Only `Code`, `Acronym` and (for attributes) `Attributetype` are
//! read; every other column is ignored.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{Result, SencError};

pub const OBJECT_CLASSES_FILE: &str = "s57objectclasses.csv";
pub const ATTRIBUTES_FILE: &str = "s57attributes.csv";

/// Acronyms the renderer expects as integers whatever their declared type.
pub const INT_OVERRIDES: [&str; 10] = [
    "QUALTY", "CATOBS", "WATLEV", "CATWRK", "QUAPOS", "LITCHR", "CONRAD", "CONDTN", "CATSLC",
    "TOPSHP",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    String,
}

impl ValueKind {
    /// Map an S-57 `Attributetype` letter to an encoding.
    ///
    /// `E` (enumerated) and `I` are integers, `F` is a double; `A`, `S`, `L`
    /// and anything unrecognised are carried as text.
    pub fn from_s57_type(attribute_type: &str) -> Self {
        match attribute_type.trim() {
            "E" | "I" => ValueKind::Int,
            "F" => ValueKind::Float,
            _ => ValueKind::String,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "double",
            ValueKind::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectClass {
    pub code: u16,
    pub acronym: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub code: u16,
    pub acronym: String,
    pub kind: ValueKind,
}

impl AttributeDescriptor {
    /// The encoding used on the wire: the override list wins over the
    /// declared kind.
    pub fn encoding(&self) -> ValueKind {
        let upper = self.acronym.to_ascii_uppercase();
        if INT_OVERRIDES.contains(&upper.as_str()) {
            ValueKind::Int
        } else {
            self.kind
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectClassRow {
    #[serde(rename = "Code")]
    code: u16,
    #[serde(rename = "Acronym")]
    acronym: String,
}

#[derive(Debug, Deserialize)]
struct AttributeRow {
    #[serde(rename = "Code")]
    code: u16,
    #[serde(rename = "Acronym")]
    acronym: String,
    #[serde(rename = "Attributetype", default)]
    attribute_type: Option<String>,
}

fn table_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source)
}

/// Immutable lookup of classes and attributes by code and by acronym.
///
/// Name lookups are case-insensitive. When two acronyms differ only in case
/// (`BOYLAT` / `boylat`), the row loaded first owns the name.
#[derive(Debug, Default, Clone)]
pub struct MappingCatalog {
    classes: HashMap<u16, ObjectClass>,
    class_names: HashMap<String, u16>,
    attributes: HashMap<u16, AttributeDescriptor>,
    attribute_names: HashMap<String, u16>,
}

impl MappingCatalog {
    /// Load both tables from a directory holding the two standard files.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let classes_path = dir.join(OBJECT_CLASSES_FILE);
        let attributes_path = dir.join(ATTRIBUTES_FILE);

        let classes = File::open(&classes_path).map_err(|e| {
            SencError::Catalog(format!("{}: {}", classes_path.display(), e))
        })?;
        let attributes = File::open(&attributes_path).map_err(|e| {
            SencError::Catalog(format!("{}: {}", attributes_path.display(), e))
        })?;

        Self::from_readers(classes, attributes)
    }

    pub fn from_readers<C: Read, A: Read>(classes: C, attributes: A) -> Result<Self> {
        let mut class_list = Vec::new();
        for row in table_reader(classes).deserialize::<ObjectClassRow>() {
            let row = row?;
            class_list.push(ObjectClass {
                code: row.code,
                acronym: row.acronym.trim().to_owned(),
            });
        }

        let mut attribute_list = Vec::new();
        for row in table_reader(attributes).deserialize::<AttributeRow>() {
            let row = row?;
            attribute_list.push(AttributeDescriptor {
                code: row.code,
                acronym: row.acronym.trim().to_owned(),
                kind: ValueKind::from_s57_type(row.attribute_type.as_deref().unwrap_or("")),
            });
        }

        let catalog = Self::from_entries(class_list, attribute_list);
        debug!(
            "mapping catalog loaded: {} object classes, {} attributes",
            catalog.classes.len(),
            catalog.attributes.len()
        );

        Ok(catalog)
    }

    pub fn from_entries<C, A>(classes: C, attributes: A) -> Self
    where
        C: IntoIterator<Item = ObjectClass>,
        A: IntoIterator<Item = AttributeDescriptor>,
    {
        let mut catalog = MappingCatalog::default();

        for class in classes {
            if class.acronym.is_empty() {
                continue;
            }
            catalog
                .class_names
                .entry(class.acronym.to_ascii_uppercase())
                .or_insert(class.code);
            catalog.classes.insert(class.code, class);
        }

        for attribute in attributes {
            if attribute.acronym.is_empty() {
                continue;
            }
            catalog
                .attribute_names
                .entry(attribute.acronym.to_ascii_uppercase())
                .or_insert(attribute.code);
            catalog.attributes.insert(attribute.code, attribute);
        }

        catalog
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ObjectClass> {
        let code = self.class_names.get(&name.trim().to_ascii_uppercase())?;
        self.classes.get(code)
    }

    pub fn class_by_id(&self, code: u16) -> Option<&ObjectClass> {
        self.classes.get(&code)
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&AttributeDescriptor> {
        let code = self
            .attribute_names
            .get(&name.trim().to_ascii_uppercase())?;
        self.attributes.get(code)
    }

    pub fn attribute_by_id(&self, code: u16) -> Option<&AttributeDescriptor> {
        self.attributes.get(&code)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}
