use std::fs;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection};

use senc::reader::{DecodedValue, RecordBody};
use senc::{read_file, AttributeDescriptor, MappingCatalog, ObjectClass, SessionOptions, ValueKind};
use sqlite2senc::convert::tmp_path;
use sqlite2senc::{convert_file, ConvertOptions};

fn catalog() -> Arc<MappingCatalog> {
    let class = |code, acronym: &str| ObjectClass {
        code,
        acronym: acronym.into(),
    };
    let attribute = |code, acronym: &str, kind| AttributeDescriptor {
        code,
        acronym: acronym.into(),
        kind,
    };
    Arc::new(MappingCatalog::from_entries(
        vec![class(17, "BOYSAW"), class(129, "SOUNDG")],
        vec![
            attribute(4, "BOYSHP", ValueKind::Int),
            attribute(116, "OBJNAM", ValueKind::String),
            attribute(133, "SCAMIN", ValueKind::Int),
            attribute(132, "SCAMAX", ValueKind::Int),
            attribute(179, "TXTDSC", ValueKind::String),
            attribute(75, "COLOUR", ValueKind::String),
        ],
    ))
}

fn wkb_point(lon: f64, lat: f64) -> Vec<u8> {
    let mut out = vec![1u8];
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&lon.to_le_bytes());
    out.extend_from_slice(&lat.to_le_bytes());
    out
}

fn wkb_point_z(lon: f64, lat: f64, depth: f64) -> Vec<u8> {
    let mut out = vec![1u8];
    out.extend_from_slice(&0x8000_0001u32.to_le_bytes());
    for v in [lon, lat, depth] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn wkb_multipoint_z(points: &[(f64, f64, f64)]) -> Vec<u8> {
    let mut out = vec![1u8];
    out.extend_from_slice(&0x8000_0004u32.to_le_bytes());
    out.extend_from_slice(&(points.len() as u32).to_le_bytes());
    for &(lon, lat, depth) in points {
        out.extend_from_slice(&wkb_point_z(lon, lat, depth));
    }
    out
}

fn fixture(path: &Path, with_dsid: bool) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE geometry_columns (f_table_name TEXT, f_geometry_column TEXT, geometry_format TEXT);
         INSERT INTO geometry_columns VALUES ('boysaw', 'GEOMETRY', 'WKB');
         INSERT INTO geometry_columns VALUES ('soundg', 'GEOMETRY', 'WKB');
         INSERT INTO geometry_columns VALUES ('m_nsys', 'GEOMETRY', 'WKB');
         CREATE TABLE boysaw (ogc_fid INTEGER PRIMARY KEY, GEOMETRY BLOB, BOYSHP INTEGER, OBJNAM TEXT, TXTDSC TEXT, COLOUR JSON);
         CREATE TABLE soundg (ogc_fid INTEGER PRIMARY KEY, GEOMETRY BLOB, SCAMIN INTEGER, SCAMAX INTEGER);
         CREATE TABLE m_nsys (ogc_fid INTEGER PRIMARY KEY, GEOMETRY BLOB);",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO boysaw (GEOMETRY, BOYSHP, OBJNAM, TXTDSC, COLOUR) \
         VALUES (?1, 4, 'Greifswald', 'NOTE.TXT', '[1, 11]')",
        params![wkb_point(13.5, 54.2)],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO boysaw (GEOMETRY, BOYSHP) VALUES (?1, 2)",
        params![wkb_point(13.6, 54.3)],
    )
    .unwrap();

    for i in 0..150 {
        conn.execute(
            "INSERT INTO soundg (GEOMETRY, SCAMIN) VALUES (?1, 10000)",
            params![wkb_point_z(13.4 + i as f64 * 0.001, 54.1, 3.0 + i as f64)],
        )
        .unwrap();
    }
    for i in 0..30 {
        conn.execute(
            "INSERT INTO soundg (GEOMETRY) VALUES (?1)",
            params![wkb_point_z(13.7, 54.1 + i as f64 * 0.001, 8.0)],
        )
        .unwrap();
    }
    let survey: Vec<(f64, f64, f64)> = (0..150)
        .map(|i| (13.5 + i as f64 * 0.001, 54.2, 12.0 + i as f64 * 0.1))
        .collect();
    conn.execute(
        "INSERT INTO soundg (GEOMETRY, SCAMAX) VALUES (?1, 5000)",
        params![wkb_multipoint_z(&survey)],
    )
    .unwrap();
    conn.execute("INSERT INTO m_nsys (GEOMETRY) VALUES (?1)", params![wkb_point(13.9, 54.4)])
        .unwrap();

    if with_dsid {
        conn.execute_batch(
            "CREATE TABLE dsid (dspm_cscl INTEGER, dsid_edtn TEXT, dsid_isdt TEXT, dsid_dsnm TEXT);
             INSERT INTO dsid VALUES (22000, '3', '20240115', 'DE421010.000');",
        )
        .unwrap();
    }
}

#[test]
fn sqlite_database_converts_to_a_cell() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.sqlite");
    let output = dir.path().join("input.senc");
    fixture(&input, true);
    fs::write(dir.path().join("NOTE.TXT"), "light is unreliable").unwrap();

    let stats = convert_file(catalog(), &input, &output, &ConvertOptions::default()).unwrap();
    assert_eq!(stats.features, 7);
    assert_eq!(stats.texts, 1);
    assert_eq!(stats.skipped_tables, 1);
    assert!(!tmp_path(&output).exists());

    let bodies: Vec<RecordBody> = read_file(&output)
        .unwrap()
        .iter()
        .map(|r| r.decode().unwrap())
        .collect();

    assert_eq!(bodies[1], RecordBody::CellName("DE421010".into()));
    assert_eq!(bodies[2], RecordBody::CellEdition(3));
    match &bodies[3] {
        RecordBody::Extent(extent) => {
            assert_eq!(extent.nw, (54.4, 13.4));
            assert_eq!(extent.se, (54.1, 13.9));
        }
        other => panic!("expected extent, got {:?}", other),
    }
    assert_eq!(bodies[4], RecordBody::NativeScale(22000));
    assert_eq!(bodies[5], RecordBody::CellUpdateDate("20240115".into()));

    let features: Vec<(u16, u16)> = bodies
        .iter()
        .filter_map(|b| match b {
            RecordBody::FeatureId { type_code, id, .. } => Some((*type_code, *id)),
            _ => None,
        })
        .collect();
    assert_eq!(features[..2], [(17, 1), (17, 2)]);
    assert_eq!(features.len(), 7);
    assert!(features[2..].iter().all(|&(class, _)| class == 129));

    let mut batches: Vec<usize> = bodies
        .iter()
        .filter_map(|b| match b {
            RecordBody::Multipoint { points, .. } => Some(points.len()),
            _ => None,
        })
        .collect();
    batches.sort();
    assert_eq!(batches, vec![30, 50, 50, 100, 100]);

    // both SCAMIN=10000 batches carry the group attribute, the NULL group none
    let scamin = bodies
        .iter()
        .filter(|b| {
            **b == RecordBody::Attribute {
                code: 133,
                value: DecodedValue::Int(10000),
            }
        })
        .count();
    assert_eq!(scamin, 2);

    // the multipoint row is split 100 + 50, each chunk carrying its own SCAMAX
    let mut survey_chunks = Vec::new();
    let mut points = None;
    for body in &bodies {
        match body {
            RecordBody::FeatureId { .. } => points = None,
            RecordBody::Multipoint { points: p, .. } => points = Some(p.len()),
            RecordBody::Attribute {
                code: 132,
                value: DecodedValue::Int(5000),
            } => survey_chunks.extend(points),
            _ => {}
        }
    }
    survey_chunks.sort();
    assert_eq!(survey_chunks, vec![50, 100]);

    assert!(bodies.contains(&RecordBody::Attribute {
        code: 75,
        value: DecodedValue::Text("1,11".into())
    }));

    assert!(bodies.contains(&RecordBody::Attribute {
        code: 116,
        value: DecodedValue::Text("Greifswald".into())
    }));
    assert!(bodies.contains(&RecordBody::TextDescription {
        name: "NOTE.TXT".into(),
        text: "light is unreliable".into()
    }));
}

#[test]
fn missing_dsid_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("DE000001.sqlite");
    let output = dir.path().join("out.senc");
    fixture(&input, false);

    let options = ConvertOptions {
        scale: Some(50000),
        ..ConvertOptions::default()
    };
    let stats = convert_file(catalog(), &input, &output, &options).unwrap();
    // NOTE.TXT does not exist: a warning, not a failure
    assert_eq!(stats.texts, 0);

    let bodies: Vec<RecordBody> = read_file(&output)
        .unwrap()
        .iter()
        .map(|r| r.decode().unwrap())
        .collect();
    assert_eq!(bodies[1], RecordBody::CellName("DE000001".into()));
    assert_eq!(bodies[2], RecordBody::CellEdition(1));
    assert_eq!(bodies[4], RecordBody::NativeScale(50000));
    assert!(matches!(bodies[5], RecordBody::FeatureId { .. }));
}

#[test]
fn strict_mode_rejects_unknown_tables() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("strict.sqlite");
    let output = dir.path().join("strict.senc");
    fixture(&input, true);

    let options = ConvertOptions {
        session: SessionOptions {
            strict: true,
            ..SessionOptions::default()
        },
        ..ConvertOptions::default()
    };
    assert!(convert_file(catalog(), &input, &output, &options).is_err());
    assert!(!output.exists());
    assert!(!tmp_path(&output).exists());
}

#[test]
fn non_wkb_geometry_format_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("wkt.sqlite");
    let output = dir.path().join("wkt.senc");
    {
        let conn = Connection::open(&input).unwrap();
        conn.execute_batch(
            "CREATE TABLE geometry_columns (f_table_name TEXT, f_geometry_column TEXT, geometry_format TEXT);
             INSERT INTO geometry_columns VALUES ('boysaw', 'GEOMETRY', 'WKT');
             CREATE TABLE boysaw (GEOMETRY TEXT);",
        )
        .unwrap();
    }

    let err = convert_file(catalog(), &input, &output, &ConvertOptions::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("WKT"));
    assert!(!output.exists());
}
