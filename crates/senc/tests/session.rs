use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use senc::reader::{DecodedValue, RecordBody};
use senc::{
    parse_senc_bytes, parse_wkb, read_file, AttributeDescriptor, EdgeVectorMode, FeatureAttribute,
    GeoPoint, Geometry, MappingCatalog, ObjectClass, RecordType, SencHeader, SencSession,
    SessionOptions, ValueKind,
};

fn catalog() -> Arc<MappingCatalog> {
    Arc::new(MappingCatalog::from_entries(
        vec![
            ObjectClass {
                code: 17,
                acronym: "BOYSAW".into(),
            },
            ObjectClass {
                code: 129,
                acronym: "SOUNDG".into(),
            },
            ObjectClass {
                code: 42,
                acronym: "DEPARE".into(),
            },
        ],
        vec![
            AttributeDescriptor {
                code: 4,
                acronym: "BOYSHP".into(),
                kind: ValueKind::Int,
            },
            AttributeDescriptor {
                code: 116,
                acronym: "OBJNAM".into(),
                kind: ValueKind::String,
            },
            AttributeDescriptor {
                code: 87,
                acronym: "DRVAL1".into(),
                kind: ValueKind::Float,
            },
        ],
    ))
}

fn header() -> SencHeader {
    let mut header = SencHeader::new("DE521010", GeoPoint::new(13.0, 54.5), GeoPoint::new(14.0, 54.0));
    header.scale = 22000;
    header.edition = 7;
    header
}

/// Little- or big-endian WKB point without Z.
fn wkb_point(little: bool, lon: f64, lat: f64) -> Vec<u8> {
    let mut out = vec![u8::from(little)];
    if little {
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&lon.to_le_bytes());
        out.extend_from_slice(&lat.to_le_bytes());
    } else {
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&lon.to_be_bytes());
        out.extend_from_slice(&lat.to_be_bytes());
    }
    out
}

fn wkb_polygon(rings: &[Vec<(f64, f64)>]) -> Vec<u8> {
    let mut out = vec![1u8];
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(&(rings.len() as u32).to_le_bytes());
    for ring in rings {
        out.extend_from_slice(&(ring.len() as u32).to_le_bytes());
        for &(lon, lat) in ring {
            out.extend_from_slice(&lon.to_le_bytes());
            out.extend_from_slice(&lat.to_le_bytes());
        }
    }
    out
}

#[test]
fn written_cell_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("DE521010.senc");

    let mut session = SencSession::create(catalog(), &path, &header(), SessionOptions::default()).unwrap();

    let point = parse_wkb(&wkb_point(true, 13.5015, 54.1631667), "boysaw").unwrap();
    assert!(session
        .add_feature(
            "BOYSAW",
            &[FeatureAttribute::new("BOYSHP", 4), FeatureAttribute::new("OBJNAM", "Greifswald")],
            &[point],
        )
        .unwrap());

    let area = parse_wkb(
        &wkb_polygon(&[
            vec![(13.1, 54.1), (13.4, 54.1), (13.4, 54.4), (13.1, 54.4), (13.1, 54.1)],
            vec![(13.2, 54.2), (13.2, 54.3), (13.3, 54.3), (13.3, 54.2), (13.2, 54.2)],
        ]),
        "depare",
    )
    .unwrap();
    assert!(session
        .add_feature("DEPARE", &[FeatureAttribute::new("DRVAL1", "5.5")], &[area])
        .unwrap());

    let soundings: Vec<GeoPoint> = (0..150)
        .map(|i| GeoPoint::with_depth(13.2 + i as f64 * 0.002, 54.3, 2.0 + i as f64))
        .collect();
    assert!(session.add_soundings(&soundings, &[]).unwrap());
    assert!(session.add_txt("NOTE1.TXT", "hello").unwrap());

    session.close().unwrap();
    session.close().unwrap();

    let records = read_file(&path).unwrap();
    let raw = fs::read(&path).unwrap();
    assert_eq!(records.iter().map(|r| r.len()).sum::<usize>(), raw.len());

    let bodies: Vec<RecordBody> = records.iter().map(|r| r.decode().unwrap()).collect();
    assert_eq!(bodies[0], RecordBody::Version(201));
    assert_eq!(bodies[1], RecordBody::CellName("DE521010".into()));
    assert_eq!(bodies[2], RecordBody::CellEdition(7));
    match &bodies[3] {
        RecordBody::Extent(extent) => {
            assert_eq!(extent.nw, (54.5, 13.0));
            assert_eq!(extent.se, (54.0, 14.0));
            assert_eq!(extent.sw, (54.0, 13.0));
            assert_eq!(extent.ne, (54.5, 14.0));
        }
        other => panic!("expected extent, got {:?}", other),
    }
    assert_eq!(bodies[4], RecordBody::NativeScale(22000));

    // feature ids run 1, 2, 3, 4 without gaps
    let ids: Vec<u16> = bodies
        .iter()
        .filter_map(|b| match b {
            RecordBody::FeatureId { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    assert!(bodies.contains(&RecordBody::Attribute {
        code: 87,
        value: DecodedValue::Double(5.5)
    }));
    assert_eq!(
        bodies.last(),
        Some(&RecordBody::TextDescription {
            name: "NOTE1.TXT".into(),
            text: "hello".into()
        })
    );

    // geometry and attributes only ever follow a feature id
    let mut seen_feature = false;
    for r in &records {
        match r.kind() {
            Some(RecordType::FeatureId) => seen_feature = true,
            Some(RecordType::Attribute | RecordType::Point | RecordType::Area | RecordType::Multipoint) => {
                assert!(seen_feature)
            }
            _ => {}
        }
    }
}

#[test]
fn byte_order_does_not_change_the_geometry() {
    let little = parse_wkb(&wkb_point(true, 10.0, 50.0), "le").unwrap();
    let big = parse_wkb(&wkb_point(false, 10.0, 50.0), "be").unwrap();

    assert_eq!(little, Geometry::Point(GeoPoint::new(10.0, 50.0)));
    assert_eq!(little, big);
}

#[test]
fn point_records_keep_full_precision() {
    let positions = [(13.5015, 54.1631667), (-179.999999, -89.5), (0.1 + 0.2, 1.0 / 3.0)];

    let mut session = SencSession::new(catalog(), Vec::new(), &header(), SessionOptions::default()).unwrap();
    for &(lon, lat) in &positions {
        let geometry = parse_wkb(&wkb_point(true, lon, lat), "boysaw").unwrap();
        session.add_feature("BOYSAW", &[], &[geometry]).unwrap();
    }
    let bytes = session.into_inner().unwrap();

    let points: Vec<(f64, f64)> = parse_senc_bytes(&bytes)
        .unwrap()
        .iter()
        .filter_map(|r| match r.decode().unwrap() {
            RecordBody::Point { lat, lon } => Some((lon, lat)),
            _ => None,
        })
        .collect();
    assert_eq!(points, positions.to_vec());
}

#[test]
fn edge_vector_mode_none_writes_no_tables() {
    let options = SessionOptions {
        strict: false,
        edge_vectors: EdgeVectorMode::None,
    };
    let mut session = SencSession::new(catalog(), Vec::new(), &header(), options).unwrap();
    let area = parse_wkb(
        &wkb_polygon(&[vec![(13.1, 54.1), (13.4, 54.1), (13.4, 54.4), (13.1, 54.1)]]),
        "depare",
    )
    .unwrap();
    session.add_feature("DEPARE", &[], &[area]).unwrap();
    assert_eq!(session.edge_vector_count(), 0);

    let records = parse_senc_bytes(&session.into_inner().unwrap()).unwrap();
    assert!(records
        .iter()
        .all(|r| r.kind() != Some(RecordType::EdgeVectorTable)));
}

#[test]
fn truncated_cell_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.senc");

    let session = SencSession::create(catalog(), &path, &header(), SessionOptions::default()).unwrap();
    drop(session.into_inner().unwrap());

    let mut bytes = fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 2);
    fs::write(&path, &bytes).unwrap();

    let err = read_file(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn unwritable_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("cell.senc");

    let result = SencSession::create(catalog(), &path, &header(), SessionOptions::default());
    assert!(matches!(result, Err(senc::SencError::Io(_))));
}
