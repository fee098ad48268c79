use std::sync::Arc;

use column::{ColumnCursor, ColumnReader, ColumnType, ColumnValue, ColumnWriter, FixedColumnFile};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn column_path(dir: &TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

#[test]
fn scenario_double_column_bulk_append_matches_prng_sequence() {
    let dir = TempDir::new().expect("temp dir");
    let path = column_path(&dir, "prices.hare");
    let file = Arc::new(
        FixedColumnFile::create_direct(&path, ColumnType::Double, false).expect("create column"),
    );

    let mut rng = StdRng::seed_from_u64(42);
    let expected: Vec<f64> = (0..10_000).map(|_| rng.gen_range(-1_000.0..1_000.0)).collect();

    {
        let mut writer = ColumnWriter::open(file.clone());
        for value in &expected {
            writer.append(Some(ColumnValue::Double(*value))).expect("append");
        }
        writer.commit().expect("commit");
    }

    let reader = ColumnReader::open(file.clone());
    assert_eq!(reader.count().unwrap(), 10_000);
    assert_eq!(reader.max_tuple_id().unwrap(), Some(9_999));

    let mut cursor = ColumnCursor::open(file.clone()).expect("open cursor");
    let mut seen = Vec::with_capacity(10_000);
    while let Some(tuple_id) = cursor.next().unwrap() {
        let ColumnValue::Double(v) = reader.get(tuple_id).unwrap().expect("non-null") else {
            panic!("expected double");
        };
        seen.push(v);
    }
    assert_eq!(seen, expected);
}

#[test]
fn scenario_nullable_integer_column_tracks_null_flag() {
    let dir = TempDir::new().expect("temp dir");
    let path = column_path(&dir, "ages.hare");
    let file = Arc::new(
        FixedColumnFile::create_direct(&path, ColumnType::Integer, true).expect("create column"),
    );

    {
        let mut writer = ColumnWriter::open(file.clone());
        writer.append(Some(ColumnValue::Integer(30))).unwrap();
        writer.append(None).unwrap();
        writer.append(Some(ColumnValue::Integer(45))).unwrap();
        writer.commit().unwrap();
    }

    let reader = ColumnReader::open(file.clone());
    assert_eq!(reader.get(0).unwrap(), Some(ColumnValue::Integer(30)));
    assert_eq!(reader.get(1).unwrap(), None);
    assert!(reader.is_null(1).unwrap());
    assert!(!reader.is_null(0).unwrap());
    assert_eq!(reader.get(2).unwrap(), Some(ColumnValue::Integer(45)));
}

#[test]
fn non_nullable_column_rejects_null_append_and_update() {
    let dir = TempDir::new().expect("temp dir");
    let path = column_path(&dir, "codes.hare");
    let file = Arc::new(
        FixedColumnFile::create_direct(&path, ColumnType::Integer, false).expect("create column"),
    );

    let mut writer = ColumnWriter::open(file.clone());
    writer.append(Some(ColumnValue::Integer(1))).unwrap();
    assert!(writer.append(None).is_err());
    assert!(writer.update(0, None).is_err());
}

#[test]
fn scenario_delete_then_reject_further_mutation_and_skip_in_cursor() {
    let dir = TempDir::new().expect("temp dir");
    let path = column_path(&dir, "flags.hare");
    let file = Arc::new(
        FixedColumnFile::create_direct(&path, ColumnType::Boolean, true).expect("create column"),
    );

    {
        let mut writer = ColumnWriter::open(file.clone());
        for i in 0..5 {
            writer.append(Some(ColumnValue::Boolean(i % 2 == 0))).unwrap();
        }
        let previous = writer.delete(2).unwrap();
        assert_eq!(previous, Some(ColumnValue::Boolean(true)));
        writer.commit().unwrap();
    }

    {
        let mut writer = ColumnWriter::open(file.clone());
        assert!(writer.update(2, Some(ColumnValue::Boolean(false))).is_err());
        assert!(writer.delete(2).is_err());
    }

    let reader = ColumnReader::open(file.clone());
    assert!(reader.is_deleted(2).unwrap());
    assert!(reader.get(2).is_err());
    assert_eq!(reader.count().unwrap(), 4);

    let mut cursor = ColumnCursor::open(file.clone()).unwrap();
    let mut visited = Vec::new();
    while let Some(tuple_id) = cursor.next().unwrap() {
        visited.push(tuple_id);
    }
    assert_eq!(visited, vec![0, 1, 3, 4]);
}

#[test]
fn compare_and_update_only_applies_on_matching_expected_value() {
    let dir = TempDir::new().expect("temp dir");
    let path = column_path(&dir, "counters.hare");
    let file = Arc::new(
        FixedColumnFile::create_direct(&path, ColumnType::BigInt, false).expect("create column"),
    );

    let mut writer = ColumnWriter::open(file.clone());
    let tuple_id = writer.append(Some(ColumnValue::BigInt(10))).unwrap();

    let stale = writer
        .compare_and_update(tuple_id, Some(ColumnValue::BigInt(99)), Some(ColumnValue::BigInt(20)))
        .unwrap();
    assert!(!stale);

    let applied = writer
        .compare_and_update(tuple_id, Some(ColumnValue::BigInt(10)), Some(ColumnValue::BigInt(20)))
        .unwrap();
    assert!(applied);

    writer.commit().unwrap();
    let reader = ColumnReader::open(file.clone());
    assert_eq!(reader.get(tuple_id).unwrap(), Some(ColumnValue::BigInt(20)));
}

#[test]
fn column_file_survives_close_and_reopen_over_wal_disk_manager() {
    let dir = TempDir::new().expect("temp dir");
    let path = column_path(&dir, "vectors.hare");
    {
        let file = Arc::new(
            FixedColumnFile::create_wal(&path, ColumnType::Vector(3), false).expect("create column"),
        );
        let mut writer = ColumnWriter::open(file.clone());
        writer
            .append(Some(ColumnValue::Vector(vec![1.0, 2.0, 3.0])))
            .unwrap();
        writer
            .append(Some(ColumnValue::Vector(vec![4.0, 5.0, 6.0])))
            .unwrap();
        writer.commit().unwrap();
        writer.close();
        file.close().unwrap();
    }

    let reopened = Arc::new(FixedColumnFile::open_wal(&path).expect("reopen column"));
    let reader = ColumnReader::open(reopened);
    assert_eq!(reader.count().unwrap(), 2);
    assert_eq!(
        reader.get(1).unwrap(),
        Some(ColumnValue::Vector(vec![4.0, 5.0, 6.0]))
    );
}
