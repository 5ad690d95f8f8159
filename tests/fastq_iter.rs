// Library-level FASTQ iteration over tables and databases written by the builders.
use std::path::{Path, PathBuf};

use vdbdump::api::{ErrorKind, FastqIter, FastqRecord, Fetched, IterParams};
use vdbdump::core::manager::Manager;
use vdbdump::core::schema::Schema;
use vdbdump::core::writer::{DatabaseBuilder, TableBuilder};

struct Spot {
    ids: [u64; 2],
    bases: &'static [u8],
    phred: u8,
    lens: [u32; 2],
}

const SPOTS: [Spot; 3] = [
    Spot { ids: [0, 0], bases: b"ACGTTT", phred: 30, lens: [4, 2] },
    Spot { ids: [0, 7], bases: b"GGCC", phred: 20, lens: [4, 3] },
    Spot { ids: [5, 0], bases: b"TT", phred: 40, lens: [3, 2] },
];

fn fill_sequence(builder: &mut TableBuilder, quality_rows: usize) {
    builder.add_column("PRIMARY_ALIGNMENT_ID", "U64", 1).expect("ids");
    builder.add_column("CMP_READ", "INSDC:dna:text", 1).expect("reads");
    builder.add_column("QUALITY", "INSDC:quality:phred", 1).expect("quality");
    builder.add_column("READ_LEN", "INSDC:coord:len", 1).expect("lens");
    for (i, spot) in SPOTS.iter().enumerate() {
        builder.append_u64s("PRIMARY_ALIGNMENT_ID", &spot.ids).expect("ids");
        builder.append_cell("CMP_READ", spot.bases).expect("reads");
        if i < quality_rows {
            let scores = vec![spot.phred; spot.bases.len()];
            builder.append_cell("QUALITY", &scores).expect("quality");
        }
        builder.append_u32s("READ_LEN", &spot.lens).expect("lens");
    }
}

fn write_table(path: &Path, quality_rows: usize) -> PathBuf {
    let schema = Schema::sra().expect("schema");
    let mut builder = TableBuilder::create(path, &schema)
        .expect("table")
        .with_schema_name("NCBI:SRA:tbl:sra");
    fill_sequence(&mut builder, quality_rows);
    builder.finish().expect("finish")
}

fn collect(iter: &mut FastqIter) -> Vec<(Fetched, FastqRecord)> {
    let mut out = Vec::new();
    loop {
        let mut rec = FastqRecord::default();
        let fetched = iter.next_into(&mut rec).expect("next");
        if !fetched.has_row() {
            break;
        }
        out.push((fetched, rec));
    }
    out
}

#[test]
fn unsplit_rows_carry_text_quality() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_table(&temp.path().join("SRR1"), SPOTS.len());

    let mut iter =
        FastqIter::open(&Manager::new(), &IterParams::new(&path), false).expect("open");
    assert!(!iter.split());
    assert_eq!(iter.row_count(), 3);

    let rows = collect(&mut iter);
    assert_eq!(rows.len(), 3);
    let (fetched, first) = &rows[0];
    assert!(matches!(fetched, Fetched::Row));
    assert_eq!(first.row_id, 1);
    assert_eq!(first.num_reads, 2);
    assert_eq!(first.cmp_read, "ACGTTT");
    assert_eq!(first.quality, "??????");
    assert!(first.read_len.is_none());

    let (_, third) = &rows[2];
    assert_eq!(third.row_id, 3);
    assert_eq!(third.prim_alig_id, [5, 0]);
    assert_eq!(third.quality, "II");
}

#[test]
fn split_rows_include_read_lengths() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_table(&temp.path().join("SRR2"), SPOTS.len());

    let mut iter = FastqIter::open(&Manager::new(), &IterParams::new(&path), true).expect("open");
    let rows = collect(&mut iter);
    let lens: Vec<_> = rows.iter().map(|(_, rec)| rec.read_len).collect();
    assert_eq!(lens, vec![Some([4, 2]), Some([4, 3]), Some([3, 2])]);
}

#[test]
fn row_window_is_clamped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_table(&temp.path().join("SRR3"), SPOTS.len());

    let params = IterParams {
        first_row: Some(2),
        row_count: Some(10),
        ..IterParams::new(&path)
    };
    let mut iter = FastqIter::open(&Manager::new(), &params, false).expect("open");
    assert_eq!(iter.row_count(), 2);
    let ids: Vec<_> = collect(&mut iter).iter().map(|(_, rec)| rec.row_id).collect();
    assert_eq!(ids, vec![2, 3]);

    let before = IterParams {
        first_row: Some(0),
        ..IterParams::new(&path)
    };
    let err = FastqIter::open(&Manager::new(), &before, false).err().expect("too early");
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[test]
fn missing_cell_reports_damaged_row_and_continues() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_table(&temp.path().join("SRR4"), 2);

    let mut iter =
        FastqIter::open(&Manager::new(), &IterParams::new(&path), false).expect("open");
    let rows = collect(&mut iter);
    assert_eq!(rows.len(), 3);
    assert!(matches!(rows[1].0, Fetched::Row));
    match &rows[2].0 {
        Fetched::Damaged(err) => {
            assert_eq!(rows[2].1.row_id, 3);
            assert_eq!(err.row(), Some(3));
        }
        other => panic!("expected damaged row, got {other:?}"),
    }
}

#[test]
fn database_sources_use_sequence_table() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("SRZ1");
    let schema = Schema::sra().expect("schema");
    let db = DatabaseBuilder::create(&path).expect("db");
    let mut seq = db.create_table("SEQUENCE", &schema).expect("sequence");
    fill_sequence(&mut seq, SPOTS.len());
    seq.finish().expect("finish sequence");
    db.finish().expect("finish db");

    let mut iter =
        FastqIter::open(&Manager::new(), &IterParams::new(&path), false).expect("open");
    assert_eq!(collect(&mut iter).len(), 3);
}

#[test]
fn table_without_required_column_fails_to_open() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("SRR5");
    let schema = Schema::sra().expect("schema");
    let mut builder = TableBuilder::create(&path, &schema).expect("table");
    builder.add_column("PRIMARY_ALIGNMENT_ID", "U64", 1).expect("ids");
    builder.append_u64s("PRIMARY_ALIGNMENT_ID", &[0]).expect("ids");
    builder.finish().expect("finish");

    let err = FastqIter::open(&Manager::new(), &IterParams::new(&path), false)
        .err()
        .expect("missing CMP_READ");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn unsplit_mode_never_touches_read_len() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("SRR6");
    let schema = Schema::sra().expect("schema");
    let mut builder = TableBuilder::create(&path, &schema).expect("table");
    builder.add_column("PRIMARY_ALIGNMENT_ID", "U64", 1).expect("ids");
    builder.add_column("CMP_READ", "INSDC:dna:text", 1).expect("reads");
    builder.add_column("QUALITY", "INSDC:quality:phred", 1).expect("quality");
    builder.append_u64s("PRIMARY_ALIGNMENT_ID", &[0, 0]).expect("ids");
    builder.append_cell("CMP_READ", b"ACGT").expect("reads");
    builder.append_cell("QUALITY", &[40; 4]).expect("quality");
    builder.finish().expect("finish");

    let manager = Manager::new();
    let mut iter = FastqIter::open(&manager, &IterParams::new(&path), false).expect("unsplit");
    let rows = collect(&mut iter);
    assert_eq!(rows.len(), 1);
    assert!(matches!(rows[0].0, Fetched::Row));
    assert_eq!(rows[0].1.quality, "IIII");
    assert!(rows[0].1.read_len.is_none());

    let err = FastqIter::open(&manager, &IterParams::new(&path), true)
        .err()
        .expect("split needs READ_LEN");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
