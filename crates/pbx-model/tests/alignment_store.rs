use pbx_model::{Alignment, AlignmentDocument, SequenceStore};

fn document() -> AlignmentDocument {
    AlignmentDocument {
        alphabet: "ACGT".to_string(),
        taxa: vec!["t1".into(), "t2".into(), "t3".into()],
        sequences: vec!["ACg-".into(), "AcTN".into(), "A?TT".into()],
    }
}

#[test]
fn document_maps_symbols_and_missing_cells() {
    let alignment = Alignment::from_document(&document()).unwrap();
    assert_eq!(alignment.n_taxa(), 3);
    assert_eq!(alignment.n_sites(), 4);
    assert_eq!(alignment.dim(), 4);
    assert_eq!(alignment.state(0, 2), Some(2));
    assert_eq!(alignment.state(1, 1), Some(1));
    assert_eq!(alignment.state(0, 3), None);
    assert_eq!(alignment.state(1, 3), None);
    assert_eq!(alignment.state(2, 1), None);
    assert_eq!(alignment.distinct_states(0), 1);
    assert_eq!(alignment.distinct_states(2), 2);
}

#[test]
fn missing_map_tracks_masked_columns() {
    let mut alignment = Alignment::from_document(&document()).unwrap();
    assert!(alignment.is_active(3));
    alignment.set_state(2, 3, None);
    assert!(alignment.is_active(3), "map only changes after a refill");
    alignment.fill_missing_map();
    assert!(!alignment.is_active(3));
    assert!(alignment.is_active(0));
}

#[test]
fn ragged_rows_are_data_errors() {
    let mut doc = document();
    doc.sequences[1] = "ACT".into();
    let err = Alignment::from_document(&doc).unwrap_err();
    assert_eq!(err.info().code, "ragged-alignment");
    assert_eq!(err.info().context.get("taxon").map(String::as_str), Some("t2"));
}

#[test]
fn load_reads_json_documents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aln.json");
    std::fs::write(&path, serde_json::to_string(&document()).unwrap()).unwrap();
    let alignment = Alignment::load(&path).unwrap();
    assert_eq!(alignment.taxa(), &["t1", "t2", "t3"]);

    let err = Alignment::load(&dir.path().join("missing.json")).unwrap_err();
    assert_eq!(err.info().code, "alignment-read");
}
