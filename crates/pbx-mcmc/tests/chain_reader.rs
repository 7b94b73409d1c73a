use std::io::Cursor;

use pbx_core::RngHandle;
use pbx_model::{Dimensions, GlobalParameterState};
use tempfile::tempdir;

use pbx_mcmc::{count_snapshots, ChainReader, ChainWriter, JsonLinesChain};

fn sample_state(seed: u64) -> GlobalParameterState {
    let dims = Dimensions::new(5, 3, 3, 4, 2);
    let mut rng = RngHandle::from_seed(seed);
    GlobalParameterState::initial(&dims, &mut rng).unwrap()
}

#[test]
fn writer_and_reader_agree_on_snapshot_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("run.chain");
    let mut writer = ChainWriter::create(&path).unwrap();
    for seed in 0..3 {
        writer.append(&sample_state(seed)).unwrap();
    }
    assert_eq!(writer.written(), 3);
    let path = writer.finish().unwrap();
    assert_eq!(count_snapshots(&path).unwrap(), 3);

    let mut reader = JsonLinesChain::open(&path).unwrap();
    assert_eq!(reader.skip(2).unwrap(), 2);
    let last = reader.next_snapshot().unwrap().unwrap();
    assert_eq!(last.allocation, sample_state(2).allocation);
    assert!(reader.next_snapshot().unwrap().is_none());
    assert!(reader.next_snapshot().unwrap().is_none());
}

#[test]
fn blank_lines_are_skipped() {
    let line = serde_json::to_string(&sample_state(4)).unwrap();
    let text = format!("\n{line}\n\n{line}\n");
    let mut reader = JsonLinesChain::new(Cursor::new(text));
    assert_eq!(reader.skip(10).unwrap(), 2);
}

#[test]
fn malformed_line_reports_its_position() {
    let line = serde_json::to_string(&sample_state(1)).unwrap();
    let text = format!("{line}\n{{\"alpha\": \n");
    let mut reader = JsonLinesChain::new(Cursor::new(text));
    assert!(reader.next_snapshot().unwrap().is_some());
    let err = reader.next_snapshot().unwrap_err();
    assert_eq!(err.info().code, "chain-parse");
    assert_eq!(err.info().context.get("line").map(String::as_str), Some("2"));
}

#[test]
fn missing_chain_is_a_serde_error() {
    let dir = tempdir().unwrap();
    let err = JsonLinesChain::open(&dir.path().join("absent.chain")).unwrap_err();
    assert_eq!(err.info().code, "chain-open");
}
