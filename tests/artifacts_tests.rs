use std::path::Path;
use tessera::artifacts::{spec_for_row, ArtifactWriter, WriteOutcome, MODULE_NAME};
use tessera::case::CaseSources;
use tessera::export::TableReader;
use tessera::store::MemoryCase;
use tessera::types::{ArtifactKind, AttrType, AttrValue, CancelToken, TableKind};

fn single_row(csv: &str) -> tessera::export::ExportRow {
    TableReader::new(csv.as_bytes(), ',', CancelToken::new())
        .next()
        .unwrap()
        .unwrap()
}

fn case_with_file() -> (MemoryCase, tessera::types::FileId) {
    let case = MemoryCase::new();
    let source = case
        .add_image_source("dev", "UTC", Path::new("/work/disk1.vhd"))
        .unwrap();
    let file = case.register_file(source.id, "4", "WebCacheV01.dat", "/root/disk1/");
    (case, file)
}

#[test]
fn identical_specs_are_written_once() {
    let (case, file) = case_with_file();
    let writer = ArtifactWriter::new(&case);
    let csv = "Url,AccessedTime\nVisited: bob@http://example.com/a,01/02/2019 02:33:45 PM\n";
    let spec = spec_for_row(TableKind::History, &single_row(csv)).unwrap();

    let first = writer.write(file, &spec).unwrap();
    assert!(matches!(first, WriteOutcome::Created(_)));
    let second = writer.write(file, &spec).unwrap();
    assert_eq!(second, WriteOutcome::Existing);
    assert_eq!(case.artifact_count(), 1);
}

#[test]
fn rerunning_over_identical_rows_creates_nothing_new() {
    let (case, file) = case_with_file();
    let writer = ArtifactWriter::new(&case);
    let csv = "RDomain,LastModified,Name,Value\ncom.example.www,01/02/2019 02:33:45 PM,61 62,63\n";

    for _ in 0..3 {
        let spec = spec_for_row(TableKind::Cookie, &single_row(csv)).unwrap();
        writer.write(file, &spec).unwrap();
    }
    assert_eq!(case.artifact_count(), 1);
}

#[test]
fn indexing_failure_does_not_lose_the_artifact() {
    let (case, file) = case_with_file();
    case.set_index_failure(true);
    let writer = ArtifactWriter::new(&case);
    let csv = "Url,Title\nhttp://example.com,home\n";
    let spec = spec_for_row(TableKind::Bookmark, &single_row(csv)).unwrap();

    let outcome = writer.write(file, &spec).unwrap();
    assert!(matches!(outcome, WriteOutcome::Created(_)));
    assert_eq!(case.artifact_count(), 1);
    assert_eq!(case.indexed_count(), 0);
}

#[test]
fn download_rows_produce_no_artifact() {
    let csv = "Url,AccessedTime,ResponseHeaders\nhttp://example.com/f.zip,x,blob\n";
    assert!(spec_for_row(TableKind::Download, &single_row(csv)).is_none());
}

#[test]
fn history_spec_carries_program_name_and_domain() {
    let csv = "Url,AccessedTime\nVisited: carol@https://files.example.org/doc,junk\n";
    let spec = spec_for_row(TableKind::History, &single_row(csv)).unwrap();
    assert_eq!(spec.kind, ArtifactKind::WebHistory);

    let prog = spec
        .attributes
        .iter()
        .find(|a| a.attr_type == AttrType::ProgName)
        .unwrap();
    assert_eq!(prog.value, AttrValue::Text(MODULE_NAME.into()));

    let domain = spec
        .attributes
        .iter()
        .find(|a| a.attr_type == AttrType::Domain)
        .unwrap();
    assert_eq!(domain.value, AttrValue::Text("files.example.org".into()));

    // The unparseable timestamp is omitted, not defaulted.
    assert!(
        !spec
            .attributes
            .iter()
            .any(|a| a.attr_type == AttrType::DatetimeAccessed)
    );
}
