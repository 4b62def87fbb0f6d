use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("xlread"))
}

fn repo_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .parent()
        .and_then(|p| p.parent())
        .expect("repo root")
        .to_path_buf()
}

fn templates() -> PathBuf {
    repo_root()
        .join("tests")
        .join("fixtures")
        .join("data_templates")
}

fn generic_header(file_schema: u16) -> Vec<u8> {
    let mut bytes = vec![0x5A; 16];
    bytes.extend_from_slice(&file_schema.to_ne_bytes());
    bytes.extend_from_slice(&1u16.to_ne_bytes());
    bytes.extend_from_slice(&1_600_000_000u32.to_ne_bytes());
    bytes.extend_from_slice(&1i32.to_ne_bytes());
    bytes.extend_from_slice(&2i32.to_ne_bytes());
    bytes.resize(352, 0);
    bytes
}

/// A two-channel Mobee 32 recording holding two packets (ends at 460, 464).
fn erd_bytes() -> Vec<u8> {
    let mut bytes = generic_header(8);
    bytes.extend_from_slice(&256.0f64.to_ne_bytes());
    bytes.extend_from_slice(&2i32.to_ne_bytes());
    bytes.extend_from_slice(&0i32.to_ne_bytes());
    for phys in [0i32, 1, 2, 3] {
        bytes.extend_from_slice(&phys.to_ne_bytes());
    }
    for headbox in [4i32, 0, 0, 0] {
        bytes.extend_from_slice(&headbox.to_ne_bytes());
    }
    for serial in [1i32, 0, 0, 0] {
        bytes.extend_from_slice(&serial.to_ne_bytes());
    }
    bytes.extend_from_slice(b"5.4.1\0\0\0\0\0");
    bytes.extend_from_slice(&0i32.to_ne_bytes());
    for _ in 0..4 {
        bytes.extend_from_slice(&0i16.to_ne_bytes());
    }
    for _ in 0..4 {
        bytes.extend_from_slice(&32767i16.to_ne_bytes());
    }
    assert_eq!(bytes.len(), 446);

    bytes.extend_from_slice(&[0x00, 0b11, 0xFF, 0xFF, 0xFF, 0xFF]);
    bytes.extend_from_slice(&100i32.to_ne_bytes());
    bytes.extend_from_slice(&50i32.to_ne_bytes());
    bytes.extend_from_slice(&[0x00, 0b00, 5, 0]);
    bytes
}

fn etc_bytes(offsets: &[i32]) -> Vec<u8> {
    let mut bytes = generic_header(3);
    for (index, offset) in offsets.iter().enumerate() {
        bytes.extend_from_slice(&offset.to_ne_bytes());
        bytes.extend_from_slice(&(index as i32 * 256).to_ne_bytes());
        bytes.extend_from_slice(&256i32.to_ne_bytes());
        bytes.extend_from_slice(&1i16.to_ne_bytes());
        bytes.extend_from_slice(&0i16.to_ne_bytes());
    }
    bytes
}

fn write_input(temp: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = temp.path().join(name);
    std::fs::write(&path, bytes).expect("write input");
    path
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("utf8 stdout");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn help_supports_decode_and_read() {
    cmd().arg("decode").arg("--help").assert().success();
    cmd().arg("read").arg("--help").assert().success();
    cmd().arg("check-toc").arg("--help").assert().success();
}

#[test]
fn version_includes_build_metadata() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn decode_to_stdout_outputs_json() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());

    let assert = cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .assert()
        .success();
    let json = stdout_json(assert.get_output());
    assert_eq!(json["report_version"], 1);
    assert_eq!(json["tool"]["name"], "xlread");
    assert_eq!(json["kind"], "erd");
    assert_eq!(json["file_schema"], 8);
    assert_eq!(json["channels"]["headbox_name"], "Mobee 32");
    assert_eq!(json["packets"]["count"], 2);
    assert_eq!(json["packets"]["end_offsets"], serde_json::json!([460, 464]));
    assert!(json["packets"].get("packets").is_none());
}

#[test]
fn packets_flag_lists_every_packet() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());

    let assert = cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .arg("--packets")
        .assert()
        .success();
    let json = stdout_json(assert.get_output());
    let packets = json["packets"]["packets"].as_array().expect("packet list");
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1]["values"], serde_json::json!([105.0, 100.0]));
}

#[test]
fn explicit_kind_overrides_extension() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "recording.bin", &erd_bytes());

    let assert = cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--kind")
        .arg("erd")
        .arg("--stdout")
        .assert()
        .success();
    assert_eq!(stdout_json(assert.get_output())["kind"], "erd");
}

#[test]
fn unknown_extension_asks_for_kind() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "recording.bin", &erd_bytes());

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .assert()
        .failure()
        .code(2)
        .stderr(contains("error:").and(contains("--kind")));
}

#[test]
fn invalid_kind_is_rejected_by_parser() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--kind")
        .arg("wav")
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(contains("wav"));
}

#[test]
fn stdout_and_report_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());
    let report = temp.path().join("report.json");

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .arg("-o")
        .arg(report)
        .assert()
        .failure()
        .stderr(contains("--stdout").or(contains("--report")));
}

#[test]
fn pretty_and_compact_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());
    let report = temp.path().join("report.json");

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("-o")
        .arg(report)
        .arg("--pretty")
        .arg("--compact")
        .assert()
        .failure()
        .stderr(contains("--pretty").or(contains("--compact")));
}

#[test]
fn report_is_written_and_announced() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());
    let report = temp.path().join("out").join("report.json");

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("-o")
        .arg(&report)
        .arg("--pretty")
        .assert()
        .success()
        .stderr(contains("OK: report written"));

    let text = std::fs::read_to_string(&report).expect("report written");
    assert!(text.contains('\n'));
    let json: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(json["consumed"], 464);
}

#[test]
fn quiet_suppresses_ok_message() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());
    let report = temp.path().join("report.json");

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("-o")
        .arg(report)
        .arg("--quiet")
        .assert()
        .success()
        .stderr(contains("OK:").not());
}

#[test]
fn report_path_must_differ_from_input() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("-o")
        .arg(&input)
        .assert()
        .failure()
        .code(2)
        .stderr(contains("report path must differ from input"));
}

#[test]
fn missing_input_shows_error_and_hint() {
    let temp = TempDir::new().expect("tempdir");
    let missing = temp.path().join("missing.erd");

    cmd()
        .arg("decode")
        .arg(missing)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .assert()
        .failure()
        .code(2)
        .stderr(contains("error:").and(contains("hint:")));
}

#[test]
fn missing_templates_dir_shows_hint() {
    let temp = TempDir::new().expect("tempdir");
    let input = write_input(&temp, "study.erd", &erd_bytes());

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(temp.path().join("no_templates"))
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(contains("template directory not found").and(contains("hint:")));
}

#[test]
fn unknown_file_schema_suggests_template_directory() {
    let temp = TempDir::new().expect("tempdir");
    let mut bytes = erd_bytes();
    bytes[16..18].copy_from_slice(&99u16.to_ne_bytes());
    let input = write_input(&temp, "study.erd", &bytes);

    cmd()
        .arg("decode")
        .arg(&input)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .assert()
        .failure()
        .code(2)
        .stderr(contains("file schema 99").and(contains("hint:")));
}

#[test]
fn glob_matching_one_file_is_accepted() {
    let temp = TempDir::new().expect("tempdir");
    write_input(&temp, "study.erd", &erd_bytes());
    let pattern = temp.path().join("*.erd");

    let assert = cmd()
        .arg("decode")
        .arg(pattern)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .assert()
        .success();
    assert_eq!(stdout_json(assert.get_output())["kind"], "erd");
}

#[test]
fn glob_matching_many_files_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    write_input(&temp, "a.erd", &erd_bytes());
    write_input(&temp, "b.erd", &erd_bytes());
    let pattern = temp.path().join("*.erd");

    cmd()
        .arg("decode")
        .arg(pattern)
        .arg("--templates")
        .arg(templates())
        .arg("--stdout")
        .assert()
        .failure()
        .stderr(contains("multiple files match pattern").and(contains("hint:")));
}

#[test]
fn check_toc_accepts_matching_offsets() {
    let temp = TempDir::new().expect("tempdir");
    let erd = write_input(&temp, "study.erd", &erd_bytes());
    let etc = write_input(&temp, "study.etc", &etc_bytes(&[460, 464]));

    cmd()
        .arg("check-toc")
        .arg(&etc)
        .arg("--erd")
        .arg(&erd)
        .arg("--templates")
        .arg(templates())
        .assert()
        .success()
        .stderr(contains("OK: 2 table-of-contents offsets"));
}

#[test]
fn check_toc_reports_mismatch() {
    let temp = TempDir::new().expect("tempdir");
    let erd = write_input(&temp, "study.erd", &erd_bytes());
    let etc = write_input(&temp, "study.etc", &etc_bytes(&[460, 461]));

    cmd()
        .arg("check-toc")
        .arg(&etc)
        .arg("--erd")
        .arg(&erd)
        .arg("--templates")
        .arg(templates())
        .assert()
        .failure()
        .code(2)
        .stderr(contains("entry 1").and(contains("461")).and(contains("hint:")));
}

#[test]
fn check_toc_rejects_swapped_inputs() {
    let temp = TempDir::new().expect("tempdir");
    let erd = write_input(&temp, "study.erd", &erd_bytes());
    let etc = write_input(&temp, "study.etc", &etc_bytes(&[460]));

    cmd()
        .arg("check-toc")
        .arg(&erd)
        .arg("--erd")
        .arg(&etc)
        .arg("--templates")
        .arg(templates())
        .assert()
        .failure()
        .stderr(contains("expected a .etc file"));
}
