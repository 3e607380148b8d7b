use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn vm16() -> Command {
    Command::cargo_bin("vm16").unwrap()
}

fn tmp(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name)
}

#[test]
fn runs_without_arguments() {
    vm16().assert().success();
}

#[test]
fn runs_add() {
    vm16()
        .arg("run")
        .arg("tests/files/add.asm")
        .assert()
        .success()
        .stdout(contains("r1: 0x0008"))
        .stdout(contains("Completed"));
}

#[test]
fn bare_path_runs() {
    vm16()
        .arg("tests/files/call.asm")
        .assert()
        .success()
        .stdout(contains("r1: 0x0066"))
        .stdout(contains("r0: 0xFFFF"));
}

#[test]
fn countdown_sets_zero_flag() {
    vm16()
        .arg("run")
        .arg("tests/files/countdown.asm")
        .assert()
        .success()
        .stdout(contains("r1: 0x0000"))
        .stdout(contains("Z=1 N=0"));
}

#[test]
fn stack_overflow_fails() {
    vm16()
        .arg("run")
        .arg("tests/files/overflow.asm")
        .assert()
        .failure()
        .stdout(contains("Faulted"))
        .stderr(contains("stack overflow at 0x0000"));
}

#[test]
fn protected_store_fails() {
    vm16()
        .arg("run")
        .arg("tests/files/protected.asm")
        .assert()
        .failure()
        .stderr(contains("protected address 0x0200"));
}

#[test]
fn step_limit_stops_loop() {
    vm16()
        .args(["run", "tests/files/forever.asm", "--max-steps", "250"])
        .args(["--steps-per-slice", "7"])
        .assert()
        .success()
        .stdout(contains("after 250 steps"));
}

#[test]
fn trace_prints_each_step() {
    vm16()
        .args(["run", "tests/files/add.asm", "--trace"])
        .assert()
        .success()
        .stderr(contains("ADD r1, r2"))
        .stderr(contains("HLT"));
}

#[test]
fn trace_from_environment() {
    vm16()
        .args(["run", "tests/files/add.asm"])
        .env("VM16_TRACE", "1")
        .assert()
        .success()
        .stderr(contains("MOV r1, #5"));

    vm16()
        .args(["run", "tests/files/add.asm"])
        .env("VM16_TRACE", "0")
        .assert()
        .success()
        .stderr(contains("trace").not());
}

#[test]
fn check_reports_unresolved_label() {
    vm16()
        .arg("check")
        .arg("tests/files/bad_label.asm")
        .assert()
        .failure()
        .stderr(contains("nowhere"))
        .stderr(contains("asm::unresolved_label"));
}

#[test]
fn check_reports_overflow() {
    vm16()
        .arg("check")
        .arg("tests/files/bad_imm.asm")
        .assert()
        .failure()
        .stderr(contains("asm::overflow"))
        .stderr(contains("0 to 255"));
}

#[test]
fn check_accepts_kitchen_sink() {
    vm16()
        .arg("check")
        .arg("tests/files/kitchen_sink.asm")
        .assert()
        .success()
        .stdout(contains("no errors found"));
}

#[test]
fn compiles_and_runs_binary() {
    let dest = tmp("add.bin");
    vm16()
        .arg("compile")
        .arg("tests/files/add.asm")
        .arg(&dest)
        .args(["--text", "--listing"])
        .assert()
        .success()
        .stdout(contains("(0x0000)  HLT"));

    let bytes = fs::read(&dest).unwrap();
    assert_eq!(bytes.len(), 8);
    let text = fs::read_to_string(dest.with_extension("txt")).unwrap();
    assert_eq!(text.lines().count(), 4);
    assert!(text.lines().all(|line| line.len() == 16));
    assert_eq!(text.lines().last(), Some("0000000000000000"));

    vm16()
        .arg("run")
        .arg(&dest)
        .assert()
        .success()
        .stdout(contains("r1: 0x0008"));

    vm16()
        .arg("disasm")
        .arg(&dest)
        .assert()
        .success()
        .stdout(contains("MOV r1, #5").and(contains("ADD r1, r2")));
}

#[test]
fn rejects_odd_binary() {
    let dest = tmp("odd.bin");
    fs::write(&dest, [1u8, 2, 3]).unwrap();
    vm16()
        .arg("run")
        .arg(&dest)
        .assert()
        .failure()
        .stderr(contains("not aligned to 16 bits"));
}

#[test]
fn rejects_unknown_extension() {
    vm16()
        .arg("run")
        .arg("Cargo.toml")
        .assert()
        .failure()
        .stderr(contains("unknown extension"));
}

#[test]
fn writes_vram_snapshot() {
    let dest = tmp("pixel.ppm");
    vm16()
        .args(["run", "tests/files/pixel.asm", "--vram"])
        .arg(&dest)
        .assert()
        .success();

    let image = fs::read(&dest).unwrap();
    let header = b"P6\n64 64\n255\n";
    assert!(image.starts_with(header));
    assert_eq!(image.len(), header.len() + 64 * 64 * 3);
    assert_eq!(&image[header.len()..header.len() + 6], &[255, 0, 0, 0, 0, 0]);
}
