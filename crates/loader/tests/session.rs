//! End-to-end launches through the pty. Scenarios that need to actually enter
//! the image only run on AArch64 hosts; failure paths that die before the
//! jump run anywhere.

mod common;

use std::io::Read;

use charon_loader::prelude::*;
use common::Segment;

fn drain_master(session: &Session) -> Vec<u8> {
    let mut master = std::fs::File::from(session.master.try_clone().unwrap());
    let mut output = Vec::new();
    // EOF or EIO once the child side hangs up; both just end the drain
    let _ = master.read_to_end(&mut output);
    output
}

#[test]
fn a_missing_interpreter_kills_the_child_before_entry() {
    let image = common::build_image(
        3,
        0,
        Some("/nonexistent/interpreter"),
        &[Segment { address: 0, file_bytes: vec![0u8; 0x100], mem_size: 0x100, flags: 0b101 }],
    );
    let path = common::write_image("child-nointerp", &image);

    let argv = vec![path.display().to_string()];
    let session = start_session(&path, &argv, &[]).expect("pty and fork should succeed");
    let output = drain_master(&session);
    assert!(output.is_empty(), "the target never ran, nothing may appear on the terminal");

    match session.wait().unwrap() {
        WaitStatus::Exited(_, code) => assert_ne!(code, 0),
        status => panic!("unexpected wait status {status:?}"),
    }
    std::fs::remove_file(&path).ok();
}

#[test]
fn a_corrupt_image_kills_the_child_before_entry() {
    let mut image = common::build_image(
        3,
        0,
        None,
        &[Segment { address: 0, file_bytes: vec![0u8; 0x100], mem_size: 0x100, flags: 0b101 }],
    );
    image[0] ^= 0xFF;
    let path = common::write_image("child-corrupt", &image);

    let argv = vec![path.display().to_string()];
    let session = start_session(&path, &argv, &[]).expect("pty and fork should succeed");
    drain_master(&session);

    match session.wait().unwrap() {
        WaitStatus::Exited(_, code) => assert_ne!(code, 0),
        status => panic!("unexpected wait status {status:?}"),
    }
    std::fs::remove_file(&path).ok();
}

/// A hand-assembled static position-independent image that writes `hi\n` to
/// descriptor 1 and exits 0, exercising the whole pipeline: mapping, stack,
/// entry, and the pty wiring.
#[cfg(target_arch = "aarch64")]
#[test]
fn a_static_pie_image_runs_to_completion() {
    let code: [u32; 8] = [
        0xD280_0020, // mov x0, #1
        0x1000_00E1, // adr x1, message (28 bytes ahead)
        0xD280_0062, // mov x2, #3
        0xD280_0808, // mov x8, #64 (write)
        0xD400_0001, // svc #0
        0xD280_0000, // mov x0, #0
        0xD280_0BA8, // mov x8, #93 (exit)
        0xD400_0001, // svc #0
    ];
    let mut contents = Vec::new();
    for word in code {
        contents.extend_from_slice(&word.to_le_bytes());
    }
    contents.extend_from_slice(b"hi\n");

    let length = contents.len() as u64;
    let image = common::build_image(
        3,
        0,
        None,
        &[Segment { address: 0, file_bytes: contents, mem_size: length, flags: 0b101 }],
    );
    let path = common::write_image("child-hello", &image);

    let argv = vec![path.display().to_string()];
    let envp = vec!["TERM=dumb".to_string()];
    let session = start_session(&path, &argv, &envp).expect("pty and fork should succeed");

    let output = drain_master(&session);
    // The terminal's output processing may expand the newline
    let output = String::from_utf8_lossy(&output).replace('\r', "");
    assert_eq!(output, "hi\n");

    match session.wait().unwrap() {
        WaitStatus::Exited(_, code) => assert_eq!(code, 0),
        status => panic!("unexpected wait status {status:?}"),
    }
    std::fs::remove_file(&path).ok();
}
