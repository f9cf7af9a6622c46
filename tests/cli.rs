//! End-to-end behavior of the `recc` binary, exercised without a real
//! REAPI server: the non-compiler fallback path, usage/help handling, and
//! the exit code surfaced when the configured server can't be reached.

use assert_cmd::Command;
use predicates::prelude::*;

fn recc() -> Command {
    Command::cargo_bin("recc").unwrap()
}

#[test]
fn no_arguments_is_a_usage_error() {
    recc().assert().failure().code(100);
}

#[test]
fn help_flag_prints_usage_and_exits_zero() {
    recc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("USAGE: recc"));
}

#[test]
fn version_flag_prints_version_and_exits_zero() {
    recc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn non_compiler_command_runs_locally() {
    recc()
        .arg("echo")
        .arg("hello from recc")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from recc"));
}

#[test]
fn non_compiler_command_propagates_local_exit_code() {
    recc()
        .arg("sh")
        .arg("-c")
        .arg("exit 7")
        .assert()
        .failure()
        .code(7);
}

#[test]
fn force_remote_compile_without_server_fails_with_transport_error() {
    recc()
        .env("RECC_FORCE_REMOTE", "1")
        .env("RECC_SERVER", "127.0.0.1:1")
        .arg("/bin/echo")
        .arg("-c")
        .arg("hello.c")
        .arg("-o")
        .arg("hello.o")
        .assert()
        .failure()
        .code(102);
}

#[test]
fn compiler_command_without_path_component_fails_as_bad_executable() {
    recc()
        .env("RECC_FORCE_REMOTE", "1")
        .arg("gcc")
        .arg("-c")
        .arg("hello.c")
        .arg("-o")
        .arg("hello.o")
        .assert()
        .failure()
        .code(101);
}
