//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

/// A command isolated from the user's environment and config files.
fn cli_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rmiflash");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RMIFLASH_DEVICE")
        .env_remove("RMIFLASH_TRANSPORT")
        .env_remove("RMIFLASH_SYSFS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rmiflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn subcommand_help_lists_flags() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["flash", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config-image"))
        .stdout(predicate::str::contains("--enter-bootloader"));
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rmiflash"))
        .stderr(predicate::str::is_empty());
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_unknown_command() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .arg("falsh")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("flash"));
}

#[test]
fn exit_code_two_for_invalid_transport() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["--transport", "usb", "info"])
        .assert()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_flash_images() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .arg("flash")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("--firmware"));
}

#[test]
fn exit_code_two_without_device() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .arg("info")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("RMIFLASH_DEVICE"));
}

#[test]
fn exit_code_two_for_mode_over_hid() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["--transport", "hid", "--sysfs"])
        .arg(dir.path())
        .args(["mode", "bootloader"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("PS/2"));
}

/// Exit code 3: device node missing
#[test]
fn exit_code_three_for_missing_device() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("hidraw99");
    cli_cmd(dir.path())
        .arg("--device")
        .arg(&missing)
        .arg("info")
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty());
}

/// Exit code 1: generic error fallback
#[test]
fn exit_code_one_for_unreadable_image() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["--device", "/dev/null"])
        .arg("flash")
        .arg("--firmware")
        .arg(dir.path().join("missing.bin"))
        .arg("--config-image")
        .arg(dir.path().join("missing.cfg"))
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("failed to read firmware image"));
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn invalid_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("rmiflash.toml"), "invalid toml [[[")
        .expect("write invalid config");
    let sysfs = dir.path().join("serio1");
    fs::create_dir(&sysfs).expect("create sysfs dir");

    let output = cli_cmd(dir.path())
        .args(["--transport", "ps2", "--sysfs"])
        .arg(&sysfs)
        .args(["mode", "runtime"])
        .output()
        .expect("command should execute");

    assert!(
        output.status.success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn local_config_supplies_transport_and_sysfs() {
    let dir = tempdir().expect("tempdir should be created");
    let sysfs = dir.path().join("serio1");
    fs::create_dir(&sysfs).expect("create sysfs dir");
    fs::write(
        dir.path().join("rmiflash.toml"),
        format!(
            "[device]\ntransport = \"ps2\"\nsysfs = \"{}\"\n",
            sysfs.display()
        ),
    )
    .expect("write config");

    cli_cmd(dir.path())
        .args(["mode", "bootloader"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let written = fs::read_to_string(sysfs.join("drvctl")).expect("drvctl written");
    assert_eq!(written, "serio_raw");
}

// ============================================================================
// Mode Switching Tests
// ============================================================================

#[test]
fn mode_bootloader_binds_serio_raw() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["--transport", "ps2", "--sysfs"])
        .arg(dir.path())
        .args(["mode", "bootloader"])
        .assert()
        .success()
        .stderr(predicate::str::contains("serio_raw"));

    let written = fs::read_to_string(dir.path().join("drvctl")).expect("drvctl written");
    assert_eq!(written, "serio_raw");
}

#[test]
fn mode_runtime_binds_psmouse_quietly() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["-q", "--transport", "ps2", "--sysfs"])
        .arg(dir.path())
        .args(["mode", "runtime"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());

    let written = fs::read_to_string(dir.path().join("drvctl")).expect("drvctl written");
    assert_eq!(written, "psmouse");
}

#[test]
fn mode_with_missing_sysfs_dir_fails() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd(dir.path())
        .args(["--transport", "ps2", "--sysfs"])
        .arg(dir.path().join("serio9"))
        .args(["mode", "bootloader"])
        .assert()
        .code(3);
}
