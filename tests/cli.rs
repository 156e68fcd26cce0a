use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

/// `toaster` running in an empty directory against a fresh SQLite file.
fn toaster(dir: &Path) -> Command {
  let mut cmd = Command::cargo_bin("toaster").unwrap();
  cmd.current_dir(dir)
     .env_remove("DATABASE_URL")
     .env_remove("TOASTER_DEBUG")
     .env("TOASTER_DB_URL", dir.join("toaster.db"))
     .env("TOASTER_DATA_DIR", dir.join("store"))
     .env("TOASTER_USER", "tester");
  cmd
}

fn stderr_of(output: &std::process::Output) -> String {
  String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn reversed_mjd_range_is_rejected_before_touching_anything() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("J1909.tim");
  let output = toaster(dir.path()).args(["create_tim", "--psr", "J1909-3744", "--mjd", "55000", "54000", "--outfile"])
                                  .arg(&out)
                                  .output()
                                  .unwrap();
  assert_eq!(output.status.code(), Some(1));
  let stderr = stderr_of(&output);
  assert!(stderr.contains("BadInputError"), "stderr: {}", stderr);
  assert!(stderr.contains("larger than the second"), "stderr: {}", stderr);
  assert!(!out.exists());
  assert!(!dir.path().join("toaster.db").exists());
}

#[test]
fn negative_toa_id_is_bad_input() {
  let dir = TempDir::new().unwrap();
  let output = toaster(dir.path()).args(["create-tim", "--toa-id", "3", "-1"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("BadInputError"));
}

#[test]
fn plugins_lists_every_family() {
  let dir = TempDir::new().unwrap();
  let output = toaster(dir.path()).arg("plugins").output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8_lossy(&output.stdout);
  for name in ["pamit", "ddfixfreq", "snr", "maskpct", "weights", "profile", "composite", "tempo2"] {
    assert!(stdout.contains(name), "{} missing from:\n{}", name, stdout);
  }
}

#[test]
fn unknown_manipulator_names_the_alternatives() {
  let dir = TempDir::new().unwrap();
  std::fs::write(dir.path().join("in.ar"), b"archive").unwrap();
  let output = toaster(dir.path()).args(["manipulate", "squash", "in.ar"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  let stderr = stderr_of(&output);
  assert!(stderr.contains("UnrecognizedValueError"));
  assert!(stderr.contains("pamit, ddfixfreq"));
}

#[test]
fn unknown_debug_category_is_rejected() {
  let dir = TempDir::new().unwrap();
  let output = toaster(dir.path()).args(["--debug", "everything", "plugins"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("UnrecognizedValueError"));
}

#[test]
fn pulsars_can_be_added_and_queried() {
  let dir = TempDir::new().unwrap();
  toaster(dir.path()).args(["add-pulsar", "J1909-3744", "--alias", "1909-3744"]).assert().success();

  let output = toaster(dir.path()).args(["create-tim", "--psr", "1909-3744"]).output().unwrap();
  assert!(output.status.success(), "stderr: {}", stderr_of(&output));
  assert_eq!(String::from_utf8_lossy(&output.stdout), "FORMAT 1\n\n");

  let output = toaster(dir.path()).args(["create-tim", "--psr", "J0000+0000"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("UnrecognizedValueError"));
}

#[test]
fn merging_a_pulsar_into_itself_is_bad_input() {
  let dir = TempDir::new().unwrap();
  toaster(dir.path()).args(["add-pulsar", "J1909-3744", "--alias", "1909-3744"]).assert().success();
  let output = toaster(dir.path()).args(["merge-pulsar", "1909-3744", "J1909-3744"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("BadInputError"));
}

#[test]
fn usage_errors_exit_with_one_and_help_with_zero() {
  let dir = TempDir::new().unwrap();
  let output = toaster(dir.path()).args(["create_tim", "--psr", "J1909-3744", "--mjd", "55000"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(!stderr_of(&output).is_empty());

  toaster(dir.path()).arg("--help").assert().code(0);
  toaster(dir.path()).arg("frobnicate").assert().code(1);
}
