//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn kiln() -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env_remove("KILN_SPEC");
        cmd
    }

    fn write_spec(dir: &TempDir, buildah: &str) -> PathBuf {
        let path = dir.path().join("build.toml");
        std::fs::write(
            &path,
            format!(
                r#"
project_name = "valkey"
base_image = "opensuse/leap:15.6"
distro = "suse"

[buildah]
path = "{buildah}"

[valkey]
version = "8.0.1"
source_url = "https://example.com/valkey-8.0.1.tar.gz"
"#
            ),
        )
        .unwrap();
        path
    }

    fn key_output(args: &[&str]) -> String {
        let output = kiln().arg("key").args(args).output().unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("layer-cached valkey"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn core_help_lists_actions() {
        kiln()
            .args(["core", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("build"))
            .stdout(predicate::str::contains("delete-cache"));
    }

    #[test]
    fn module_help_lists_actions() {
        kiln()
            .args(["module", "valkey-json", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("build"))
            .stdout(predicate::str::contains("delete-cache"));
    }

    #[test]
    fn unknown_module_is_rejected() {
        kiln()
            .args(["runtime", "build", "--modules", "valkey-json,valkey-graph=1.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown module 'valkey-graph'"));
    }

    #[test]
    fn unconfigured_module_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        let spec = write_spec(&dir, "/nonexistent/kiln-test/buildah");

        kiln()
            .arg("--spec")
            .arg(&spec)
            .args(["module", "valkey-search", "build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("valkey-search is not configured"))
            .stderr(predicate::str::contains("[modules.<name>.versions]"));
    }

    #[test]
    fn missing_spec_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["--spec"])
            .arg(dir.path().join("nope.toml"))
            .args(["core", "build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Spec file not found"))
            .stderr(predicate::str::contains("KILN_SPEC"));
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build.toml");
        std::fs::write(&path, "project_name = \"valkey\"\n").unwrap();

        kiln()
            .env("KILN_SPEC", &path)
            .args(["runtime", "build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid build spec"));
    }

    #[test]
    fn missing_backend_is_reported() {
        let dir = TempDir::new().unwrap();
        let spec = write_spec(&dir, "/nonexistent/kiln-test/buildah");

        kiln()
            .arg("--spec")
            .arg(&spec)
            .args(["prune", "valkey/cache", "-y"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Build backend not found"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn key_prints_short_hex_digest() {
        let key = key_output(&["--image", "alpine:3", "--", "echo", "hi"]);
        assert_eq!(key.len(), 12);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_is_deterministic() {
        let args = ["--image", "alpine:3", "--env", "A=1", "--", "make", "-j4"];
        assert_eq!(key_output(&args), key_output(&args));
    }

    #[test]
    fn key_depends_on_every_input() {
        let base = key_output(&["--image", "alpine:3", "--", "echo", "hi"]);
        let other_image = key_output(&["--image", "alpine:4", "--", "echo", "hi"]);
        let with_env = key_output(&["--image", "alpine:3", "--env", "A=1", "--", "echo", "hi"]);
        let with_extra = key_output(&[
            "--image", "alpine:3", "--extra", "step=deps", "--", "echo", "hi",
        ]);

        assert_ne!(base, other_image);
        assert_ne!(base, with_env);
        assert_ne!(base, with_extra);
        assert_ne!(with_env, with_extra);
    }

    #[test]
    fn key_length_is_configurable() {
        let key = key_output(&["--image", "alpine:3", "--length", "64", "--", "true"]);
        assert_eq!(key.len(), 64);
    }

    #[test]
    fn key_rejects_short_length() {
        kiln()
            .args(["key", "--image", "alpine:3", "--length", "4", "--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("between 12 and 64"));
    }

    #[test]
    fn key_requires_command() {
        kiln()
            .args(["key", "--image", "alpine:3"])
            .assert()
            .failure();
    }
}
