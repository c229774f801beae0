//! Integration tests for kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    const ENV_INPUTS: &[&str] = &[
        "IMAGE_REPO_HOST",
        "DOCKER_REPO_HOST",
        "IMAGE_REPO_PROJECT",
        "DOCKER_REPO_PROJ",
        "NAMESPACE",
        "IMAGE_IDENTIFIER",
        "IMAGE_TAG",
        "BRANCHNAME",
        "DOCKERFILE",
        "BUILD_PATH",
        "RUST_LOG",
    ];

    /// kiln with an isolated config file and no inherited image inputs
    fn kiln(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env("KILN_CONFIG", config_dir.path().join("config.toml"));
        for var in ENV_INPUTS {
            cmd.env_remove(var);
        }
        cmd
    }

    fn write_context(root: &Path) {
        std::fs::create_dir_all(root.join("web")).unwrap();
        std::fs::write(root.join("Dockerfile"), "FROM php:8.3-fpm\nCOPY web /app\n").unwrap();
        std::fs::write(root.join("web/index.php"), "<?php echo 'hi';").unwrap();
    }

    fn target_args() -> Vec<&'static str> {
        vec![
            "--image-repo-host",
            "gcr.io",
            "--image-repo-project",
            "silta",
            "--namespace",
            "drupal",
            "--image-identifier",
            "php",
        ]
    }

    fn url_for(config: &TempDir, context: &Path) -> String {
        let output = kiln(config)
            .args(["image", "url"])
            .args(target_args())
            .arg("--build-path")
            .arg(context)
            .arg("--dockerfile")
            .arg(context.join("Dockerfile"))
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn help_displays() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("content-addressed image builds"));
    }

    #[test]
    fn version_displays() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_path_follows_env() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                config.path().join("config.toml").display().to_string(),
            ));
    }

    #[test]
    fn config_show_defaults() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("container_cli = \"docker\""));
    }

    #[test]
    fn config_set_then_get() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["config", "set", "build.container_cli", "podman"])
            .assert()
            .success();

        kiln(&config)
            .args(["config", "get", "build.container_cli"])
            .assert()
            .success()
            .stdout("podman\n");
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn url_with_explicit_tag() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["image", "url"])
            .args(target_args())
            .args(["--image-tag", "v1.4.0"])
            .assert()
            .success()
            .stdout("gcr.io/silta/drupal-php:v1.4.0\n");
    }

    #[test]
    fn url_from_environment() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["image", "url"])
            .env("DOCKER_REPO_HOST", "eu.gcr.io")
            .env("DOCKER_REPO_PROJ", "silta")
            .env("NAMESPACE", "drupal")
            .env("IMAGE_IDENTIFIER", "nginx")
            .env("IMAGE_TAG", "stable")
            .assert()
            .success()
            .stdout("eu.gcr.io/silta/drupal-nginx:stable\n");
    }

    #[test]
    fn url_ignores_environment_when_disabled() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["image", "url", "--use-env", "false"])
            .env("IMAGE_REPO_HOST", "gcr.io")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Missing required value: image-repo-host"));
    }

    #[test]
    fn url_fingerprint_is_location_independent() {
        let config = TempDir::new().unwrap();
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_context(first.path());
        write_context(second.path());

        let a = url_for(&config, first.path());
        let b = url_for(&config, second.path());

        assert_eq!(a, b);
        let tag = a.trim().rsplit_once(':').unwrap().1;
        assert_eq!(tag.len(), 40);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn url_fingerprint_changes_with_content() {
        let config = TempDir::new().unwrap();
        let context = TempDir::new().unwrap();
        write_context(context.path());
        let before = url_for(&config, context.path());

        std::fs::write(context.path().join("web/index.php"), "<?php echo 'bye';").unwrap();
        let after = url_for(&config, context.path());

        assert_ne!(before, after);
    }

    #[test]
    fn missing_identifier_fails() {
        let config = TempDir::new().unwrap();
        kiln(&config)
            .args(["image", "url", "--image-repo-host", "gcr.io", "--image-tag", "v1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Missing required value"));
    }

    #[test]
    fn build_dry_run_prints_commands() {
        let config = TempDir::new().unwrap();
        let context = TempDir::new().unwrap();
        write_context(context.path());

        kiln(&config)
            .args(["image", "build", "--debug", "--image-reuse=false"])
            .args([
                "--image-repo-host",
                "registry.example.com",
                "--image-repo-project",
                "silta",
                "--namespace",
                "drupal",
                "--image-identifier",
                "php",
                "--image-tag",
                "abc123",
                "--branchname",
                "Feature/Login",
            ])
            .arg("--build-path")
            .arg(context.path())
            .arg("--dockerfile")
            .arg(context.path().join("Dockerfile"))
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Command (not executed): docker build --tag registry.example.com/silta/drupal-php:abc123 --tag registry.example.com/silta/drupal-php:branch--feature-login",
            ))
            .stdout(predicate::str::contains(
                "Command (not executed): docker push registry.example.com/silta/drupal-php:branch--feature-login",
            ));
    }

    #[test]
    fn ecr_dry_run_announces_repository_setup() {
        let config = TempDir::new().unwrap();
        let context = TempDir::new().unwrap();
        write_context(context.path());

        kiln(&config)
            .args(["image", "build", "--debug"])
            .args([
                "--image-repo-host",
                "123456789012.dkr.ecr.eu-west-1.amazonaws.com",
                "--image-repo-project",
                "silta",
                "--namespace",
                "drupal",
                "--image-identifier",
                "php",
            ])
            .arg("--build-path")
            .arg(context.path())
            .arg("--dockerfile")
            .arg(context.path().join("Dockerfile"))
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Command (not executed): aws ecr create-repository --repository-name silta/drupal-php",
            ));
    }
}
