mod common;

use package_registry::{ConfigScanner, LocationSpec, RegistrySettings, ScanError};

#[test]
fn conflicting_configuration_aborts_the_scan() {
    let first = common::create_toml_test_file(
        r#"
        [config."lib.x"]
        url = "http://cdn.example/x-1.toml"
        "#,
    );
    let second = common::create_toml_test_file(
        r#"
        [config."lib.x"]
        url = "http://cdn.example/x-2.toml"
        "#,
    );

    let mut scanner = ConfigScanner::new();
    scanner.scan_file(&first).unwrap();
    let error = scanner.scan_file(&second).unwrap_err();
    match error.downcast_ref::<ScanError>() {
        Some(ScanError::ConfigConflict { name, old, new, .. }) => {
            assert_eq!(name, "lib.x");
            assert_eq!(old.url.as_deref(), Some("http://cdn.example/x-1.toml"));
            assert_eq!(new.url.as_deref(), Some("http://cdn.example/x-2.toml"));
        }
        _ => panic!("expected a configuration conflict, got {error:#}"),
    }
}

#[test]
fn path_over_non_path_configuration_merges() {
    let first = common::create_toml_test_file(
        r#"
        [config."lib.x"]
        url = "http://cdn.example/x.toml"
        "#,
    );
    let second = common::create_toml_test_file(
        r#"
        [config."lib.x"]
        path = "local/x.toml"
        "#,
    );

    let mut scanner = ConfigScanner::new();
    scanner.scan_file(&first).unwrap();
    scanner.scan_file(&second).unwrap();
    assert_eq!(
        scanner.config()["lib.x"],
        LocationSpec {
            path: Some("local/x.toml".to_string()),
            url: Some("http://cdn.example/x.toml".to_string()),
            ..LocationSpec::default()
        }
    );
}

#[test]
fn declared_packages_map_to_their_file() {
    let file = common::create_toml_test_file(
        r#"
        [package."app.main"]
        requires = [".util", "app.plugins.*"]

        [package."app.util"]
        "#,
    );

    let mut scanner = ConfigScanner::new();
    scanner.scan_file(&file).unwrap();
    let path = file.to_string_lossy().replace('\\', "/");
    assert_eq!(scanner.config()["app.main"], LocationSpec::path(path.clone()));
    assert_eq!(scanner.config()["app.util"], LocationSpec::path(path));

    let scanned = &scanner.files()[0];
    assert_eq!(scanned.declares, vec!["app.main", "app.util"]);
    assert_eq!(scanned.requires, vec!["app.util", "app.plugins.*"]);
}

#[test]
fn consolidated_output_seeds_a_registry() {
    let file = common::create_toml_test_file(
        r#"
        [config."lib.*"]
        path = "vendor/lib/"
        alias = "ignored"

        [config."lib.core"]
        url = "http://cdn.example/core.toml"
        alias = "core"
        "#,
    );

    let mut scanner = ConfigScanner::new();
    scanner.scan_file(&file).unwrap();
    let output = scanner.to_toml().unwrap();

    let settings = RegistrySettings::from_toml(&output).unwrap();
    assert_eq!(settings.aliases["core"], "lib.core");
    assert!(!settings.aliases.contains_key("ignored"));
    assert_eq!(settings.config["lib.*"].path.as_deref(), Some("vendor/lib/"));
    assert_eq!(
        settings.config["lib.core"].url.as_deref(),
        Some("http://cdn.example/core.toml")
    );
}

#[test]
fn relative_declarations_are_rejected() {
    let file = common::create_toml_test_file(
        r#"
        [package.".c"]
        value = 1
        "#,
    );

    let mut scanner = ConfigScanner::new();
    let error = scanner.scan_file(&file).unwrap_err();
    match error.downcast_ref::<ScanError>() {
        Some(ScanError::RelativeName { name, .. }) => assert_eq!(name, ".c"),
        _ => panic!("expected a relative name error, got {error:#}"),
    }
    assert!(scanner.files().is_empty());
}

#[test]
fn relative_configuration_and_alias_targets_are_rejected() {
    let config = common::create_toml_test_file(
        r#"
        [config.".x"]
        path = "x.toml"
        "#,
    );
    let alias = common::create_toml_test_file(
        r#"
        [aliases]
        short = ".target"
        "#,
    );

    let mut scanner = ConfigScanner::new();
    for file in [&config, &alias] {
        let error = scanner.scan_file(file).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ScanError>(),
            Some(ScanError::RelativeName { .. })
        ));
    }
    assert!(scanner.config().is_empty());
    assert!(scanner.aliases().is_empty());
}
