mod common;

use package_registry::bundle::SOURCE_MARKER;
use package_registry::{FileGraph, write_bundle};
use serde_json::json;

const MAIN: &str = r#"
[package."app.main"]
requires = [".util"]
value = { name = "main" }
"#;

const UTIL: &str = r#"
[package."app.util"]
value = { name = "util" }
"#;

#[test]
fn files_are_ordered_after_their_dependencies() {
    let main = common::create_toml_test_file(MAIN);
    let util = common::create_toml_test_file(UTIL);

    let graph = FileGraph::builder()
        .load_file(main.to_path_buf())
        .load_file(util.to_path_buf())
        .build()
        .unwrap();

    let order: Vec<_> = graph.build_order().map(|file| file.path.clone()).collect();
    assert_eq!(order, vec![util.to_path_buf(), main.to_path_buf()]);
    assert_eq!(graph.declared(), vec!["app.main", "app.util"]);
    assert_eq!(graph.dependencies_of("app.main").len(), 1);
    assert!(graph.dot().contains("->"));
}

#[test]
fn wildcard_requirements_depend_on_every_covered_file() {
    let host = common::create_toml_test_file(
        "[package.host]\nrequires = [\"plugins.*\"]\n",
    );
    let one = common::create_toml_test_file("[package.\"plugins.one\"]\n");
    let two = common::create_toml_test_file("[package.\"plugins.two\"]\n");

    let graph = FileGraph::builder()
        .load_file(host.to_path_buf())
        .load_file(one.to_path_buf())
        .load_file(two.to_path_buf())
        .build()
        .unwrap();

    let order: Vec<_> = graph.build_order().map(|file| file.path.clone()).collect();
    assert_eq!(order.last(), Some(&host.to_path_buf()));
    assert_eq!(graph.dependencies_of("host").len(), 2);
}

#[test]
#[should_panic(expected = "Circular dependency detected")]
fn test_circular_dependency() {
    let a = common::create_toml_test_file("[package.a]\nrequires = [\"b\"]\n");
    let b = common::create_toml_test_file("[package.b]\nrequires = [\"a\"]\n");

    FileGraph::builder()
        .load_file(a.to_path_buf())
        .load_file(b.to_path_buf())
        .build()
        .unwrap();
}

#[tokio::test]
async fn bundle_loads_without_fetching() {
    let main = common::create_toml_test_file(MAIN);
    let util = common::create_toml_test_file(UTIL);
    let graph = FileGraph::builder()
        .load_file(main.to_path_buf())
        .load_file(util.to_path_buf())
        .build()
        .unwrap();

    let text = write_bundle(&graph).unwrap();
    assert!(text.contains("[bundle]"));
    assert_eq!(text.matches(SOURCE_MARKER).count(), 2);
    let util_section = text.find("app.util\"]\nvalue").unwrap();
    let main_section = text.find("app.main\"]\nrequires").unwrap();
    assert!(util_section < main_section);

    let (registry, fetcher) = common::memory_registry(&[]);
    registry.load_bundle(&text).unwrap();
    let value = common::get_and_assert_ok(&registry, "app.main").await;
    assert_eq!(
        value.to_json(),
        json!({"name": "main", "util": {"name": "util"}})
    );
    assert_eq!(fetcher.total_fetches(), 0);
}

#[tokio::test]
async fn bundle_carries_listings_for_required_wildcards() {
    let host = common::create_toml_test_file(
        "[package.host]\nrequires = [\"plugins.*\"]\n",
    );
    let one = common::create_toml_test_file("[package.\"plugins.one\"]\nvalue = 1\n");
    let deep = common::create_toml_test_file("[package.\"plugins.extra.deep\"]\nvalue = 2\n");
    let graph = FileGraph::builder()
        .load_file(host.to_path_buf())
        .load_file(one.to_path_buf())
        .load_file(deep.to_path_buf())
        .build()
        .unwrap();

    let text = write_bundle(&graph).unwrap();
    let (registry, fetcher) = common::memory_registry(&[]);
    registry.load_bundle(&text).unwrap();

    let value = common::get_and_assert_ok(&registry, "host").await;
    assert_eq!(
        value.to_json(),
        json!({"plugins": {"one": 1, "extra": {"deep": 2}}})
    );
    let listing = registry.lookup("plugins.__list__").unwrap().unwrap();
    assert_eq!(listing.as_listing().unwrap(), vec!["extra.*", "one"]);
    assert_eq!(fetcher.total_fetches(), 0);
}

#[test]
fn relative_declarations_cannot_be_bundled() {
    let file = common::create_toml_test_file("[package.\".c\"]\nvalue = 1\n");

    let error = FileGraph::builder()
        .load_file(file.to_path_buf())
        .build()
        .unwrap_err();
    assert!(error.to_string().contains("'.c' is relative"));
}
