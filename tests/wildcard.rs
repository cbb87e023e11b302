mod common;

use package_registry::{LocationSpec, RegistryError};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn package(name: &str, value: &str) -> String {
    format!("[package.\"{name}\"]\nvalue = {value}\n")
}

#[tokio::test]
async fn listing_file_drives_expansion() {
    let x = package("plugins.x", "'X'");
    let y = package("plugins.y", "'Y'");
    let list = package("plugins.__list__", "['x', 'y']");
    let (registry, fetcher) = common::memory_registry(&[
        ("plugins/__list__.toml", list.as_str()),
        ("plugins/x.toml", x.as_str()),
        ("plugins/y.toml", y.as_str()),
    ]);

    let value = common::get_and_assert_ok(&registry, "plugins.*").await;
    assert_eq!(value.to_json(), json!({"x": "X", "y": "Y"}));
    assert_eq!(fetcher.fetch_count("plugins/__list__.toml"), 1);

    let view = registry.lookup("plugins.*").unwrap().unwrap();
    assert!(view.get("x").unwrap().ptr_eq(value.get("x").unwrap()));
}

#[tokio::test]
async fn missing_listing_is_synthesized_from_the_directory() {
    let dark = package("themes.dark", "'dark'");
    let light = package("themes.light", "'light'");
    let neon = package("themes.extra.neon", "'neon'");
    let (registry, _) = common::memory_registry(&[
        ("themes/dark.toml", dark.as_str()),
        ("themes/light.toml", light.as_str()),
        ("themes/extra/neon.toml", neon.as_str()),
        ("themes/README.md", "not a package"),
    ]);

    let value = common::get_and_assert_ok(&registry, "themes.*").await;
    assert_eq!(
        value.to_json(),
        json!({"dark": "dark", "light": "light", "extra": {"neon": "neon"}})
    );

    let listing = registry.lookup("themes.__list__").unwrap().unwrap();
    assert_eq!(
        listing.as_listing().unwrap(),
        vec!["dark", "extra.*", "light"]
    );
    assert_eq!(
        registry.find_location("themes.extra.neon").unwrap(),
        Some(LocationSpec::path("themes/extra/neon.toml"))
    );
}

#[tokio::test]
async fn wildcard_without_listing_or_directory_fails() {
    let (registry, _) = common::memory_registry(&[]);
    let result = registry.get("nothing.*").await;
    assert!(matches!(result, Err(RegistryError::DependencyFailed { .. })));
}

#[tokio::test]
async fn pattern_views_republish_every_level() {
    let (registry, _) = common::memory_registry(&[]);
    let value = common::data(json!({"leaf": true}));
    registry.define_value("a.b.c", value.clone()).unwrap();
    registry.define_value("a.d", common::data(json!(1))).unwrap();

    let ab = registry.lookup("a.b.*").unwrap().unwrap();
    assert!(ab.get("c").unwrap().ptr_eq(&value));
    let a = registry.lookup("a.*").unwrap().unwrap();
    assert!(a.get("b").unwrap().get("c").unwrap().ptr_eq(&value));
    assert_eq!(a.get("d").unwrap().to_json(), json!(1));
    let root = registry.lookup("*").unwrap().unwrap();
    let leaf = root.get("a").unwrap().get("b").unwrap().get("c").unwrap();
    assert!(leaf.ptr_eq(&value));

    assert!(registry.lookup("z.*").unwrap().is_none());
}

#[tokio::test]
async fn virtual_names_are_not_republished() {
    let (registry, _) = common::memory_registry(&[]);
    registry.provide("#host", common::data(json!(1))).unwrap();
    assert!(registry.lookup("*").unwrap().is_none());
}

#[tokio::test]
async fn computed_configuration_runs_once_per_name() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let c = package("cdn.a.c", "'C'");
    let (registry, fetcher) = common::memory_registry(&[("remote/a/c.toml", c.as_str())]);
    registry
        .configure_with("cdn.*", move |rest: &[&str]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(LocationSpec::path(format!("remote/{}.toml", rest.join("/"))))
        })
        .unwrap();

    let value = common::get_and_assert_ok(&registry, "cdn.a.c").await;
    assert_eq!(value.to_json(), json!("C"));
    common::get_and_assert_ok(&registry, "cdn.a.c").await;
    assert_eq!(
        registry.find_location("cdn.a.c").unwrap(),
        Some(LocationSpec::path("remote/a/c.toml"))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.fetch_count("remote/a/c.toml"), 1);
}

#[tokio::test]
async fn directory_configuration_maps_whole_subtrees() {
    let widget = package("lib.ui.widget", "'w'");
    let (registry, fetcher) = common::memory_registry(&[("vendor/lib/ui/widget.toml", widget.as_str())]);
    registry
        .configure("lib.*", LocationSpec::path("vendor/lib/"))
        .unwrap();

    let value = common::get_and_assert_ok(&registry, "lib.ui.widget").await;
    assert_eq!(value.to_json(), json!("w"));
    assert_eq!(fetcher.fetch_count("vendor/lib/ui/widget.toml"), 1);
}
