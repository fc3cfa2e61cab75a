mod common;

use std::fs;

use axum::http::{HeaderMap, Method, StatusCode, header};
use common::{Harness, SITE_BASE};
use pagestash::cache::{AssetKind, hash_str};

fn minified_url(path: &str, kind: AssetKind) -> String {
    let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    format!("{SITE_BASE}{dir}/{}.{}", hash_str(path), kind.extension())
}

#[tokio::test]
async fn references_point_at_minified_copies() {
    let harness = Harness::new(true);

    let reply = harness.get("/").await;

    let css = minified_url("style/site.css", AssetKind::Css);
    let js = minified_url("js/app.js", AssetKind::Js);
    assert!(reply.body.contains(&format!(r#"href="{css}""#)), "{}", reply.body);
    assert!(reply.body.contains(&format!(r#"src="{js}""#)), "{}", reply.body);
    assert!(!reply.body.contains(r#"href="/style/site.css""#));
    assert_eq!(harness.minifier.calls(), 2);
}

#[tokio::test]
async fn minified_files_are_served_from_the_cache_root() {
    let harness = Harness::new(true);
    harness.get("/").await;

    let path = format!(
        "/style/{}.css",
        hash_str("style/site.css")
    );
    let reply = harness.get(&path).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "BODY { COLOR: RED; }");
    assert_eq!(reply.headers.get(header::CONTENT_TYPE).unwrap(), "text/css");
    assert_eq!(reply.headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert!(reply.headers.contains_key(header::ETAG));
}

#[tokio::test]
async fn cleared_assets_are_revalidated_by_clients() {
    let harness = Harness::new(true);
    harness.get("/").await;
    let path = format!("/style/{}.css", hash_str("style/site.css"));
    let first = harness.get(&path).await;
    let etag = first.headers.get(header::ETAG).expect("etag").clone();

    let mut conditional = HeaderMap::new();
    conditional.insert(header::IF_NONE_MATCH, etag.clone());
    let unchanged = harness.send(Method::GET, &path, conditional.clone()).await;
    assert_eq!(unchanged.status, StatusCode::NOT_MODIFIED);

    fs::write(
        harness.dir.path().join("public/style/site.css"),
        "body { color: blue; }",
    )
    .expect("edit source");
    harness
        .cache
        .controller
        .clear_all_caches()
        .expect("clear succeeds");
    harness.get("/").await;

    let refreshed = harness.send(Method::GET, &path, conditional).await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert_eq!(refreshed.body, "BODY { COLOR: BLUE; }");
    assert_ne!(refreshed.headers.get(header::ETAG).unwrap(), &etag);
}

#[tokio::test]
async fn one_asset_is_minified_once_across_pages() {
    let harness = Harness::new(true);

    harness.get("/").await;
    let blog = harness.get("/blog").await;

    let css = minified_url("style/site.css", AssetKind::Css);
    assert!(blog.body.contains(&css), "{}", blog.body);
    assert!(!blog.body.contains("?v=3"));
    assert_eq!(harness.minifier.calls(), 2);

    let manifest = harness.cache.controller.assets().manifest(AssetKind::Css);
    assert_eq!(manifest.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_sources_keep_the_original_reference() {
    let harness = Harness::new(true);

    let reply = harness.get("/broken").await;
    assert!(reply.body.contains(r#"href="/style/missing.css""#));

    let again = harness.get("/broken").await;
    assert_eq!(again.cache_status(), Some("hit"));
    assert_eq!(again.body, reply.body);
    assert_eq!(harness.minifier.calls(), 0);
}

#[tokio::test]
async fn external_references_are_left_alone() {
    let harness = Harness::new(true);

    let reply = harness.get("/external").await;

    assert!(reply.body.contains(r#"src="https://cdn.other.test/lib.js""#));
    assert_eq!(harness.minifier.calls(), 0);
}

#[tokio::test]
async fn rewriting_is_skipped_when_minify_is_disabled() {
    let harness = Harness::new(false);

    let reply = harness.get("/").await;

    assert!(reply.body.contains(r#"href="/style/site.css""#));
    assert_eq!(harness.minifier.calls(), 0);
}

#[tokio::test]
async fn clear_all_removes_minified_files_and_manifests() {
    let harness = Harness::new(true);
    harness.get("/").await;
    let stored = harness
        .cache_root()
        .join("style")
        .join(format!("{}.css", hash_str("style/site.css")));
    assert!(stored.is_file());

    harness
        .cache
        .controller
        .clear_all_caches()
        .expect("clear succeeds");

    assert!(!stored.exists());
    assert!(!harness.cache_root().join("css.log").exists());
    assert!(!harness.cache_root().join("js.log").exists());
    assert!(harness.cache.controller.pages().is_empty());

    // Sources are untouched and the next render minifies again.
    assert!(fs::read_to_string(harness.dir.path().join("public/style/site.css")).is_ok());
    harness.get("/").await;
    assert_eq!(harness.minifier.calls(), 4);
}

#[tokio::test]
async fn content_updates_keep_minified_assets() {
    let harness = Harness::new(true);
    harness.get("/").await;

    harness
        .cache
        .controller
        .clear_content_caches()
        .expect("clear succeeds");
    harness.get("/").await;

    assert_eq!(harness.origin_calls(), 2);
    assert_eq!(harness.minifier.calls(), 2);
}
