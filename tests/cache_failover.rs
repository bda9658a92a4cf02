//! Cache backends in the failover chain.

use std::net::SocketAddr;
use std::path::Path;

use failover_proxy::cache::fs::FilesystemDriver;
use reqwest::StatusCode;

mod common;

use common::{http_url, start_proxy};

fn cache_first(dir: &Path, server: SocketAddr) -> String {
    format!(
        r#"
        backends = ["cache", "{}"]

        [cache]
        path = "{}"
        "#,
        http_url(server),
        dir.display()
    )
}

#[tokio::test]
async fn miss_is_proxied_then_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (b0, rec0) = common::start_mock_backend("cached body").await;
    let proxy = start_proxy(&cache_first(dir.path(), b0)).await;
    assert_eq!(proxy.controller.current().unwrap().idx, 0);

    let res = common::client().get(proxy.url("/a")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-cache"], "From proxy");
    assert_eq!(res.text().await.unwrap(), "cached body");

    let entry = FilesystemDriver::entry_path(dir.path(), "/a");
    common::wait_until(|| entry.exists()).await;

    let res = common::client().get(proxy.url("/a")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-cache"], "From cache");
    assert_eq!(res.text().await.unwrap(), "cached body");

    assert_eq!(proxy.stats.cache(), 1);
    assert_eq!(rec0.count(), 1);
    // a cache miss moves only the request, never the global backend
    assert_eq!(proxy.controller.current().unwrap().idx, 0);
}

#[tokio::test]
async fn other_keys_still_go_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let (b0, rec0) = common::start_programmable_backend(|req| async move {
        ("200 OK", format!("page {}", req.target))
    })
    .await;
    let proxy = start_proxy(&cache_first(dir.path(), b0)).await;

    let res = common::client().get(proxy.url("/a?v=1")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "page /a?v=1");
    let entry = FilesystemDriver::entry_path(dir.path(), "/a?v=1");
    common::wait_until(|| entry.exists()).await;

    let res = common::client().get(proxy.url("/a?v=2")).send().await.unwrap();
    assert_eq!(res.headers()["x-cache"], "From proxy");
    assert_eq!(res.text().await.unwrap(), "page /a?v=2");
    assert_eq!(rec0.count(), 2);
    assert_eq!(proxy.stats.cache(), 0);
}

#[tokio::test]
async fn post_bypasses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (b0, rec0) = common::start_mock_backend("posted").await;
    let proxy = start_proxy(&cache_first(dir.path(), b0)).await;

    for _ in 0..2 {
        let res = common::client()
            .post(proxy.url("/a"))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(res.headers()["x-cache"], "From proxy");
        assert_eq!(res.text().await.unwrap(), "posted");
    }

    common::wait_until(|| proxy.access.events().len() == 2).await;
    assert_eq!(rec0.count(), 2);
    assert_eq!(proxy.stats.cache(), 0);
    assert!(!FilesystemDriver::entry_path(dir.path(), "/a").exists());
}

#[tokio::test]
async fn cache_only_miss_answers_503_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = format!(
        r#"
        backends = ["cache"]

        [cache]
        path = "{}"
        "#,
        dir.path().display()
    );
    let proxy = start_proxy(&config).await;

    let res = common::client().get(proxy.url("/missing")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "HTTP error 503.1.");
    assert_eq!(proxy.stats.failed(), 1);
    assert_eq!(proxy.stats.cache(), 0);
    // the cache backend itself stays up
    assert!(proxy.controller.current().is_some());
}
