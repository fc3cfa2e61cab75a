#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{Html, IntoResponse},
    routing::get,
};
use pagestash::{
    cache::{AssetKind, CacheConfig, CacheState, Minifier, MinifyError},
    infra::http::layer_router,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const SITE_BASE: &str = "http://site.test/";

/// Uppercases its input and counts invocations.
#[derive(Default)]
pub struct CountingMinifier {
    pub calls: AtomicUsize,
}

impl CountingMinifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Minifier for CountingMinifier {
    fn minify(&self, _kind: AssetKind, source: &[u8]) -> Result<Vec<u8>, MinifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(source.to_ascii_uppercase())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub app: Router,
    pub cache: CacheState,
    pub origin_calls: Arc<AtomicUsize>,
    pub minifier: Arc<CountingMinifier>,
}

impl Harness {
    pub fn new(minify_enabled: bool) -> Self {
        Self::with(|config| config.minify_enabled = minify_enabled)
    }

    pub fn with(adjust: impl FnOnce(&mut CacheConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let site_root = dir.path().join("public");
        write_file(&site_root.join("style/site.css"), "body { color: red; }");
        write_file(&site_root.join("js/app.js"), "let answer = 42;");

        let mut config = CacheConfig {
            enabled: true,
            minify_enabled: false,
            root: dir.path().join("cache"),
            site_root,
            site_base_url: SITE_BASE.to_string(),
            asset_base_url: SITE_BASE.to_string(),
            ..CacheConfig::default()
        };
        adjust(&mut config);

        let minifier = Arc::new(CountingMinifier::default());
        let controller = config.build_controller_with(minifier.clone());
        let cache = CacheState::new(config, controller);

        let origin_calls = Arc::new(AtomicUsize::new(0));
        let app = layer_router(origin(Arc::clone(&origin_calls)), cache.clone());

        Self {
            dir,
            app,
            cache,
            origin_calls,
            minifier,
        }
    }

    pub fn origin_calls(&self) -> usize {
        self.origin_calls.load(Ordering::SeqCst)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub async fn get(&self, uri: &str) -> Reply {
        self.send(Method::GET, uri, HeaderMap::new()).await
    }

    pub async fn send(&self, method: Method, uri: &str, headers: HeaderMap) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        let request = builder.body(Body::empty()).expect("request should build");
        send(&self.app, request).await
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn cache_status(&self) -> Option<&str> {
        self.headers
            .get("x-pagestash")
            .and_then(|value| value.to_str().ok())
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect");
    Reply {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).expect("utf-8 body"),
    }
}

pub fn write_file(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, contents).expect("write file");
}

fn page(title: &str, head: &str) -> String {
    format!("<!doctype html><html><head><title>{title}</title>{head}</head><body><h1>{title}</h1></body></html>")
}

/// Stand-in for the host application.
fn origin(calls: Arc<AtomicUsize>) -> Router {
    let counted_calls = Arc::clone(&calls);
    let counted = move |body: String| {
        let calls = Arc::clone(&counted_calls);
        move || {
            let calls = Arc::clone(&calls);
            let body = body.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Html(body)
            }
        }
    };

    let home = page(
        "Home",
        r#"<link rel="stylesheet" href="/style/site.css"><script src="/js/app.js"></script>"#,
    );
    let blog = page(
        "Blog",
        r#"<link rel="stylesheet" href="http://site.test/style/site.css?v=3">"#,
    );
    let broken = page(
        "Broken",
        r#"<link rel="stylesheet" href="/style/missing.css">"#,
    );
    let external = page(
        "External",
        r#"<script src="https://cdn.other.test/lib.js"></script>"#,
    );
    let large = page("Large", &"<meta name=\"filler\" content=\"x\">".repeat(64));

    Router::new()
        .route("/", get(counted(home)))
        .route("/blog", get(counted(blog)))
        .route("/broken", get(counted(broken)))
        .route("/external", get(counted(external)))
        .route("/about", get(counted(page("About", ""))))
        .route("/large", get(counted(large.clone())))
        .route("/admin/dashboard", get(counted(page("Admin", ""))))
        .route(
            "/declared",
            get({
                let large = large.clone();
                move || async move {
                    (
                        [
                            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
                            (header::CONTENT_LENGTH, large.len().to_string()),
                        ],
                        large,
                    )
                        .into_response()
                }
            }),
        )
        .route(
            "/streamed",
            get({
                let large = large.clone();
                move || async move {
                    let chunks: Vec<Result<String, std::io::Error>> = large
                        .as_bytes()
                        .chunks(32)
                        .map(|chunk| Ok(String::from_utf8_lossy(chunk).into_owned()))
                        .collect();
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        Body::from_stream(futures::stream::iter(chunks)),
                    )
                        .into_response()
                }
            }),
        )
        .route(
            "/reset",
            get(|| async {
                let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
                    Ok("<html><body>"),
                    Err(std::io::Error::other("connection reset")),
                ];
                (
                    [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                    Body::from_stream(futures::stream::iter(chunks)),
                )
                    .into_response()
            }),
        )
        .route(
            "/api/data",
            get({
                let calls = Arc::clone(&calls);
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ([(header::CONTENT_TYPE, "application/json")], "{\"ok\":true}")
                    }
                }
            }),
        )
        .route(
            "/login",
            get({
                let calls = Arc::clone(&calls);
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ([(header::SET_COOKIE, "session_id=abc")], Html("<p>login</p>"))
                    }
                }
            }),
        )
        .route(
            "/missing",
            get({
                let calls = Arc::clone(&calls);
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::NOT_FOUND, Html("<p>not found</p>"))
                    }
                }
            }),
        )
        .route(
            "/form",
            axum::routing::post({
                let calls = Arc::clone(&calls);
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Html("<p>posted</p>")
                    }
                }
            }),
        )
}
