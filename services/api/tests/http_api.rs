//! End-to-end tests of the HTTP surface over in-memory metadata, a temporary
//! blob directory and a stand-in rasterizer.

use api_lib::{
    adapters::{FilesystemBlobStore, HttpDocumentFetcher},
    config::Config,
    web::{
        build_router,
        state::{AppState, Backends},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use course_catalog_core::{
    fit_height,
    memory::{MemoryLocalStorage, MemoryMetadataStore},
    ports::{PageRasterizer, PortError, PortResult},
    Catalog, CredentialStore, Group, RasterImage,
};
use reqwest::{multipart, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\n%%EOF";

/// Renders every document as a blank US Letter page; rejects non-PDF bytes.
struct BlankPageRasterizer;

#[async_trait]
impl PageRasterizer for BlankPageRasterizer {
    async fn rasterize_first_page(&self, document: Bytes, target_width: u32) -> PortResult<RasterImage> {
        if !document.starts_with(b"%PDF") {
            return Err(PortError::Rejected("not a PDF".to_string()));
        }
        let height = fit_height(612.0, 792.0, target_width);
        Ok(RasterImage {
            width: target_width,
            height,
            rgba: vec![255; (target_width * height * 4) as usize],
        })
    }
}

struct TestApp {
    base: String,
    client: reqwest::Client,
    metadata: Arc<MemoryMetadataStore>,
    _blob_dir: TempDir,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn login(&self, group: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&json!({ "group": group, "password": password }))
            .send()
            .await
            .unwrap()
    }

    async fn upload(&self, chapter: &str, subject: &str, name: &str, mime: &str, bytes: &[u8]) -> reqwest::Response {
        let form = multipart::Form::new()
            .text("chapter_id", chapter.to_string())
            .text("subject_id", subject.to_string())
            .part(
                "file",
                multipart::Part::bytes(bytes.to_vec())
                    .file_name(name.to_string())
                    .mime_str(mime)
                    .unwrap(),
            );
        self.client
            .post(self.url("/admin/lessons"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn lessons(&self, chapter: &str, subject: &str, group: &str) -> Vec<Value> {
        let response = self
            .client
            .get(self.url("/lessons"))
            .query(&[("chapter_id", chapter), ("subject_id", subject), ("group", group)])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }

    async fn navigate(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/view"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

async fn spawn_app(extra_vars: &[(&str, &str)]) -> TestApp {
    let blob_dir = tempfile::tempdir().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut vars: HashMap<String, String> = HashMap::from([
        ("STORE_BACKEND".to_string(), "memory".to_string()),
        ("BIND_ADDRESS".to_string(), addr.to_string()),
        (
            "BLOB_ROOT".to_string(),
            blob_dir.path().to_string_lossy().into_owned(),
        ),
    ]);
    for (key, value) in extra_vars {
        vars.insert(key.to_string(), value.to_string());
    }
    let config = Arc::new(Config::from_lookup(|key| vars.get(key).cloned()).unwrap());

    let metadata = Arc::new(MemoryMetadataStore::new());
    let blobs = Arc::new(
        FilesystemBlobStore::new(config.blob_root.clone(), &config.public_base_url)
            .await
            .unwrap(),
    );
    let credentials = CredentialStore::from_passwords([
        (Group::G1, "adminG1pass"),
        (Group::G2, "adminG2pass"),
        (Group::G3, "adminG3pass"),
    ])
    .unwrap();

    let state = AppState::build(
        config.clone(),
        Arc::new(Catalog::standard()),
        credentials,
        Backends {
            metadata: metadata.clone(),
            blobs,
            local_storage: Arc::new(MemoryLocalStorage::new()),
            fetcher: Arc::new(
                HttpDocumentFetcher::new(&config.public_base_url, config.max_upload_bytes).unwrap(),
            ),
            rasterizer: Some(Arc::new(BlankPageRasterizer)),
        },
    )
    .await;

    let app = build_router(Arc::new(state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base: format!("http://{}", addr),
        client: reqwest::Client::builder().cookie_store(true).build().unwrap(),
        metadata,
        _blob_dir: blob_dir,
    }
}

#[tokio::test]
async fn catalog_lists_chapters_subjects_and_groups() {
    let app = spawn_app(&[]).await;
    let body: Value = app
        .client
        .get(app.url("/catalog"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let chapters = body["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0]["id"], "chapter5");
    assert_eq!(chapters[0]["subjects"].as_array().unwrap().len(), 10);
    assert_eq!(body["groups"], json!(["G1", "G2", "G3"]));
}

#[tokio::test]
async fn uploaded_lesson_is_listed_for_its_group_only() {
    let app = spawn_app(&[]).await;
    assert_eq!(app.login("G1", "adminG1pass").await.status(), StatusCode::OK);

    let response = app
        .upload("chapter5", "civ", "cours1.pdf", "application/pdf", PDF_BYTES)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["name"], "cours1.pdf");
    assert_eq!(created["group"], "G1");

    let g1 = app.lessons("chapter5", "civ", "G1").await;
    assert_eq!(g1.len(), 1);
    assert_eq!(g1[0]["name"], "cours1.pdf");
    assert_eq!(g1[0]["id"], created["id"]);
    assert!(app.lessons("chapter5", "civ", "G2").await.is_empty());
    assert!(app.lessons("chapter6", "civ", "G1").await.is_empty());

    // The resolved URL serves the exact bytes that were uploaded.
    let file_url = g1[0]["file_url"].as_str().unwrap();
    let fetched = app.client.get(file_url).send().await.unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(fetched.headers()["content-type"], "application/pdf");
    // Downloads are offered under the name the administrator picked.
    assert_eq!(
        fetched.headers()["content-disposition"],
        "attachment; filename*=UTF-8''cours1.pdf"
    );
    assert_eq!(fetched.bytes().await.unwrap().as_ref(), PDF_BYTES);
}

#[tokio::test]
async fn lessons_are_newest_first() {
    let app = spawn_app(&[]).await;
    app.login("G2", "adminG2pass").await;
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        let response = app
            .upload("chapter6", "traduction", name, "application/pdf", PDF_BYTES)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let names: Vec<String> = app
        .lessons("chapter6", "traduction", "G2")
        .await
        .iter()
        .map(|l| l["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c.pdf", "b.pdf", "a.pdf"]);
}

#[tokio::test]
async fn admin_routes_require_a_session() {
    let app = spawn_app(&[]).await;

    let response = app.client.get(app.url("/admin/lessons")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_authenticated");

    let response = app
        .upload("chapter5", "civ", "cours1.pdf", "application/pdf", PDF_BYTES)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.metadata.lesson_count().await, 0);
}

#[tokio::test]
async fn login_logout_and_session_lookup() {
    let app = spawn_app(&[]).await;

    let response = app.login("G1", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "auth");
    assert_eq!(body["message"], "كلمة المرور غير صحيحة.");

    let session: Value = app
        .client
        .get(app.url("/auth/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["group"], Value::Null);

    assert_eq!(app.login("G3", "adminG3pass").await.status(), StatusCode::OK);
    let session: Value = app
        .client
        .get(app.url("/auth/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["group"], "G3");

    let response = app.client.post(app.url("/auth/logout")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.client.get(app.url("/admin/lessons")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.login("G4", "adminG1pass").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_policy_rejects_non_pdfs_and_large_files() {
    let app = spawn_app(&[("MAX_UPLOAD_BYTES", "1024")]).await;
    app.login("G1", "adminG1pass").await;

    let response = app
        .upload("chapter5", "civ", "photo.png", "image/png", b"\x89PNG\r\n")
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_pdf");
    assert_eq!(body["message"], "يرجى اختيار ملف PDF فقط.");

    let mut big = PDF_BYTES.to_vec();
    big.resize(2048, b' ');
    let response = app
        .upload("chapter5", "civ", "big.pdf", "application/pdf", &big)
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "too_large");

    let response = app
        .upload("chapter5", "physique", "cours.pdf", "application/pdf", PDF_BYTES)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unknown_scope");

    assert_eq!(app.metadata.lesson_count().await, 0);
}

#[tokio::test]
async fn delete_removes_record_and_file() {
    let app = spawn_app(&[]).await;
    app.login("G1", "adminG1pass").await;
    let created: Value = app
        .upload("chapter5", "civ", "cours1.pdf", "application/pdf", PDF_BYTES)
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();
    let file_url = created["file_url"].as_str().unwrap();

    // Another group's administrator cannot see or delete it.
    app.login("G2", "adminG2pass").await;
    let response = app
        .client
        .delete(app.url(&format!("/admin/lessons/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.login("G1", "adminG1pass").await;
    let response = app
        .client
        .delete(app.url(&format!("/admin/lessons/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["blob_removed"], true);

    assert!(app.lessons("chapter5", "civ", "G1").await.is_empty());
    let fetched = app.client.get(file_url).send().await.unwrap();
    assert_eq!(fetched.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_metadata_write_leaves_a_reclaimable_orphan() {
    let app = spawn_app(&[]).await;
    app.login("G1", "adminG1pass").await;
    app.metadata.fail_inserts(true);

    let response = app
        .upload("chapter5", "civ", "cours1.pdf", "application/pdf", PDF_BYTES)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "metadata");
    assert_eq!(body["message"], "حدث خطأ أثناء الرفع.");

    let orphans: Vec<Value> = app
        .client
        .get(app.url("/admin/orphans"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0]["reason"], "uploaded_without_metadata");

    let reclaimed: Value = app
        .client
        .post(app.url("/admin/orphans/reclaim"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reclaimed, json!({ "reclaimed": 1, "remaining": 0 }));
}

#[tokio::test]
async fn dashboard_groups_lessons_by_subject() {
    let app = spawn_app(&[]).await;
    app.login("G3", "adminG3pass").await;
    app.upload("chapter5", "civ", "a.pdf", "application/pdf", PDF_BYTES).await;
    app.upload("chapter6", "atelier", "b.pdf", "application/pdf", PDF_BYTES).await;

    let body: Value = app
        .client
        .get(app.url("/admin/lessons"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["group"], "G3");
    let chapters = body["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0]["subjects"].as_array().unwrap().len(), 1);
    assert_eq!(chapters[0]["subjects"][0]["subject_id"], "civ");
    assert_eq!(chapters[1]["subjects"][0]["subject_id"], "atelier");
    assert_eq!(chapters[1]["subjects"][0]["lessons"][0]["name"], "b.pdf");
}

#[tokio::test]
async fn thumbnails_render_png_and_report_failures() {
    let app = spawn_app(&[]).await;
    app.login("G1", "adminG1pass").await;
    let created: Value = app
        .upload("chapter5", "civ", "cours1.pdf", "application/pdf", PDF_BYTES)
        .await
        .json()
        .await
        .unwrap();
    let file_url = created["file_url"].as_str().unwrap();

    let response = app
        .client
        .get(app.url("/thumbnails"))
        .query(&[("url", file_url), ("width", "153")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let png = response.bytes().await.unwrap();
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

    let response = app
        .client
        .get(app.url("/thumbnails"))
        .query(&[("url", file_url), ("width", "0")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "render");

    let missing = app.url("/files/lessons/none.pdf");
    let response = app
        .client
        .get(app.url("/thumbnails"))
        .query(&[("url", missing.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "fetch");
    assert_eq!(body["message"], "فشل عرض الملف");
}

#[tokio::test]
async fn view_router_walks_from_home_to_lessons_and_back() {
    let app = spawn_app(&[]).await;

    let body: Value = app
        .client
        .get(app.url("/view"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["view"]["name"], "home");
    assert_eq!(body["selected_group"], "G1");
    assert_eq!(body["screen"]["screen"], "chapter_selection");

    let body: Value = app
        .navigate(json!({ "action": "select_chapter", "chapter_id": "chapter5" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["screen"]["screen"], "subject_selection");

    app.navigate(json!({ "action": "select_group", "group": "G2" })).await;
    let body: Value = app
        .navigate(json!({ "action": "select_subject", "subject_id": "civ" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["view"]["name"], "subject");
    assert_eq!(body["view"]["group"], "G2");
    assert_eq!(body["screen"]["screen"], "lesson_list");
    assert_eq!(body["screen"]["lessons"], json!([]));

    let response = app
        .navigate(json!({ "action": "select_subject", "subject_id": "physique" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = app.navigate(json!({ "action": "back" })).await.json().await.unwrap();
    assert_eq!(body["view"], json!({ "name": "chapter", "chapter_id": "chapter5" }));
    let body: Value = app.navigate(json!({ "action": "back" })).await.json().await.unwrap();
    assert_eq!(body["view"]["name"], "home");
}

#[tokio::test]
async fn dashboard_view_needs_a_session() {
    let app = spawn_app(&[]).await;

    let body: Value = app
        .navigate(json!({ "action": "login_succeeded" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["view"]["name"], "admin_dashboard");
    assert_eq!(body["screen"]["screen"], "admin_login");

    app.navigate(json!({ "action": "open_admin_login" })).await;
    app.login("G2", "adminG2pass").await;
    let body: Value = app
        .client
        .get(app.url("/view"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["view"]["name"], "admin_dashboard");
    assert_eq!(body["screen"]["screen"], "admin_dashboard");
    assert_eq!(body["screen"]["group"], "G2");

    let body: Value = app.navigate(json!({ "action": "logout" })).await.json().await.unwrap();
    assert_eq!(body["view"]["name"], "home");
    let session: Value = app
        .client
        .get(app.url("/auth/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["group"], Value::Null);
}

#[tokio::test]
async fn sessions_belong_to_the_client_that_logged_in() {
    let app = spawn_app(&[]).await;
    assert_eq!(app.login("G1", "adminG1pass").await.status(), StatusCode::OK);
    let created: Value = app
        .upload("chapter5", "civ", "cours1.pdf", "application/pdf", PDF_BYTES)
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let stranger = reqwest::Client::new();
    let session: Value = stranger
        .get(app.url("/auth/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["group"], Value::Null);
    let response = stranger
        .delete(app.url(&format!("/admin/lessons/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = stranger
        .get(app.url("/admin/lessons"))
        .header("cookie", "session=forged")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The stranger logging out leaves the first client signed in.
    let response = stranger.post(app.url("/auth/logout")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.client.get(app.url("/admin/lessons")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.lessons("chapter5", "civ", "G1").await.len(), 1);
}

#[tokio::test]
async fn login_sets_an_http_only_session_cookie() {
    let app = spawn_app(&[]).await;
    let response = app.login("G2", "adminG2pass").await;
    let cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));

    let response = app.client.post(app.url("/auth/logout")).send().await.unwrap();
    let cleared = response.headers()["set-cookie"].to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn thumbnails_only_fetch_served_lesson_files() {
    let app = spawn_app(&[("MAX_UPLOAD_BYTES", "1024")]).await;
    let internal = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let internal_url = format!(
        "http://{}/files/lessons/secret.pdf",
        internal.local_addr().unwrap()
    );

    let admin_url = app.url("/admin/lessons");
    for url in [
        internal_url.as_str(),
        "http://169.254.169.254/latest/meta-data",
        admin_url.as_str(),
    ] {
        let response = app
            .client
            .get(app.url("/thumbnails"))
            .query(&[("url", url)])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "{}", url);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "fetch");
    }
    let contacted =
        tokio::time::timeout(std::time::Duration::from_millis(200), internal.accept()).await;
    assert!(contacted.is_err(), "the internal host was contacted");

    // Served files above the upload limit are not downloaded.
    let lessons_dir = app._blob_dir.path().join("lessons");
    std::fs::create_dir_all(&lessons_dir).unwrap();
    let mut big = PDF_BYTES.to_vec();
    big.resize(4096, b' ');
    std::fs::write(lessons_dir.join("big.pdf"), &big).unwrap();
    let response = app
        .client
        .get(app.url("/thumbnails"))
        .query(&[("url", app.url("/files/lessons/big.pdf").as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "fetch");
}
