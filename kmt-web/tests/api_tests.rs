//! Integration tests for kmt-web API endpoints
//!
//! Every test runs against a fresh SQLite file in a temp directory and drives
//! the full router (session and admin gates included) with `oneshot`.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

use kmt_common::config::ServerConfig;
use kmt_common::db::init_database;
use kmt_web::{build_router, AppState};

struct TestApp {
    app: Router,
    db: SqlitePool,
    _dir: TempDir,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

/// Test helper: fresh database and router (bcrypt cost 4 keeps hashing fast)
async fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kmt.db");
    let db = init_database(&db_path).await.expect("Should create test database");

    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        database_path: db_path,
        auth_secret: "integration-test-secret".to_string(),
        secure_cookies: false,
        session_days: 7,
        bcrypt_cost: 4,
        log_level: "debug".to_string(),
    };

    let app = build_router(AppState::new(db.clone(), &config));
    TestApp { app, db, _dir: dir }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Should read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Should parse JSON")
        };

        Reply { status, headers, body }
    }

    async fn get(&self, uri: &str, cookie: &str) -> Reply {
        self.call("GET", uri, Some(cookie), None).await
    }

    async fn post(&self, uri: &str, cookie: &str, body: Value) -> Reply {
        self.call("POST", uri, Some(cookie), Some(body)).await
    }

    /// Register a user and return its `Cookie` header value
    async fn register(&self, email: &str) -> String {
        let reply = self
            .call(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({ "email": email, "password": "correct horse" })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "register failed: {}", reply.body);
        session_cookie(&reply.headers)
    }

    async fn register_admin(&self, email: &str) -> String {
        let cookie = self.register(email).await;
        sqlx::query("UPDATE users SET role = 'ADMIN' WHERE email = ?")
            .bind(email)
            .execute(&self.db)
            .await
            .unwrap();
        cookie
    }

    async fn technique_id(&self, title: &str) -> String {
        sqlx::query_scalar("SELECT id FROM techniques WHERE title = ?")
            .bind(title)
            .fetch_one(&self.db)
            .await
            .unwrap()
    }

    async fn belt_id(&self, code: &str) -> String {
        sqlx::query_scalar("SELECT id FROM belts WHERE code = ?")
            .bind(code)
            .fetch_one(&self.db)
            .await
            .unwrap()
    }

    /// Import [`curriculum`] as a fresh admin
    async fn import_curriculum(&self) -> String {
        let admin = self.register_admin("coach@example.com").await;
        let reply = self.post("/api/admin/import", &admin, curriculum()).await;
        assert_eq!(reply.status, StatusCode::OK, "import failed: {}", reply.body);
        admin
    }
}

/// `name=value` part of the session Set-Cookie header
fn session_cookie(headers: &HeaderMap) -> String {
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("Should set a cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

/// Two active belts, one inactive module; four visible techniques
fn curriculum() -> Value {
    json!({
        "belts": [
            {
                "code": "JAUNE", "name": "Jaune", "orderIndex": 1,
                "modules": [
                    {
                        "title": "UV1", "orderIndex": 1,
                        "techniques": [
                            { "title": "Crochet", "orderIndex": 1, "keywords": "poing" },
                            { "title": "Coup de pied", "orderIndex": 2, "keywords": "crochet bas" },
                            { "title": "Crochet remontant", "orderIndex": 3 }
                        ]
                    },
                    {
                        "title": "UV2", "orderIndex": 2, "isActive": false,
                        "techniques": [{ "title": "Hidden", "orderIndex": 1 }]
                    }
                ]
            },
            {
                "code": "ORANGE", "name": "Orange", "orderIndex": 2,
                "modules": [
                    {
                        "title": "UV1 orange", "orderIndex": 1,
                        "techniques": [{ "title": "Crochet sauté", "orderIndex": 1 }]
                    }
                ]
            }
        ]
    })
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let t = setup().await;

    for uri in ["/health", "/api/health"] {
        let reply = t.call("GET", uri, None, None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "ok");
        assert_eq!(reply.body["module"], "kmt-web");
        assert!(reply.body["version"].is_string());
    }
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_register_login_me_logout() {
    let t = setup().await;

    let reply = t
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "  Demo@Example.com ", "password": "correct horse" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["ok"], true);
    assert_eq!(reply.body["user"]["email"], "demo@example.com");
    assert_eq!(reply.body["user"]["role"], "USER");
    let set_cookie = reply.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("fekm_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    let cookie = session_cookie(&reply.headers);

    let me = t.call("GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["user"]["email"], "demo@example.com");

    let anonymous = t.call("GET", "/api/auth/me", None, None).await;
    assert_eq!(anonymous.status, StatusCode::OK);
    assert!(anonymous.body["user"].is_null());

    let duplicate = t
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "demo@example.com", "password": "another password" })),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.body["error"], "Email already in use");

    let wrong = t
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "demo@example.com", "password": "wrong password" })),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["error"], "Invalid credentials");

    let unknown = t
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);

    let login = t
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "DEMO@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.body["user"]["email"], "demo@example.com");
    let last_login: Option<String> =
        sqlx::query_scalar("SELECT last_login FROM users WHERE email = 'demo@example.com'")
            .fetch_one(&t.db)
            .await
            .unwrap();
    assert!(last_login.is_some());

    let logout = t.call("POST", "/api/auth/logout", Some(&cookie), None).await;
    assert_eq!(logout.status, StatusCode::OK);
    assert_eq!(logout.body["ok"], true);
    let cleared = logout.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.starts_with("fekm_session=;"));
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_register_validation_errors() {
    let t = setup().await;

    let short = t
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "not-an-email", "password": "short" })),
        )
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);
    assert!(short.body["error"]["fieldErrors"]["email"].is_array());
    assert!(short.body["error"]["fieldErrors"]["password"].is_array());

    let garbage = t
        .call("POST", "/api/auth/register", None, Some(json!("just a string")))
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);
    assert_eq!(garbage.body["error"]["formErrors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_rate_limited_per_ip() {
    let t = setup().await;

    let attempt = |ip: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header("x-forwarded-for", format!("{}, 10.0.0.1", ip))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"x","password":"y"}"#))
            .unwrap()
    };

    for _ in 0..10 {
        let response = t.app.clone().oneshot(attempt("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    let response = t.app.clone().oneshot(attempt("203.0.113.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other clients are unaffected
    let response = t.app.clone().oneshot(attempt("198.51.100.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let t = setup().await;

    let none = t.call("GET", "/api/belts", None, None).await;
    assert_eq!(none.status, StatusCode::UNAUTHORIZED);
    assert_eq!(none.body["error"], "Unauthorized");

    let forged = t.get("/api/dashboard", "fekm_session=a.b.c").await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_forbidden_for_users() {
    let t = setup().await;
    let user = t.register("student@example.com").await;

    assert_eq!(t.get("/api/admin/belts", &user).await.status, StatusCode::FORBIDDEN);
    let import = t.post("/api/admin/import", &user, curriculum()).await;
    assert_eq!(import.status, StatusCode::FORBIDDEN);
    let coach = t
        .post("/api/videos/link-coach", &user, json!({ "techniqueId": "t", "assetId": "a" }))
        .await;
    assert_eq!(coach.status, StatusCode::FORBIDDEN);

    // Role comes from the database: promotion applies to the existing session
    sqlx::query("UPDATE users SET role = 'ADMIN' WHERE email = 'student@example.com'")
        .execute(&t.db)
        .await
        .unwrap();
    assert_eq!(t.get("/api/admin/belts", &user).await.status, StatusCode::OK);
}

// =============================================================================
// Admin
// =============================================================================

#[tokio::test]
async fn test_import_dry_run_then_commit() {
    let t = setup().await;
    let admin = t.register_admin("coach@example.com").await;

    let dry = t.post("/api/admin/import?dryRun=1", &admin, curriculum()).await;
    assert_eq!(dry.status, StatusCode::OK);
    assert_eq!(dry.body["ok"], true);
    assert_eq!(dry.body["dryRun"], true);
    assert_eq!(dry.body["result"]["beltsUpserted"], 2);
    assert_eq!(dry.body["result"]["modulesCreated"], 3);
    assert_eq!(dry.body["result"]["techniquesCreated"], 5);

    let belts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM belts")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(belts, 0, "dry run must not persist anything");

    let real = t.post("/api/admin/import", &admin, curriculum()).await;
    assert_eq!(real.status, StatusCode::OK);
    assert_eq!(real.body["dryRun"], false);

    let listed = t.get("/api/admin/belts", &admin).await;
    let codes: Vec<&str> = listed.body["belts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["JAUNE", "ORANGE"]);

    let audits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM admin_audit_log WHERE action = 'IMPORT_CURRICULUM'",
    )
    .fetch_one(&t.db)
    .await
    .unwrap();
    assert_eq!(audits, 1);

    // Re-import replaces modules rather than duplicating them
    t.post("/api/admin/import", &admin, curriculum()).await;
    let techniques: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM techniques")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(techniques, 5);
}

#[tokio::test]
async fn test_import_reports_nested_field_errors() {
    let t = setup().await;
    let admin = t.register_admin("coach@example.com").await;

    let payload = json!({
        "belts": [{
            "code": "JAUNE", "name": "Jaune", "orderIndex": 1,
            "modules": [{ "title": "UV1", "orderIndex": 1, "techniques": [{ "title": "", "orderIndex": 1 }] }]
        }]
    });
    let reply = t.post("/api/admin/import", &admin, payload).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["error"]["fieldErrors"]["belts.0.modules.0.techniques.0.title"].is_array());
}

#[tokio::test]
async fn test_admin_belts_and_contents() {
    let t = setup().await;
    let admin = t.register_admin("coach@example.com").await;

    let created = t
        .post("/api/admin/belts", &admin, json!({ "code": "VERTE", "name": "Verte", "orderIndex": 3 }))
        .await;
    assert_eq!(created.status, StatusCode::OK);
    assert_eq!(created.body["belt"]["isActive"], true);
    let belt_id = created.body["belt"]["id"].as_str().unwrap().to_string();

    let renamed = t
        .post(
            "/api/admin/belts",
            &admin,
            json!({ "code": "VERTE", "name": "Ceinture verte", "orderIndex": 3, "isActive": false }),
        )
        .await;
    assert_eq!(renamed.body["belt"]["id"], belt_id.as_str());
    assert_eq!(renamed.body["belt"]["name"], "Ceinture verte");
    assert_eq!(renamed.body["belt"]["isActive"], false);

    let missing = t.get("/api/admin/belt-contents", &admin).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["error"], "beltId required");

    let unknown = t.get("/api/admin/belt-contents?beltId=nope", &admin).await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let empty = t.get(&format!("/api/admin/belt-contents?beltId={}", belt_id), &admin).await;
    assert_eq!(empty.status, StatusCode::OK);
    assert_eq!(empty.body["belt"]["code"], "VERTE");
    assert!(empty.body["content"].is_null());

    let saved = t
        .post(
            "/api/admin/belt-contents",
            &admin,
            json!({ "beltId": belt_id, "contentRich": "## Verte", "sourceRef": "Livre p.12" }),
        )
        .await;
    assert_eq!(saved.status, StatusCode::OK);
    assert_eq!(saved.body["beltContent"]["updatedBy"], "coach@example.com");

    let fetched = t.get(&format!("/api/admin/belt-contents?beltId={}", belt_id), &admin).await;
    assert_eq!(fetched.body["content"]["contentRich"], "## Verte");
    assert_eq!(fetched.body["content"]["sourceRef"], "Livre p.12");

    let orphan = t
        .post("/api/admin/belt-contents", &admin, json!({ "beltId": "nope", "contentRich": "x" }))
        .await;
    assert_eq!(orphan.status, StatusCode::NOT_FOUND);

    let actions: Vec<String> = sqlx::query_scalar("SELECT action FROM admin_audit_log ORDER BY created_at")
        .fetch_all(&t.db)
        .await
        .unwrap();
    assert_eq!(actions, vec!["UPSERT_BELT", "UPSERT_BELT", "UPSERT_BELT_CONTENT"]);
}

// =============================================================================
// Curriculum and progress
// =============================================================================

#[tokio::test]
async fn test_curriculum_browsing_and_progress() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;
    let crochet = t.technique_id("Crochet").await;
    let jaune = t.belt_id("JAUNE").await;

    let progress = t
        .post("/api/progress", &user, json!({ "techniqueId": crochet, "mastery": "MASTERED", "notes": "garde haute" }))
        .await;
    assert_eq!(progress.status, StatusCode::OK);
    assert_eq!(progress.body["progress"]["mastery"], "MASTERED");
    assert_eq!(progress.body["progress"]["techniqueId"], crochet.as_str());

    // Notes survive an update that omits them
    t.post("/api/progress", &user, json!({ "techniqueId": crochet, "mastery": "KNOWN" }))
        .await;
    let notes: Option<String> =
        sqlx::query_scalar("SELECT notes FROM user_technique_progress WHERE technique_id = ?")
            .bind(&crochet)
            .fetch_one(&t.db)
            .await
            .unwrap();
    assert_eq!(notes.as_deref(), Some("garde haute"));

    let belts = t.get("/api/belts", &user).await;
    assert_eq!(belts.status, StatusCode::OK);
    let first = &belts.body["belts"][0];
    assert_eq!(first["code"], "JAUNE");
    assert_eq!(first["hasContent"], false);
    assert_eq!(first["progress"]["totalTechniques"], 3);
    assert_eq!(first["progress"]["knownPlusPercent"], 33);
    assert_eq!(first["progress"]["masteredPercent"], 0);

    let belt = t.get(&format!("/api/belts/{}", jaune), &user).await;
    assert_eq!(belt.status, StatusCode::OK);
    let modules = belt.body["belt"]["modules"].as_array().unwrap();
    assert_eq!(modules.len(), 1, "inactive module must be hidden");
    assert!(belt.body["belt"]["contentRich"].is_null());
    let module_id = modules[0]["id"].as_str().unwrap().to_string();

    let module = t.get(&format!("/api/modules/{}", module_id), &user).await;
    assert_eq!(module.body["module"]["belt"]["code"], "JAUNE");
    let techniques = module.body["techniques"].as_array().unwrap();
    assert_eq!(techniques.len(), 3);
    assert_eq!(techniques[0]["title"], "Crochet");
    assert_eq!(techniques[0]["mastery"], "KNOWN");
    assert_eq!(techniques[1]["mastery"], "NOT_SEEN");
    assert_eq!(techniques[1]["descriptionRich"], "");

    let technique = t.get(&format!("/api/techniques/{}", crochet), &user).await;
    assert_eq!(technique.status, StatusCode::OK);
    assert_eq!(technique.body["technique"]["belt"]["code"], "JAUNE");
    assert_eq!(technique.body["technique"]["module"]["title"], "UV1");
    assert_eq!(technique.body["technique"]["keywords"], "poing");
    assert!(technique.body["technique"]["coachVideo"].is_null());
    assert_eq!(technique.body["technique"]["myVideos"], json!([]));

    let dashboard = t.get("/api/dashboard", &user).await;
    assert_eq!(dashboard.status, StatusCode::OK);
    let kpi = &dashboard.body["kpi"];
    assert_eq!(kpi["totalTechniques"], 4);
    assert_eq!(kpi["known"], 1);
    assert_eq!(kpi["notSeen"], 3);
    assert_eq!(kpi["knownPlusPercent"], 25);
    assert_eq!(kpi["masteredPercent"], 0);
    assert_eq!(dashboard.body["lastViewed"][0]["technique"]["id"], crochet.as_str());
    assert_eq!(dashboard.body["lastViewed"][0]["belt"]["code"], "JAUNE");

    // No description or keywords imported: both render as empty strings
    let remontant = t.technique_id("Crochet remontant").await;
    let bare = t.get(&format!("/api/techniques/{}", remontant), &user).await;
    assert_eq!(bare.status, StatusCode::OK);
    assert_eq!(bare.body["technique"]["descriptionRich"], "");
    assert_eq!(bare.body["technique"]["keywords"], "");
}

#[tokio::test]
async fn test_hidden_and_unknown_curriculum_is_not_found() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;
    let hidden = t.technique_id("Hidden").await;

    assert_eq!(
        t.get(&format!("/api/techniques/{}", hidden), &user).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(t.get("/api/belts/nope", &user).await.status, StatusCode::NOT_FOUND);
    assert_eq!(t.get("/api/modules/nope", &user).await.status, StatusCode::NOT_FOUND);

    let progress = t
        .post("/api/progress", &user, json!({ "techniqueId": "nope", "mastery": "SEEN" }))
        .await;
    assert_eq!(progress.status, StatusCode::NOT_FOUND);

    let bad_level = t
        .post("/api/progress", &user, json!({ "techniqueId": hidden, "mastery": "EXPERT" }))
        .await;
    assert_eq!(bad_level.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_to_work_filters_and_ordering() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;

    let crochet = t.technique_id("Crochet").await;
    let coup = t.technique_id("Coup de pied").await;
    t.post("/api/progress", &user, json!({ "techniqueId": crochet, "mastery": "MASTERED" }))
        .await;
    t.post("/api/progress", &user, json!({ "techniqueId": coup, "mastery": "SEEN" }))
        .await;

    let all = t.get("/api/to-work?pageSize=5", &user).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.body["page"], 1);
    assert_eq!(all.body["pageSize"], 10);
    assert_eq!(all.body["total"], 3);
    let titles: Vec<&str> = all.body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["technique"]["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Crochet remontant", "Crochet sauté", "Coup de pied"]);
    assert_eq!(all.body["items"][2]["mastery"], "SEEN");
    assert_eq!(all.body["items"][1]["belt"]["code"], "ORANGE");

    let not_seen = t.get("/api/to-work?mastery=NOT_SEEN", &user).await;
    assert_eq!(not_seen.body["total"], 2);

    let seen = t.get("/api/to-work?mastery=SEEN", &user).await;
    assert_eq!(seen.body["total"], 1);

    let jaune = t.belt_id("JAUNE").await;
    let in_belt = t.get(&format!("/api/to-work?beltId={}", jaune), &user).await;
    assert_eq!(in_belt.body["total"], 2);

    let mastered = t.get("/api/to-work?mastery=MASTERED&page=2", &user).await;
    assert_eq!(mastered.status, StatusCode::OK);
    assert_eq!(mastered.body["total"], 0);
    assert_eq!(mastered.body["page"], 2);
    assert_eq!(mastered.body["items"], json!([]));

    let invalid = t.get("/api/to-work?mastery=EXPERT", &user).await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.body["error"], "Invalid mastery");

    let past_end = t.get("/api/to-work?page=3", &user).await;
    assert_eq!(past_end.body["total"], 3);
    assert_eq!(past_end.body["items"], json!([]));

    let huge_page = t.get("/api/to-work?page=9223372036854775807&pageSize=50", &user).await;
    assert_eq!(huge_page.status, StatusCode::OK);
    assert_eq!(huge_page.body["total"], 3);
    assert_eq!(huge_page.body["items"], json!([]));

    for size in ["0", "-5"] {
        let clamped = t.get(&format!("/api/to-work?pageSize={}", size), &user).await;
        assert_eq!(clamped.status, StatusCode::OK);
        assert_eq!(clamped.body["pageSize"], 10);
    }
}

#[tokio::test]
async fn test_search_ranking_and_filters() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;

    let empty = t.get("/api/search?q=%20%20", &user).await;
    assert_eq!(empty.status, StatusCode::OK);
    assert_eq!(empty.body["results"], json!([]));

    let ranked = t.get("/api/search?q=crochet", &user).await;
    let titles: Vec<&str> = ranked.body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap())
        .collect();
    assert_eq!(
        titles,
        vec!["Crochet", "Crochet remontant", "Crochet sauté", "Coup de pied"]
    );
    assert_eq!(ranked.body["results"][0]["mastery"], "NOT_SEEN");
    assert_eq!(ranked.body["results"][0]["module"]["title"], "UV1");

    // Wildcards are matched literally
    let literal = t.get("/api/search?q=%25", &user).await;
    assert_eq!(literal.body["results"], json!([]));

    let jaune = t.belt_id("JAUNE").await;
    let by_belt = t.get(&format!("/api/search?beltId={}", jaune), &user).await;
    assert_eq!(by_belt.body["results"].as_array().unwrap().len(), 3);
    assert_eq!(by_belt.body["results"][0]["title"], "Crochet");

    let crochet = t.technique_id("Crochet").await;
    t.post("/api/progress", &user, json!({ "techniqueId": crochet, "mastery": "KNOWN" }))
        .await;
    let known = t.get("/api/search?q=crochet&mastery=KNOWN", &user).await;
    assert_eq!(known.body["results"].as_array().unwrap().len(), 1);
    let not_seen = t.get("/api/search?q=crochet&mastery=NOT_SEEN", &user).await;
    assert_eq!(not_seen.body["results"].as_array().unwrap().len(), 3);

    let invalid = t.get("/api/search?q=crochet&mastery=bad", &user).await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Account
// =============================================================================

#[tokio::test]
async fn test_preferences_roundtrip() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;

    let initial = t.get("/api/preferences", &user).await;
    assert_eq!(initial.status, StatusCode::OK);
    assert!(initial.body["preferences"].is_null());

    let unknown = t.post("/api/preferences", &user, json!({ "defaultBeltId": "nope" })).await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    assert!(unknown.body["error"]["fieldErrors"]["defaultBeltId"].is_array());

    let missing = t.post("/api/preferences", &user, json!({})).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let orange = t.belt_id("ORANGE").await;
    let saved = t.post("/api/preferences", &user, json!({ "defaultBeltId": orange })).await;
    assert_eq!(saved.status, StatusCode::OK);
    assert_eq!(saved.body["ok"], true);
    assert_eq!(saved.body["preferences"]["defaultBeltId"], orange.as_str());

    let cleared = t.post("/api/preferences", &user, json!({ "defaultBeltId": null })).await;
    assert!(cleared.body["preferences"]["defaultBeltId"].is_null());
}

#[tokio::test]
async fn test_export_and_delete_account() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;
    let crochet = t.technique_id("Crochet").await;

    t.post("/api/progress", &user, json!({ "techniqueId": crochet, "mastery": "SEEN", "notes": "n" }))
        .await;
    let presign = t
        .post(
            "/api/videos/presign",
            &user,
            json!({ "purpose": "USER_BEGINNER", "techniqueId": crochet, "contentType": "video/mp4", "size": 1024 }),
        )
        .await;
    let asset_id = presign.body["assetId"].as_str().unwrap().to_string();
    t.post(
        "/api/videos/link-user",
        &user,
        json!({ "techniqueId": crochet, "slot": "BEGINNER", "assetId": asset_id }),
    )
    .await;
    t.get(&format!("/api/techniques/{}", crochet), &user).await;

    let export = t.get("/api/me/export", &user).await;
    assert_eq!(export.status, StatusCode::OK);
    assert_eq!(export.body["user"]["email"], "student@example.com");
    assert!(export.body["user"].get("passwordHash").is_none());
    assert_eq!(export.body["progresses"][0]["notes"], "n");
    assert_eq!(export.body["progresses"][0]["technique"]["title"], "Crochet");
    assert_eq!(export.body["videos"][0]["slot"], "BEGINNER");
    assert_eq!(export.body["videos"][0]["video"]["id"], asset_id.as_str());

    let deleted = t.call("DELETE", "/api/me", Some(&user), None).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.body["ok"], true);
    assert!(deleted
        .headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));

    // Old session is dead, credentials no longer work
    assert_eq!(t.get("/api/dashboard", &user).await.status, StatusCode::UNAUTHORIZED);
    let login = t
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "student@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);

    let (email, role): (String, String) =
        sqlx::query_as("SELECT email, role FROM users WHERE deleted_at IS NOT NULL AND role = 'USER'")
            .fetch_one(&t.db)
            .await
            .unwrap();
    assert!(email.starts_with("deleted_"));
    assert!(email.ends_with("@example.invalid"));
    assert_eq!(role, "USER");

    for table in ["user_technique_progress", "user_technique_views", "user_preferences"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&t.db)
            .await
            .unwrap();
        assert_eq!(count, 0, "{} should be empty", table);
    }
    let live_videos: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM user_technique_videos WHERE deleted_at IS NULL")
            .fetch_one(&t.db)
            .await
            .unwrap();
    assert_eq!(live_videos, 0);

    // The address is free again
    t.register("student@example.com").await;
}

// =============================================================================
// Videos
// =============================================================================

#[tokio::test]
async fn test_user_video_workflow() {
    let t = setup().await;
    t.import_curriculum().await;
    let user = t.register("student@example.com").await;
    let other = t.register("other@example.com").await;
    let crochet = t.technique_id("Crochet").await;

    let coach_attempt = t
        .post(
            "/api/videos/presign",
            &user,
            json!({ "purpose": "COACH", "techniqueId": crochet, "contentType": "video/mp4", "size": 10 }),
        )
        .await;
    assert_eq!(coach_attempt.status, StatusCode::FORBIDDEN);

    let unknown = t
        .post(
            "/api/videos/presign",
            &user,
            json!({ "purpose": "USER_PROGRESS", "techniqueId": "nope", "contentType": "video/mp4", "size": 10 }),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let presign = t
        .post(
            "/api/videos/presign",
            &user,
            json!({ "purpose": "USER_PROGRESS", "techniqueId": crochet, "contentType": "video/mp4", "size": 2048 }),
        )
        .await;
    assert_eq!(presign.status, StatusCode::OK);
    assert!(presign.body["uploadUrl"].is_null());
    let asset_id = presign.body["assetId"].as_str().unwrap().to_string();
    assert!(presign.body["storageKey"].as_str().unwrap().ends_with(&asset_id));

    let stolen = t
        .post("/api/videos/complete", &other, json!({ "assetId": asset_id }))
        .await;
    assert_eq!(stolen.status, StatusCode::FORBIDDEN);

    let missing = t
        .post("/api/videos/complete", &user, json!({ "assetId": "nope" }))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let done = t
        .post("/api/videos/complete", &user, json!({ "assetId": asset_id }))
        .await;
    assert_eq!(done.status, StatusCode::OK);
    assert_eq!(done.body["asset"]["status"], "READY");

    let foreign_link = t
        .post(
            "/api/videos/link-user",
            &other,
            json!({ "techniqueId": crochet, "slot": "PROGRESS", "assetId": asset_id }),
        )
        .await;
    assert_eq!(foreign_link.status, StatusCode::FORBIDDEN);

    let link = t
        .post(
            "/api/videos/link-user",
            &user,
            json!({ "techniqueId": crochet, "slot": "PROGRESS", "assetId": asset_id }),
        )
        .await;
    assert_eq!(link.status, StatusCode::OK);
    let link_id = link.body["userVideo"]["id"].as_str().unwrap().to_string();

    // Relinking the same slot reuses the live row
    let relink = t
        .post(
            "/api/videos/link-user",
            &user,
            json!({ "techniqueId": crochet, "slot": "PROGRESS", "assetId": asset_id }),
        )
        .await;
    assert_eq!(relink.body["userVideo"]["id"], link_id.as_str());

    let technique = t.get(&format!("/api/techniques/{}", crochet), &user).await;
    let videos = technique.body["technique"]["myVideos"].as_array().unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0]["slot"], "PROGRESS");
    assert_eq!(videos[0]["assetId"], asset_id.as_str());
    assert_eq!(videos[0]["status"], "READY");
    assert!(videos[0]["playbackUrl"].is_null());

    let unlink = t
        .call(
            "DELETE",
            "/api/videos/link-user",
            Some(&user),
            Some(json!({ "techniqueId": crochet, "slot": "PROGRESS" })),
        )
        .await;
    assert_eq!(unlink.status, StatusCode::OK);

    let technique = t.get(&format!("/api/techniques/{}", crochet), &user).await;
    assert_eq!(technique.body["technique"]["myVideos"], json!([]));

    // A new link after unlinking creates a fresh row
    let again = t
        .post(
            "/api/videos/link-user",
            &user,
            json!({ "techniqueId": crochet, "slot": "PROGRESS", "assetId": asset_id }),
        )
        .await;
    assert_ne!(again.body["userVideo"]["id"], link_id.as_str());
}

#[tokio::test]
async fn test_coach_video_link_and_disable() {
    let t = setup().await;
    let admin = t.import_curriculum().await;
    let user = t.register("student@example.com").await;
    let crochet = t.technique_id("Crochet").await;

    let presign = t
        .post(
            "/api/videos/presign",
            &admin,
            json!({ "purpose": "COACH", "techniqueId": crochet, "contentType": "video/mp4", "size": 4096 }),
        )
        .await;
    assert_eq!(presign.status, StatusCode::OK);
    let asset_id = presign.body["assetId"].as_str().unwrap().to_string();

    let unknown = t
        .post("/api/videos/link-coach", &admin, json!({ "techniqueId": crochet, "assetId": "nope" }))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let link = t
        .post("/api/videos/link-coach", &admin, json!({ "techniqueId": crochet, "assetId": asset_id }))
        .await;
    assert_eq!(link.status, StatusCode::OK);
    assert_eq!(link.body["link"]["isActive"], true);

    let technique = t.get(&format!("/api/techniques/{}", crochet), &user).await;
    assert_eq!(technique.body["technique"]["coachVideo"]["assetId"], asset_id.as_str());
    assert_eq!(technique.body["technique"]["coachVideo"]["status"], "PROCESSING");

    let disable = t
        .call(
            "DELETE",
            "/api/videos/link-coach",
            Some(&admin),
            Some(json!({ "techniqueId": crochet })),
        )
        .await;
    assert_eq!(disable.status, StatusCode::OK);

    let technique = t.get(&format!("/api/techniques/{}", crochet), &user).await;
    assert!(technique.body["technique"]["coachVideo"].is_null());

    let actions: Vec<String> = sqlx::query_scalar(
        "SELECT action FROM admin_audit_log WHERE action LIKE '%COACH_VIDEO' ORDER BY created_at",
    )
    .fetch_all(&t.db)
    .await
    .unwrap();
    assert_eq!(actions, vec!["UPSERT_COACH_VIDEO", "DISABLE_COACH_VIDEO"]);
}
