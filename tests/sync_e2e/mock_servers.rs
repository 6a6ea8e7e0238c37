//! Mock buildbot and dashboard servers for E2E tests.
//!
//! Each server listens on an ephemeral port and keeps its state behind a
//! mutex so tests can seed responses and inspect what the syncer sent.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, get, post, web};
use serde::Deserialize;
use serde_json::{Value, json};

/// State of the mock buildbot master.
#[derive(Default)]
pub struct BuildbotState {
    /// (builderid, name) pairs served by `/api/v2/builders`
    pub builders: Vec<(u64, String)>,
    /// Pending builds per builder name
    pub pending: HashMap<String, Vec<Value>>,
    /// Recent builds per builder name, keyed "-1", "-2", ...
    pub recent: HashMap<String, Value>,
    /// Force-build forms received, with the builder they targeted
    pub forced: Vec<(String, Vec<(String, String)>)>,
}

#[get("/api/v2/builders")]
async fn get_builders(state: web::Data<Arc<Mutex<BuildbotState>>>) -> HttpResponse {
    let state = state.lock().unwrap();
    let builders: Vec<Value> = state
        .builders
        .iter()
        .map(|(id, name)| json!({"builderid": id, "name": name}))
        .collect();
    HttpResponse::Ok().json(json!({ "builders": builders }))
}

#[get("/json/builders/{builder}/pendingBuilds")]
async fn pending_builds(
    state: web::Data<Arc<Mutex<BuildbotState>>>,
    path: web::Path<String>,
) -> HttpResponse {
    let state = state.lock().unwrap();
    let pending = state.pending.get(path.as_str()).cloned().unwrap_or_default();
    HttpResponse::Ok().json(pending)
}

#[get("/json/builders/{builder}/builds/")]
async fn recent_builds(
    state: web::Data<Arc<Mutex<BuildbotState>>>,
    path: web::Path<String>,
) -> HttpResponse {
    let state = state.lock().unwrap();
    let recent = state
        .recent
        .get(path.as_str())
        .cloned()
        .unwrap_or_else(|| json!({}));
    HttpResponse::Ok().json(recent)
}

#[post("/builders/{builder}/force")]
async fn force_build(
    state: web::Data<Arc<Mutex<BuildbotState>>>,
    path: web::Path<String>,
    form: web::Form<Vec<(String, String)>>,
) -> HttpResponse {
    let builder = path.into_inner();
    let fields = form.into_inner();
    let properties: Vec<Value> = fields
        .iter()
        .map(|(name, value)| json!([name, value, "Force Build Form"]))
        .collect();

    let mut state = state.lock().unwrap();
    state
        .pending
        .entry(builder.clone())
        .or_default()
        .push(json!({
            "builderName": builder,
            "builds": [],
            "properties": properties,
            "source": {"changes": []},
            "submittedAt": 1458704983
        }));
    state.forced.push((builder, fields));
    HttpResponse::Ok().finish()
}

/// Mock buildbot master.
pub struct MockBuildbot {
    pub url: String,
    pub state: Arc<Mutex<BuildbotState>>,
}

impl MockBuildbot {
    /// Start the mock buildbot on an ephemeral port.
    pub async fn start(state: BuildbotState) -> Self {
        let state = Arc::new(Mutex::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{}", port);

        let state_data = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state_data.clone()))
                .service(get_builders)
                .service(pending_builds)
                .service(recent_builds)
                .service(force_build)
        })
        .workers(1)
        .listen(listener)
        .expect("failed to listen")
        .disable_signals()
        .run();

        // Fire and forget, the server lives as long as the test runtime
        tokio::spawn(server);

        MockBuildbot { url, state }
    }

    pub fn forced(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.state.lock().unwrap().forced.clone()
    }
}

/// State of the mock dashboard.
pub struct DashboardState {
    pub manifest: Value,
    /// Payload of `GET /api/build-requests/{triggerable}`
    pub build_requests: Value,
    /// Payloads of `GET /api/test-groups/{id}`
    pub test_groups: HashMap<String, Value>,
    /// Payloads of `GET /api/test-groups?task={id}`
    pub tasks: HashMap<String, Value>,
    /// `status` returned for build request updates
    pub update_status: String,
    /// JSON bodies POSTed, with their paths
    pub posts: Vec<(String, Value)>,
    /// Authorization header of every request
    pub authorizations: Vec<Option<String>>,
}

impl DashboardState {
    pub fn new(manifest: Value, build_requests: Value) -> Self {
        Self {
            manifest,
            build_requests,
            test_groups: HashMap::new(),
            tasks: HashMap::new(),
            update_status: "OK".to_string(),
            posts: Vec::new(),
            authorizations: Vec::new(),
        }
    }

    fn record_authorization(&mut self, req: &HttpRequest) {
        let header = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.authorizations.push(header);
    }
}

#[derive(Deserialize)]
struct TaskQuery {
    task: String,
}

#[get("/data/manifest.json")]
async fn get_manifest(state: web::Data<Arc<Mutex<DashboardState>>>, req: HttpRequest) -> HttpResponse {
    let mut state = state.lock().unwrap();
    state.record_authorization(&req);
    HttpResponse::Ok().json(state.manifest.clone())
}

#[get("/api/build-requests/{triggerable}")]
async fn get_build_requests(
    state: web::Data<Arc<Mutex<DashboardState>>>,
    req: HttpRequest,
) -> HttpResponse {
    let mut state = state.lock().unwrap();
    state.record_authorization(&req);
    HttpResponse::Ok().json(state.build_requests.clone())
}

#[post("/api/build-requests/{triggerable}")]
async fn update_build_requests(
    state: web::Data<Arc<Mutex<DashboardState>>>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> HttpResponse {
    let mut state = state.lock().unwrap();
    state.record_authorization(&req);
    state.posts.push((req.path().to_string(), body.into_inner()));
    HttpResponse::Ok().json(json!({ "status": state.update_status }))
}

#[get("/api/test-groups/{id}")]
async fn test_group(
    state: web::Data<Arc<Mutex<DashboardState>>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    let mut state = state.lock().unwrap();
    state.record_authorization(&req);
    match state.test_groups.get(path.as_str()) {
        Some(payload) => HttpResponse::Ok().json(payload.clone()),
        None => HttpResponse::Ok().json(json!({"status": "TestGroupNotFound"})),
    }
}

#[get("/api/test-groups")]
async fn test_groups_for_task(
    state: web::Data<Arc<Mutex<DashboardState>>>,
    req: HttpRequest,
    query: web::Query<TaskQuery>,
) -> HttpResponse {
    let mut state = state.lock().unwrap();
    state.record_authorization(&req);
    let payload = state
        .tasks
        .get(&query.task)
        .cloned()
        .unwrap_or_else(|| json!({"status": "OK", "testGroups": [], "buildRequests": []}));
    HttpResponse::Ok().json(payload)
}

#[post("/api/update-triggerable/")]
async fn update_triggerable(
    state: web::Data<Arc<Mutex<DashboardState>>>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> HttpResponse {
    let mut state = state.lock().unwrap();
    state.record_authorization(&req);
    state.posts.push((req.path().to_string(), body.into_inner()));
    HttpResponse::Ok().json(json!({"status": "OK"}))
}

/// Mock performance dashboard.
pub struct MockDashboard {
    pub url: String,
    pub state: Arc<Mutex<DashboardState>>,
}

impl MockDashboard {
    /// Start the mock dashboard on an ephemeral port.
    pub async fn start(state: DashboardState) -> Self {
        let state = Arc::new(Mutex::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{}", port);

        let state_data = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state_data.clone()))
                .service(get_manifest)
                .service(get_build_requests)
                .service(update_build_requests)
                .service(test_group)
                .service(test_groups_for_task)
                .service(update_triggerable)
        })
        .workers(1)
        .listen(listener)
        .expect("failed to listen")
        .disable_signals()
        .run();

        tokio::spawn(server);

        MockDashboard { url, state }
    }

    /// Bodies POSTed to `path`.
    pub fn posts_to(&self, path: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }
}
