/*!
In-memory attendance service for HTTP tests

Axum server bound on `127.0.0.1:0` speaking the same contract as the real
backend:
- `POST /api/auth/login` issues bearer tokens for the seeded users
- `POST /api/attendance/scan` toggles check-in / check-out per employee,
  refuses other tenants and inactive badges, and enforces a per-actor cooldown
- Missing or unknown tokens get `401 {"detail": ...}`
*/

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use timeclock_scanner::model::ScanRequest;
use timeclock_scanner::{AttendanceAction, ScanResponse};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct User {
    id: String,
    username: String,
    password: String,
    role: String,
    company_id: Option<String>,
}

#[derive(Debug, Clone)]
struct Employee {
    name: String,
    qr_code: String,
    company_id: String,
    is_active: bool,
}

struct Directory {
    users: Vec<User>,
    companies: HashMap<String, String>,
    employees: Vec<Employee>,
    /// token -> user id
    tokens: HashMap<String, String>,
    /// qr codes with a check-in and no check-out yet
    open_entries: HashSet<String>,
    last_scan: HashMap<String, Instant>,
    cooldown: Duration,
    scans: usize,
}

impl Directory {
    fn seeded(cooldown: Duration) -> Self {
        let user = |id: &str, username: &str, password: &str, role: &str, company: Option<&str>| User {
            id: id.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            role: role.to_string(),
            company_id: company.map(str::to_string),
        };
        let employee = |name: &str, qr: &str, company: &str, active: bool| Employee {
            name: name.to_string(),
            qr_code: qr.to_string(),
            company_id: company.to_string(),
            is_active: active,
        };

        Self {
            users: vec![
                user("owner-1", "owner", "owner123", "owner", None),
                user("admin-1", "admin", "admin123", "admin", Some("1")),
                user("user-1", "user", "user123", "user", Some("1")),
            ],
            companies: [("1", "Firma ABC"), ("2", "Firma XYZ")]
                .into_iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            employees: vec![
                employee("Jan Kowalski", "QR-EMP-001", "1", true),
                employee("Anna Nowak", "QR-EMP-002", "1", true),
                employee("Tomasz Wiśniewski", "QR-EMP-003", "1", false),
                employee("Piotr Zieliński", "QR-EMP-101", "2", true),
            ],
            tokens: HashMap::new(),
            open_entries: HashSet::new(),
            last_scan: HashMap::new(),
            cooldown,
            scans: 0,
        }
    }
}

type Shared = Arc<Mutex<Directory>>;

#[derive(Debug, Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

/// Running fake backend. The server task is aborted on drop.
pub struct FakeAttendanceServer {
    addr: SocketAddr,
    directory: Shared,
    task: JoinHandle<()>,
}

impl FakeAttendanceServer {
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_cooldown(DEFAULT_COOLDOWN).await
    }

    pub async fn with_cooldown(cooldown: Duration) -> anyhow::Result<Self> {
        let directory = Arc::new(Mutex::new(Directory::seeded(cooldown)));
        let app = build_router(directory.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ Fake attendance server failed: {}", e);
            }
        });

        log::info!("🏢 Fake attendance server listening on http://{}", addr);
        Ok(Self { addr, directory, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Forget a token so the next call using it gets a 401
    pub fn revoke(&self, token: &str) {
        self.directory.lock().tokens.remove(token);
    }

    /// Issue a token without going through login
    pub fn issue_token(&self, username: &str) -> Option<String> {
        let mut dir = self.directory.lock();
        let user_id = dir.users.iter().find(|u| u.username == username)?.id.clone();
        let token = uuid::Uuid::new_v4().simple().to_string();
        dir.tokens.insert(token.clone(), user_id);
        Some(token)
    }

    /// Number of scans that reached the handler with a valid token
    pub fn scan_count(&self) -> usize {
        self.directory.lock().scans
    }
}

impl Drop for FakeAttendanceServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn build_router(directory: Shared) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/attendance/scan", post(scan))
        .with_state(directory)
}

fn detail(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": message })))
}

// POST /api/auth/login
async fn login(State(dir): State<Shared>, Json(body): Json<LoginBody>) -> (StatusCode, Json<Value>) {
    let mut dir = dir.lock();
    let Some(user) = dir
        .users
        .iter()
        .find(|u| u.username == body.username && u.password == body.password)
        .cloned()
    else {
        return detail(StatusCode::UNAUTHORIZED, "Invalid credentials");
    };

    let token = uuid::Uuid::new_v4().simple().to_string();
    dir.tokens.insert(token.clone(), user.id.clone());

    let company_name = match &user.company_id {
        Some(id) => dir.companies.get(id).cloned(),
        None => Some("System Owner".to_string()),
    };

    (
        StatusCode::OK,
        Json(json!({
            "access_token": token,
            "token_type": "bearer",
            "user": {
                "id": user.id,
                "username": user.username,
                "type": user.role,
                "role": user.role,
                "company_id": user.company_id,
                "company_name": company_name,
            }
        })),
    )
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// POST /api/attendance/scan
async fn scan(
    State(dir): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, (StatusCode, Json<Value>)> {
    let mut dir = dir.lock();

    let Some(token) = bearer(&headers) else {
        return Err(detail(StatusCode::UNAUTHORIZED, "Not authenticated"));
    };
    let Some(user_id) = dir.tokens.get(token).cloned() else {
        return Err(detail(StatusCode::UNAUTHORIZED, "Invalid token"));
    };
    let Some(user) = dir.users.iter().find(|u| u.id == user_id).cloned() else {
        return Err(detail(StatusCode::UNAUTHORIZED, "User not found"));
    };
    dir.scans += 1;

    let now = Instant::now();
    if let Some(last) = dir.last_scan.get(&user.id) {
        let elapsed = now.duration_since(*last);
        if elapsed < dir.cooldown {
            let left = (dir.cooldown - elapsed).as_secs_f64().ceil().max(1.0) as u32;
            return Ok(Json(ScanResponse {
                success: false,
                message: format!("Please wait {left} seconds before scanning again"),
                cooldown_seconds: Some(left),
                ..Default::default()
            }));
        }
    }

    let employee = dir
        .employees
        .iter()
        .find(|e| e.qr_code == body.qr_code)
        .cloned();
    let Some(employee) = employee.filter(|e| e.is_active) else {
        return Ok(Json(denied("Invalid or inactive QR code")));
    };
    if let Some(company) = &user.company_id {
        if *company != employee.company_id {
            log::info!("🚫 {} tried to scan a badge of company {}", user.username, employee.company_id);
            return Ok(Json(denied("Access denied: employee belongs to another company")));
        }
    }

    let action = if dir.open_entries.remove(&employee.qr_code) {
        AttendanceAction::CheckOut
    } else {
        dir.open_entries.insert(employee.qr_code.clone());
        AttendanceAction::CheckIn
    };
    dir.last_scan.insert(user.id.clone(), now);

    let cooldown_seconds = dir.cooldown.as_secs() as u32;
    Ok(Json(ScanResponse {
        success: true,
        action: Some(action),
        employee_name: Some(employee.name.clone()),
        time: Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
        message: format!("{} registered for {}", action, employee.name),
        cooldown_seconds: Some(cooldown_seconds),
    }))
}

fn denied(message: &str) -> ScanResponse {
    ScanResponse {
        success: false,
        message: message.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_and_toggle() {
        let server = FakeAttendanceServer::with_cooldown(Duration::ZERO).await.unwrap();
        let client = reqwest::Client::new();

        let login: Value = client
            .post(format!("{}/api/auth/login", server.base_url()))
            .json(&json!({ "username": "user", "password": "user123" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let token = login["access_token"].as_str().unwrap().to_string();
        assert_eq!(login["user"]["company_name"], "Firma ABC");

        let scan = |qr: &'static str| {
            let client = client.clone();
            let url = format!("{}/api/attendance/scan", server.base_url());
            let token = token.clone();
            async move {
                client
                    .post(url)
                    .bearer_auth(token)
                    .json(&json!({ "qr_code": qr, "user_id": "user-1" }))
                    .send()
                    .await
                    .unwrap()
                    .json::<ScanResponse>()
                    .await
                    .unwrap()
            }
        };

        assert_eq!(scan("QR-EMP-001").await.action, Some(AttendanceAction::CheckIn));
        assert_eq!(scan("QR-EMP-001").await.action, Some(AttendanceAction::CheckOut));
        assert!(!scan("QR-EMP-101").await.success);
        assert!(!scan("QR-EMP-003").await.success);
    }

    #[tokio::test]
    async fn test_unknown_token_is_401() {
        let server = FakeAttendanceServer::start().await.unwrap();
        let response = reqwest::Client::new()
            .post(format!("{}/api/attendance/scan", server.base_url()))
            .bearer_auth("nope")
            .json(&json!({ "qr_code": "QR-EMP-001", "user_id": "user-1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["detail"], "Invalid token");
    }
}
