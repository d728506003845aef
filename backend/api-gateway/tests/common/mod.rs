//! Shared fixtures for gateway integration tests
#![allow(dead_code)]

use actix_web::{dev::ServerHandle, http::header, web, App, HttpRequest, HttpResponse, HttpServer};
use api_gateway::config::{Config, ServiceConfig};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::Value;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "integration-test-secret-of-32-bytes+";

/// base64url of `{"alg":"RS256","typ":"JWT"}`
const RS256_HEADER: &str = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9";

/// One request as the backend saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct BackendState {
    name: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Real HTTP backend on an ephemeral port that records every request
///
/// Answers `200` with its name, except:
/// - paths ending in `/created` answer `201` with `X-Backend-Marker: yes`
/// - paths ending in `/redirect` answer `302` to `/elsewhere`
pub struct Backend {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: ServerHandle,
}

impl Backend {
    pub fn start(name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind backend port");
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = web::Data::new(BackendState {
            name: name.to_string(),
            requests: requests.clone(),
        });
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .default_service(web::to(record))
        })
        .workers(1)
        .listen(listener)
        .expect("listen backend")
        .run();

        let handle = server.handle();
        actix_rt::spawn(server);

        Self {
            url: format!("http://{addr}"),
            requests,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last(&self) -> Recorded {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("backend received no request")
    }

    pub async fn stop(self) {
        self.handle.stop(true).await;
    }
}

async fn record(req: HttpRequest, body: web::Bytes, state: web::Data<BackendState>) -> HttpResponse {
    let recorded = Recorded {
        method: req.method().to_string(),
        path: req.path().to_string(),
        query: req.query_string().to_string(),
        headers: req
            .headers()
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: body.to_vec(),
    };
    state.requests.lock().unwrap().push(recorded);

    if req.path().ends_with("/created") {
        HttpResponse::Created()
            .insert_header(("X-Backend-Marker", "yes"))
            .body(state.name.clone())
    } else if req.path().ends_with("/redirect") {
        HttpResponse::Found()
            .insert_header((header::LOCATION, "/elsewhere"))
            .finish()
    } else {
        HttpResponse::Ok().body(state.name.clone())
    }
}

pub fn service(name: &str, prefix: &str, target_url: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        target_url: target_url.to_string(),
        ..Default::default()
    }
}

pub fn protected(name: &str, prefix: &str, target_url: &str) -> ServiceConfig {
    ServiceConfig {
        auth_required: true,
        ..service(name, prefix, target_url)
    }
}

pub fn gateway_config(services: Vec<ServiceConfig>) -> Config {
    Config {
        jwt_secret: SECRET.to_string(),
        services,
        ..Default::default()
    }
}

pub fn token(claims: Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Well-formed token whose header declares RS256
pub fn rs256_token(claims: Value) -> String {
    let hs = token(claims);
    let mut parts = hs.splitn(2, '.');
    let _header = parts.next();
    format!("{RS256_HEADER}.{}", parts.next().unwrap())
}

pub fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

pub fn expires_in(seconds: i64) -> i64 {
    chrono::Utc::now().timestamp() + seconds
}
