use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use axum::http::{HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use axum::{Router, routing::get};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_api::AppStateInner;
use parley_db::Database;
use parley_gateway::connection::{self, GatewayState};
use parley_gateway::Gateway;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Single allowed browser origin; permissive when unset.
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = get("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("PARLEY_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PARLEY_PORT is not a port number: {raw}"))?,
            None => 5000,
        };

        Ok(Self {
            jwt_secret,
            db_path: get("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            host: get("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            cors_origin: get("PARLEY_CORS_ORIGIN").filter(|o| !o.is_empty()),
        })
    }
}

/// Assemble the full HTTP surface: REST routes, the gateway upgrade and `/health`.
pub fn app(
    db: Arc<Database>,
    gateway: Gateway,
    jwt_secret: String,
    cors_origin: Option<&str>,
) -> anyhow::Result<Router> {
    let rest = parley_api::router(Arc::new(AppStateInner {
        db,
        gateway: gateway.clone(),
        jwt_secret: jwt_secret.clone(),
    }));
    let ws = connection::router(GatewayState {
        gateway,
        jwt_secret,
    });

    let cors = match cors_origin {
        Some(origin) => {
            let origin: HeaderValue = origin
                .parse()
                .with_context(|| format!("Invalid CORS origin: {origin}"))?;
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        }
        None => CorsLayer::permissive(),
    };

    Ok(Router::new()
        .route("/health", get(health))
        .merge(rest)
        .merge(ws)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = Config::from_lookup(lookup(&[("PARLEY_JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn placeholder_or_missing_secret_is_rejected() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")])).is_err());
    }

    #[test]
    fn bad_port_is_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_PORT", "eighty"),
        ]));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_needs_no_credentials() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Gateway::new(db.clone());
        let app = app(db, gateway, "s3cret".into(), None).unwrap();

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn gateway_rejects_missing_token_before_upgrade() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Gateway::new(db.clone());
        let app = app(db, gateway, "s3cret".into(), Some("http://localhost:3000")).unwrap();

        let resp = app
            .oneshot(Request::get("/gateway").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
