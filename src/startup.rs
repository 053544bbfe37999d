use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::middleware::DefaultHeaders;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use crate::audit::SecurityEventRecorder;
use crate::auth::{transport_from_settings, RefreshTransport, SessionManager, TokenIssuer};
use crate::configuration::{CorsSettings, Settings, StoreBackend, TransportMode, TransportSettings};
use crate::error::{AppError, DatabaseError};
use crate::middleware::{JwtMiddleware, LoggerMiddleware, REQUEST_ID_HEADER};
use crate::routes::{
    get_current_user, health_check, login, logout, logout_all, refresh, register, security_events,
};
use crate::store::{InMemoryStore, PgStore, RefreshStore, SecurityEventStore, UserStore};

/// Storage backends behind the service traits
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn RefreshStore>,
    pub events: Arc<dyn SecurityEventStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::from_shared(Arc::new(InMemoryStore::new()))
    }

    /// One backend serving all three traits
    pub fn from_shared<T>(store: Arc<T>) -> Self
    where
        T: UserStore + RefreshStore + SecurityEventStore + 'static,
    {
        Self {
            users: store.clone(),
            tokens: store.clone(),
            events: store,
        }
    }

    /// Open the configured backend; for Postgres this also runs migrations
    pub async fn connect(settings: &Settings) -> Result<Self, AppError> {
        match settings.database.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory session store; state is lost on restart");
                Ok(Self::in_memory())
            }
            StoreBackend::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(settings.database.max_connections)
                    .acquire_timeout(settings.store.timeout())
                    .connect(&settings.database.connection_string())
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to create connection pool: {}", e);
                        AppError::Database(DatabaseError::ConnectionPool(e.to_string()))
                    })?;
                tracing::info!("Database connection pool created successfully");

                let store = PgStore::new(pool);
                store.migrate().await?;
                Ok(Self::from_shared(Arc::new(store)))
            }
        }
    }
}

/// Shared per-process state handed to every worker
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub transport: Arc<dyn RefreshTransport>,
}

impl AppState {
    pub fn new(settings: &Settings, stores: Stores) -> Self {
        let timeout = settings.store.timeout();
        let issuer = TokenIssuer::new(settings.jwt.clone());
        let transport =
            transport_from_settings(&settings.transport, settings.jwt.refresh_token_expiry);

        Self {
            sessions: SessionManager::new(
                stores.users,
                stores.tokens,
                SecurityEventRecorder::new(stores.events, timeout),
                issuer,
                timeout,
            ),
            transport,
        }
    }
}

/// Headers browsers may read cross-origin. The refresh header is added
/// automatically in header transport mode.
pub fn exposed_headers(cors: &CorsSettings, transport: &TransportSettings) -> Vec<String> {
    let mut headers = cors.exposed_headers.clone();
    let mut ensure = |name: &str| {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            headers.push(name.to_string());
        }
    };

    ensure(REQUEST_ID_HEADER);
    if transport.mode == TransportMode::Header {
        ensure(&transport.header_name);
    }
    headers
}

/// Credentials must never be cached by browsers or intermediaries
fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Cache-Control", "no-store"))
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
}

fn cors_middleware(cors: &CorsSettings, exposed: &[String]) -> Cors {
    let mut middleware = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .supports_credentials()
        .expose_headers(exposed.to_vec())
        .max_age(3600);

    for origin in &cors.allowed_origins {
        middleware = middleware.allowed_origin(origin);
    }
    middleware
}

pub fn run(listener: TcpListener, state: AppState, settings: &Settings) -> Result<Server, std::io::Error> {
    let sessions = web::Data::new(state.sessions.clone());
    let transport: web::Data<dyn RefreshTransport> = web::Data::from(state.transport.clone());
    let cors = settings.cors.clone();
    let exposed = exposed_headers(&settings.cors, &settings.transport);

    tracing::info!(
        transport = ?state.transport.mode(),
        allowed_origins = cors.allowed_origins.len(),
        "Configuring HTTP server"
    );

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(security_headers())
            .wrap(cors_middleware(&cors, &exposed))
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(sessions.clone())
            .app_data(transport.clone())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))

            // Protected routes (require a current-version access credential)
            .service(
                web::resource("/auth/me")
                    .wrap(JwtMiddleware::new(state.sessions.clone()))
                    .route(web::get().to(get_current_user)),
            )
            .service(
                web::resource("/auth/logout-all")
                    .wrap(JwtMiddleware::new(state.sessions.clone()))
                    .route(web::post().to(logout_all)),
            )
            .service(
                web::resource("/auth/security-events")
                    .wrap(JwtMiddleware::new(state.sessions.clone()))
                    .route(web::get().to(security_events)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_mode_exposes_refresh_header() {
        let cors = CorsSettings {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            exposed_headers: vec!["X-Refresh-Token".to_string()],
        };
        let transport = TransportSettings {
            mode: TransportMode::Header,
            ..TransportSettings::default()
        };

        let headers = exposed_headers(&cors, &transport);
        assert_eq!(
            headers
                .iter()
                .filter(|h| h.eq_ignore_ascii_case("x-refresh-token"))
                .count(),
            1
        );
        assert!(headers.iter().any(|h| h == REQUEST_ID_HEADER));
    }

    #[test]
    fn test_cookie_mode_does_not_expose_refresh_header() {
        let headers = exposed_headers(&CorsSettings::default(), &TransportSettings::default());
        assert_eq!(headers, vec![REQUEST_ID_HEADER.to_string()]);
    }
}
