/// Authentication Routes
///
/// Handles registration, login, refresh-token rotation, logout, and the
/// authenticated account views.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientInfo, Claims, RefreshTransport, SessionManager, SessionTokens};
use crate::error::{AppError, AuthError, ErrorContext};
use crate::store::{SecurityEvent, User};
use crate::validators::{are_valid_roles, is_valid_email};

/// User registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of refresh and logout. Only read in header transport mode.
#[derive(Deserialize, Default)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Access credential response. The refresh credential travels via the
/// configured transport, never in this body.
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// User information response
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct SecurityEventResponse {
    pub kind: String,
    pub session_id: Option<String>,
    pub message: String,
    pub created_at: String,
}

impl From<SecurityEvent> for SecurityEventResponse {
    fn from(event: SecurityEvent) -> Self {
        Self {
            kind: event.kind.to_string(),
            session_id: event.session_id.map(|id| id.to_string()),
            message: event.message,
            created_at: event.created_at.to_rfc3339(),
        }
    }
}

fn client_info(req: &HttpRequest) -> ClientInfo {
    ClientInfo {
        user_agent: req
            .headers()
            .get(actix_web::http::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|ua| ua.chars().take(512).collect()),
        ip: req.connection_info().realip_remote_addr().map(str::to_string),
    }
}

fn token_response(
    req: &HttpRequest,
    transport: &dyn RefreshTransport,
    tokens: &SessionTokens,
) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    transport.attach(req, &mut response, &tokens.refresh);
    response.json(TokenResponse {
        access_token: tokens.access.token.clone(),
        token_type: "Bearer".to_string(),
        expires_in: tokens.access.expires_in,
    })
}

/// POST /auth/register
///
/// # Validation
/// - Email must be valid format and not already registered
/// - Password must be 8+ chars with digit, lowercase, and uppercase
/// - Roles must be lowercase identifiers
///
/// # Errors
/// - 400: Validation errors
/// - 409: Email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let email = is_valid_email(&form.email)?;
    let roles = are_valid_roles(&form.roles)?;

    let user = sessions
        .register(&email, &form.password, roles)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(serde_json::json!({
        "id": user.id.to_string(),
        "email": user.email,
        "roles": user.roles,
    })))
}

/// POST /auth/login
///
/// Opens a new session. The refresh credential is attached by the transport.
///
/// # Security Notes
/// - Unknown email and wrong password produce the same 401 after the same
///   amount of hashing work
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    sessions: web::Data<SessionManager>,
    transport: web::Data<dyn RefreshTransport>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let tokens = sessions
        .login(&form.email, &form.password, client_info(&req))
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %tokens.user_id,
        session_id = %tokens.session_id,
        "User logged in successfully"
    );

    Ok(token_response(&req, transport.get_ref(), &tokens))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh credential. Replaying a retired credential
/// revokes the whole session.
///
/// # Errors
/// - 401 `MISSING_TOKEN`: nothing presented
/// - 401 `TOKEN_INVALID`: every rejection, reuse included
/// - 503: session store unavailable
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    sessions: web::Data<SessionManager>,
    transport: web::Data<dyn RefreshTransport>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let presented = transport
        .extract(&req, body.refresh_token.as_deref())
        .ok_or(AuthError::MissingToken)?;

    let tokens = sessions.refresh(&presented).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %tokens.user_id,
        session_id = %tokens.session_id,
        "Token refreshed successfully"
    );

    Ok(token_response(&req, transport.get_ref(), &tokens))
}

/// POST /auth/logout
///
/// Always 200: a missing, malformed or already-revoked credential is a no-op.
pub async fn logout(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    sessions: web::Data<SessionManager>,
    transport: web::Data<dyn RefreshTransport>,
) -> Result<HttpResponse, AppError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let presented = transport.extract(&req, body.refresh_token.as_deref());

    sessions.logout(presented.as_deref()).await?;

    let mut response = HttpResponse::Ok();
    transport.clear(&req, &mut response);
    Ok(response.json(serde_json::json!({ "ok": true })))
}

/// GET /auth/me
///
/// **Requires** `Authorization: Bearer <access_token>`. The JWT middleware
/// checks the token version against the stored user, so credentials minted
/// before a logout-all are rejected.
pub async fn get_current_user(user: web::ReqData<User>) -> Result<HttpResponse, AppError> {
    let user = user.into_inner();

    Ok(HttpResponse::Ok().json(UserResponse {
        id: user.id.to_string(),
        email: user.email,
        roles: user.roles,
        created_at: user.created_at.to_rfc3339(),
    }))
}

/// POST /auth/logout-all
///
/// Invalidates every access credential (version bump) and every session of
/// the caller.
pub async fn logout_all(
    claims: web::ReqData<Claims>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let context = ErrorContext::new("logout_all").with_user_id(user_id.to_string());

    let revoked = sessions.logout_all(user_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        sessions = revoked,
        "All sessions revoked"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "sessions_revoked": revoked,
    })))
}

/// GET /auth/security-events
///
/// The caller's most recent security events, newest first.
pub async fn security_events(
    user: web::ReqData<User>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let events: Vec<SecurityEventResponse> = sessions
        .events()
        .recent(user.id)
        .await?
        .into_iter()
        .map(SecurityEventResponse::from)
        .collect();

    Ok(HttpResponse::Ok().json(events))
}
