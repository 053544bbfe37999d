mod auth;
mod health_check;

pub use auth::{
    get_current_user, login, logout, logout_all, refresh, register, security_events,
    RefreshRequest, TokenResponse,
};
pub use health_check::health_check;
