/// Authentication module
///
/// Password hashing, access credential (JWT) issuing, refresh credential
/// primitives and transports, and the session manager that rotates refresh
/// credentials and detects their reuse.

mod claims;
mod jwt;
mod password;
pub mod refresh_token;
mod session;
mod transport;

pub use claims::Claims;
pub use jwt::{AccessCredential, TokenIssuer};
pub use password::{hash_password, verify_against_dummy, verify_password, PasswordScheme};
pub use refresh_token::{generate_refresh_secret, hash_refresh_secret, secret_matches, CompositeToken};
pub use session::{ClientInfo, SessionManager, SessionTokens};
pub use transport::{transport_from_settings, CookieTransport, HeaderTransport, RefreshTransport};
