pub mod api;

use actix_session::{CookieSession, Session};
use actix_web::cookie::SameSite;
use actix_web::error;

use crate::store::UserId;

/// Logged-in user, as put in the session by the surrounding application.
pub struct SessionUser {
    pub id: UserId,
}

const SESSION_COOKIE_MAX_AGE: i64 = 30 * 86400;

pub fn create_cookie_session(cookie_secret: &[u8], cookie_secure: bool) -> CookieSession {
    CookieSession::private(cookie_secret)
        .name("session")
        .secure(cookie_secure)
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(SESSION_COOKIE_MAX_AGE)
}

pub fn get_session_user(session: &Session) -> actix_web::Result<SessionUser> {
    match session.get::<UserId>("user_id") {
        Ok(Some(id)) => Ok(SessionUser { id }),
        Ok(None) => Err(error::ErrorUnauthorized("")),
        Err(e) => {
            // Garbage in the cookie. Drop it.
            log::error!("Invalid user_id in session cookie: {}", e);
            session.purge();
            Err(error::ErrorUnauthorized(""))
        }
    }
}
