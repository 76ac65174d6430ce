use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use std::convert::Infallible;
use time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "tabula_session";

/// Browser session, identified by an encrypted cookie.
///
/// A fresh id is minted when the cookie is missing or cannot be decrypted; the
/// returned `jar` carries the cookie and must be part of the response.
pub struct Session {
    pub id: String,
    pub jar: PrivateCookieJar,
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    Key: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = PrivateCookieJar::<Key>::from_request_parts(parts, state).await?;

        if let Some(id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) {
            return Ok(Self {
                jar: jar.add(build_cookie(id.clone())),
                id,
            });
        }

        let id = Uuid::new_v4().to_string();
        debug!(session = %id, "new session");
        Ok(Self {
            jar: jar.add(build_cookie(id.clone())),
            id,
        })
    }
}

fn build_cookie(value: String) -> Cookie<'static> {
    Cookie::build(Cookie::new(SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(7))
        .build()
}
