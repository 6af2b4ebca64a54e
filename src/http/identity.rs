use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::error::ApiError;
use crate::domain::identity::{Identity, SessionToken, UserId};

pub const SESSION_HEADER: &str = "x-session-token";
pub const USER_HEADER: &str = "x-user-id";

/// Identity headers of a storefront request.
///
/// `x-user-id` is set by the auth gateway once sign-in has moved the cart
/// to the user; until then the session owns the cart.
#[derive(Clone, Debug)]
pub struct RequestIdentity {
    pub session: SessionToken,
    pub user: Option<UserId>,
}

impl RequestIdentity {
    pub fn owner(&self) -> Identity {
        match self.user {
            Some(user) => Identity::Authenticated(user),
            None => Identity::Anonymous(self.session.clone()),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts.headers
        .get(name)
        .map(|v| v.to_str().map_err(|_| ApiError::BadRequest(format!("{name} header is not valid text"))))
        .transpose()
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = header(parts, SESSION_HEADER)?
            .ok_or_else(|| ApiError::BadRequest(format!("{SESSION_HEADER} header is required")))?;
        let session = SessionToken::parse(session)?;
        let user = header(parts, USER_HEADER)?
            .filter(|v| !v.trim().is_empty())
            .map(str::parse::<UserId>)
            .transpose()?;
        Ok(Self { session, user })
    }
}
