//! Authenticated caller identity and its extraction from the request context.
//!
//! The gateway never validates tokens. Upstream middleware attaches an
//! identity it already trusts; resolvers that need the caller call
//! [`extract`], and a failure becomes a field-level `UNAUTHENTICATED` error.

use crate::context::{CarriedIdentity, RequestContext};
use crate::error::FieldError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedIdentity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthenticatedIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: None,
            email: None,
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Yield the authenticated identity of the request, or `Unauthenticated`.
pub fn extract(ctx: &RequestContext) -> Result<Arc<AuthenticatedIdentity>, FieldError> {
    match ctx.carried_identity() {
        CarriedIdentity::Present(identity) if identity.user_id.trim().is_empty() => Err(
            FieldError::unauthenticated("authenticated identity has no user id"),
        ),
        CarriedIdentity::Present(identity) => Ok(Arc::clone(identity)),
        CarriedIdentity::Malformed(reason) => Err(FieldError::unauthenticated(format!(
            "malformed identity: {reason}"
        ))),
        CarriedIdentity::Absent => Err(FieldError::unauthenticated(
            "no authenticated identity on request",
        )),
    }
}
