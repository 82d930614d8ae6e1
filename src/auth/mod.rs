/*!
 * # Actors and approval gates
 *
 * Authentication happens upstream. The gateway forwards the acting user in
 * the `x-actor-id`, `x-actor-name` and `x-actor-permissions` headers, and
 * the services consult an injected [`ApprovalAuthorizer`] before any state
 * change that mutates stock.
 */

pub mod permissions;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_PERMISSIONS_HEADER: &str = "x-actor-permissions";

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: Option<String>,
    pub permissions: Vec<String>,
}

impl Actor {
    pub fn new(id: Uuid, permissions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id,
            name: None,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if the actor holds a permission, honouring wildcard grants
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|granted| permissions::grants(granted, permission))
    }
}

/// Pass/fail gate consulted before approvals and other privileged transitions.
#[async_trait]
pub trait ApprovalAuthorizer: Send + Sync {
    async fn is_permitted(&self, actor: &Actor, permission: &str) -> bool;
}

/// Default gate: trusts the permission list forwarded by the gateway.
#[derive(Debug, Clone, Default)]
pub struct PermissionAuthorizer;

#[async_trait]
impl ApprovalAuthorizer for PermissionAuthorizer {
    async fn is_permitted(&self, actor: &Actor, permission: &str) -> bool {
        actor.has_permission(permission)
    }
}

/// Fails with `Forbidden` unless the authorizer lets `actor` use `permission`.
pub async fn ensure_permitted(
    authorizer: &dyn ApprovalAuthorizer,
    actor: &Actor,
    permission: &str,
) -> Result<(), ServiceError> {
    if authorizer.is_permitted(actor, permission).await {
        Ok(())
    } else {
        tracing::warn!(actor_id = %actor.id, permission, "Permission denied");
        Err(ServiceError::Forbidden(format!(
            "actor {} lacks permission {}",
            actor.id, permission
        )))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", ACTOR_ID_HEADER)))?;
        let id = Uuid::parse_str(id).map_err(|_| {
            ServiceError::Unauthorized(format!("{} is not a valid UUID", ACTOR_ID_HEADER))
        })?;

        let permissions = header(ACTOR_PERMISSIONS_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Actor {
            id,
            name: header(ACTOR_NAME_HEADER).map(String::from),
            permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<Actor, ServiceError> {
        let (mut parts, _) = request.into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn actor_is_read_from_gateway_headers() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(ACTOR_ID_HEADER, id.to_string())
            .header(ACTOR_NAME_HEADER, "store keeper")
            .header(ACTOR_PERMISSIONS_HEADER, "grn:approve, returns:*")
            .body(())
            .unwrap();

        let actor = extract(request).await.unwrap();
        assert_eq!(actor.id, id);
        assert_eq!(actor.name.as_deref(), Some("store keeper"));
        assert!(actor.has_permission(permissions::GRN_APPROVE));
        assert!(actor.has_permission(permissions::RETURNS_REJECT));
        assert!(!actor.has_permission(permissions::OUTWARD_APPROVE));
    }

    #[tokio::test]
    async fn missing_actor_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(request).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn permission_authorizer_denies_without_grant() {
        let actor = Actor::new(Uuid::new_v4(), ["grn:create"]);
        let result = ensure_permitted(&PermissionAuthorizer, &actor, permissions::GRN_APPROVE).await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }
}
