//! Authorization policy.
//!
//! Every permission decision goes through [`authorize`]: the HTTP handlers and the
//! review request operations ask the same question, "may this principal perform
//! this action on a resource owned by this business?".

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::audit::Actor;
use crate::error::AppError;
use crate::models::UnknownVariant;
use crate::models::api_key::ApiKey;

/// Permission strings an API key can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    ReviewRequestsRead,
    ReviewRequestsCreate,
    ReviewRequestsUpdate,
    ReviewRequestsDelete,
    ReviewRequestsSend,
    FeedbackRead,
    FeedbackUpdate,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::ReviewRequestsRead,
        Permission::ReviewRequestsCreate,
        Permission::ReviewRequestsUpdate,
        Permission::ReviewRequestsDelete,
        Permission::ReviewRequestsSend,
        Permission::FeedbackRead,
        Permission::FeedbackUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReviewRequestsRead => "review-requests.read",
            Permission::ReviewRequestsCreate => "review-requests.create",
            Permission::ReviewRequestsUpdate => "review-requests.update",
            Permission::ReviewRequestsDelete => "review-requests.delete",
            Permission::ReviewRequestsSend => "review-requests.send",
            Permission::FeedbackRead => "feedback.read",
            Permission::FeedbackUpdate => "feedback.update",
        }
    }
}

impl FromStr for Permission {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is acting, for which business, with which permissions.
///
/// Built fresh for every request; nothing is cached between requests.
#[derive(Debug, Clone)]
pub struct Principal {
    pub business_id: Uuid,
    pub permissions: BTreeSet<Permission>,
    pub actor: Actor,
}

impl Principal {
    /// Principal of an authenticated API key. Unknown permission strings grant nothing.
    pub fn for_api_key(key: &ApiKey) -> Self {
        Self {
            business_id: key.business_id,
            permissions: key
                .permissions
                .iter()
                .filter_map(|p| p.parse().ok())
                .collect(),
            actor: Actor::ApiKey {
                id: key.id,
                name: key.name.clone(),
            },
        }
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    DenyMissingPermission(Permission),
    /// Resource missing or owned by another business. Reported identically.
    DenyResource,
}

impl Decision {
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::DenyMissingPermission(permission) => {
                Err(AppError::MissingPermission(permission.to_string()))
            }
            Decision::DenyResource => Err(AppError::Forbidden),
        }
    }
}

/// What the action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Collection-level action (list, create).
    Collection,
    /// A loaded record and the business that owns it.
    OwnedBy(Uuid),
    /// The id did not resolve to a record.
    Missing,
}

/// Single entry point for permission checks.
pub fn authorize(principal: &Principal, permission: Permission, resource: Resource) -> Decision {
    if !principal.permissions.contains(&permission) {
        return Decision::DenyMissingPermission(permission);
    }
    match resource {
        Resource::Collection => Decision::Allow,
        Resource::OwnedBy(owner) if owner == principal.business_id => Decision::Allow,
        Resource::OwnedBy(_) | Resource::Missing => Decision::DenyResource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(permissions: &[Permission]) -> Principal {
        Principal {
            business_id: Uuid::new_v4(),
            permissions: permissions.iter().copied().collect(),
            actor: Actor::System,
        }
    }

    #[test]
    fn missing_permission_is_reported_by_name() {
        let p = principal(&[Permission::ReviewRequestsRead]);
        let decision = authorize(&p, Permission::ReviewRequestsDelete, Resource::Collection);

        assert_eq!(
            decision,
            Decision::DenyMissingPermission(Permission::ReviewRequestsDelete)
        );
        match decision.into_result() {
            Err(AppError::MissingPermission(name)) => assert_eq!(name, "review-requests.delete"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn foreign_and_missing_resources_are_indistinguishable() {
        let p = principal(&[Permission::ReviewRequestsRead]);
        let foreign = authorize(&p, Permission::ReviewRequestsRead, Resource::OwnedBy(Uuid::new_v4()));
        let missing = authorize(&p, Permission::ReviewRequestsRead, Resource::Missing);

        assert_eq!(foreign, Decision::DenyResource);
        assert_eq!(foreign, missing);
    }

    #[test]
    fn own_resource_is_allowed() {
        let p = principal(&[Permission::FeedbackUpdate]);
        assert_eq!(
            authorize(&p, Permission::FeedbackUpdate, Resource::OwnedBy(p.business_id)),
            Decision::Allow
        );
    }

    #[test]
    fn permission_strings_round_trip() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>().ok(), Some(permission));
        }
        assert!("review-requests.*".parse::<Permission>().is_err());
    }
}
