//! Permission checks and the [`RequiresPermission`] extractor.
//!
//! Handlers declare the coarse permission they need in their signature:
//!
//! ```ignore
//! async fn delete_post(
//!     current_user: RequiresPermission<resource::Posts, operation::DeleteOwn>,
//! ) -> Result<StatusCode> { ... }
//! ```
//!
//! The extractor only checks the role table. Ownership of the specific row is checked inside the
//! handler with [`can_read_all_resources`] or [`require_owner_or`].

use std::{marker::PhantomData, ops::Deref};

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    errors::{Error, Result},
    types::{AccessLevel, Operation, Permission, Resource, UserId},
};

/// Type-level resources for [`RequiresPermission`]
pub mod resource {
    use crate::types::Resource;

    pub trait ResourceMarker: Send + Sync + 'static {
        const RESOURCE: Resource;
    }

    macro_rules! resources {
        ($($name:ident),* $(,)?) => {
            $(
                #[derive(Debug, Clone, Copy)]
                pub struct $name;
                impl ResourceMarker for $name {
                    const RESOURCE: Resource = Resource::$name;
                }
            )*
        };
    }

    resources!(Users, Roles, Tiers, Subscriptions, Billing, Articles, Forums, Posts, Comments);
}

/// Type-level operations for [`RequiresPermission`]
pub mod operation {
    use crate::types::Operation;

    pub trait OperationMarker: Send + Sync + 'static {
        const OPERATION: Operation;
    }

    macro_rules! operations {
        ($($name:ident),* $(,)?) => {
            $(
                #[derive(Debug, Clone, Copy)]
                pub struct $name;
                impl OperationMarker for $name {
                    const OPERATION: Operation = Operation::$name;
                }
            )*
        };
    }

    operations!(CreateAll, CreateOwn, ReadAll, ReadOwn, UpdateAll, UpdateOwn, DeleteAll, DeleteOwn, Moderate);
}

/// Whether the user's roles grant `operation` on `resource`
pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    user.entitlements.allows(resource, operation)
}

/// Whether the user may see every row of a resource rather than only their own
pub fn can_read_all_resources(user: &CurrentUser, resource: Resource) -> bool {
    has_permission(user, resource, Operation::ReadAll)
}

/// Evaluate a [`Permission`] requirement
pub fn satisfies(user: &CurrentUser, permission: &Permission) -> bool {
    match permission {
        Permission::Allow(resource, operation) => has_permission(user, *resource, *operation),
        Permission::Granted => true,
        Permission::Any(options) => options.iter().any(|p| satisfies(user, p)),
    }
}

/// Fail with 403 unless the user satisfies `permission`
pub fn authorize(user: &CurrentUser, permission: Permission, action: Operation, resource: impl Into<String>) -> Result<()> {
    if satisfies(user, &permission) {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            required: permission,
            action,
            resource: resource.into(),
        })
    }
}

/// Allow the owner of a row, or anyone holding the `*All` variant of `operation`.
///
/// `operation` is the `*All` operation; owners are checked against its `*Own` variant.
pub fn require_owner_or(user: &CurrentUser, owner_id: UserId, resource: Resource, operation: Operation) -> Result<()> {
    if has_permission(user, resource, operation) {
        return Ok(());
    }
    if let Some(own) = operation.own_variant()
        && owner_id == user.id
        && has_permission(user, resource, own)
    {
        return Ok(());
    }
    Err(Error::InsufficientPermissions {
        required: Permission::Allow(resource, operation),
        action: operation,
        resource: resource.to_string(),
    })
}

/// Check that the caller may see content published at `level`.
///
/// Anonymous callers get 401 so clients can prompt for sign-in; signed-in callers below the
/// level get 403.
pub fn require_visibility(user: Option<&CurrentUser>, level: AccessLevel, what: &str) -> Result<()> {
    let allowed = match user {
        Some(user) => user.entitlements.can_view(level),
        None => level == AccessLevel::Public,
    };
    if allowed {
        return Ok(());
    }
    match user {
        None => Err(Error::Unauthenticated {
            message: Some(format!("Sign in to read this {what}")),
        }),
        Some(_) => Err(Error::InsufficientPermissions {
            required: Permission::Granted,
            action: Operation::ReadOwn,
            resource: format!("this {what}; it is for {level:?} only").to_lowercase(),
        }),
    }
}

/// Extractor that authenticates the caller and checks a role permission.
///
/// Derefs to the [`CurrentUser`].
#[derive(Debug, Clone)]
pub struct RequiresPermission<R, O> {
    pub user: CurrentUser,
    _marker: PhantomData<(R, O)>,
}

impl<R, O> Deref for RequiresPermission<R, O> {
    type Target = CurrentUser;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl<R, O> RequiresPermission<R, O> {
    pub fn into_inner(self) -> CurrentUser {
        self.user
    }
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: resource::ResourceMarker,
    O: operation::OperationMarker,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        authorize(&user, Permission::Allow(R::RESOURCE, O::OPERATION), O::OPERATION, R::RESOURCE.to_string())?;

        Ok(Self {
            user,
            _marker: PhantomData,
        })
    }
}
