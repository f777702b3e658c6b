//! Role checks shared by funding operations.

use super::model::{MemberRole, User};
use super::storage::FundingStore;
use crate::error::Result;
use uuid::Uuid;

/// Whether `user` holds any of `roles` on `account_id`.
///
/// A user always administers their own personal account.
pub async fn has_any_role(
    store: &dyn FundingStore,
    user: &User,
    account_id: Uuid,
    roles: &[MemberRole],
) -> Result<bool> {
    if user.account_id == account_id && roles.contains(&MemberRole::Admin) {
        return Ok(true);
    }
    let held = store.get_member_roles(user.account_id, account_id).await?;
    Ok(held.iter().any(|role| roles.contains(role)))
}

/// Whether `user` administers `account_id`.
pub async fn is_admin_of(store: &dyn FundingStore, user: &User, account_id: Uuid) -> Result<bool> {
    has_any_role(store, user, account_id, &[MemberRole::Admin]).await
}

/// Whether `user` is root or administers `account_id`.
pub async fn is_root_or_admin_of(
    store: &dyn FundingStore,
    user: &User,
    account_id: Uuid,
) -> Result<bool> {
    Ok(user.is_root || is_admin_of(store, user, account_id).await?)
}
