pub mod policies;
pub mod roles;
pub mod signing_keys;

pub use policies::{
    add_policy, backup_policies, delete_role, list_policies, policy_stats, remove_policy,
    restore_policies, update_policy,
};
pub use roles::{assign_role, force_logout, get_user_roles, revoke_role};
pub use signing_keys::{deactivate_signing_key, list_signing_keys, rotate_signing_key};
