use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::{Policy, RoleAssignment, SigningAlgorithm};
use crate::utils::validation::{validate_action, validate_resource, validate_role_name};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PolicyRequest {
    #[validate(custom(function = "validate_role_name"))]
    #[schema(example = "editor")]
    pub role: String,

    /// Path pattern; `:param` and `{param}` segments are ignored.
    #[validate(custom(function = "validate_resource"))]
    #[schema(example = "/posts/:id")]
    pub resource: String,

    #[validate(custom(function = "validate_action"))]
    #[schema(example = "DELETE")]
    pub action: String,

    #[validate(length(min = 1, max = 64, message = "Domain must be between 1 and 64 characters"))]
    pub domain: Option<String>,
}

impl From<PolicyRequest> for Policy {
    fn from(req: PolicyRequest) -> Self {
        Policy {
            role: req.role,
            resource: req.resource,
            action: req.action,
            domain: req.domain,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePolicyRequest {
    #[validate(nested)]
    pub old: PolicyRequest,
    #[validate(nested)]
    pub new: PolicyRequest,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PolicyQuery {
    /// Only policies granted to this role.
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RoleAssignmentRequest {
    #[validate(custom(function = "validate_role_name"))]
    #[schema(example = "editor")]
    pub role: String,

    #[validate(length(min = 1, max = 64, message = "Domain must be between 1 and 64 characters"))]
    pub domain: Option<String>,
}

impl RoleAssignmentRequest {
    pub fn for_subject(self, subject_id: Uuid) -> RoleAssignment {
        RoleAssignment {
            subject_id,
            role: self.role,
            domain: self.domain,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserRolesResponse {
    pub user_id: Uuid,
    pub assignments: Vec<RoleAssignment>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RotateKeyRequest {
    /// Defaults to the configured algorithm.
    pub algorithm: Option<SigningAlgorithm>,
}

/// Outcome of a single-rule write. `changed` is false when the store
/// already held (or did not hold) the rule.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChangeResponse {
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    #[schema(example = 3)]
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ValidateRequest;

    fn policy(role: &str, resource: &str, action: &str) -> PolicyRequest {
        PolicyRequest {
            role: role.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            domain: None,
        }
    }

    #[test]
    fn policy_request_rules() {
        assert!(policy("editor", "/posts", "DELETE").validate_request().is_ok());
        assert!(policy("admin", "*", "*").validate_request().is_ok());

        let errors = policy("Editor", "posts", "").validate_request().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn update_validates_both_sides() {
        let req = UpdatePolicyRequest {
            old: policy("editor", "/posts", "GET"),
            new: policy("editor", "posts", "GET"),
        };
        let errors = req.validate_request().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "new.resource");
    }
}
