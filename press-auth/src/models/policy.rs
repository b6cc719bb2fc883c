//! RBAC policy model.
//!
//! Policies grant `(role, resource, action)` optionally scoped to a domain.
//! Role assignments bind a subject to a role, again optionally scoped. Both are
//! persisted as `policy_rules(ptype, v0..v5)` rows: `p` for policies and `g`
//! for assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Matches any resource or any action when used as the whole field.
pub const WILDCARD: &str = "*";

pub const POLICY_PTYPE: &str = "p";
pub const ASSIGNMENT_PTYPE: &str = "g";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    pub role: String,
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Policy {
    pub fn new(
        role: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            action: action.into(),
            domain: None,
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Canonical form: parameter segments stripped from the resource, action
    /// upper-cased, empty domain treated as global.
    pub fn normalized(&self) -> Self {
        Self {
            role: self.role.trim().to_string(),
            resource: normalize_resource(&self.resource),
            action: normalize_action(&self.action),
            domain: normalize_domain(self.domain.as_deref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct RoleAssignment {
    pub subject_id: Uuid,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl RoleAssignment {
    pub fn new(subject_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            subject_id,
            role: role.into(),
            domain: None,
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn normalized(&self) -> Self {
        Self {
            subject_id: self.subject_id,
            role: self.role.trim().to_string(),
            domain: normalize_domain(self.domain.as_deref()),
        }
    }
}

/// One row of the policy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyRule {
    Policy(Policy),
    RoleAssignment(RoleAssignment),
}

impl PolicyRule {
    pub fn ptype(&self) -> &'static str {
        match self {
            PolicyRule::Policy(_) => POLICY_PTYPE,
            PolicyRule::RoleAssignment(_) => ASSIGNMENT_PTYPE,
        }
    }

    pub fn role(&self) -> &str {
        match self {
            PolicyRule::Policy(p) => &p.role,
            PolicyRule::RoleAssignment(a) => &a.role,
        }
    }

    pub fn normalized(&self) -> Self {
        match self {
            PolicyRule::Policy(p) => PolicyRule::Policy(p.normalized()),
            PolicyRule::RoleAssignment(a) => PolicyRule::RoleAssignment(a.normalized()),
        }
    }

    /// Positional `v0..v5` values. Unused trailing columns are empty.
    pub fn to_values(&self) -> [String; 6] {
        match self {
            PolicyRule::Policy(p) => [
                p.role.clone(),
                p.resource.clone(),
                p.action.clone(),
                p.domain.clone().unwrap_or_default(),
                String::new(),
                String::new(),
            ],
            PolicyRule::RoleAssignment(a) => [
                a.subject_id.to_string(),
                a.role.clone(),
                a.domain.clone().unwrap_or_default(),
                String::new(),
                String::new(),
                String::new(),
            ],
        }
    }

    pub fn from_values(ptype: &str, values: &[String]) -> Result<Self, String> {
        let field = |i: usize| values.get(i).map(String::as_str).unwrap_or("");

        match ptype {
            POLICY_PTYPE => {
                if field(0).is_empty() || field(1).is_empty() || field(2).is_empty() {
                    return Err(format!("incomplete policy row: {:?}", values));
                }
                Ok(PolicyRule::Policy(Policy {
                    role: field(0).to_string(),
                    resource: field(1).to_string(),
                    action: field(2).to_string(),
                    domain: normalize_domain(Some(field(3))),
                }))
            }
            ASSIGNMENT_PTYPE => {
                let subject_id = Uuid::parse_str(field(0))
                    .map_err(|e| format!("invalid subject id {:?}: {}", field(0), e))?;
                if field(1).is_empty() {
                    return Err(format!("assignment without role: {:?}", values));
                }
                Ok(PolicyRule::RoleAssignment(RoleAssignment {
                    subject_id,
                    role: field(1).to_string(),
                    domain: normalize_domain(Some(field(2))),
                }))
            }
            other => Err(format!("unknown ptype {:?}", other)),
        }
    }
}

impl From<Policy> for PolicyRule {
    fn from(p: Policy) -> Self {
        PolicyRule::Policy(p)
    }
}

impl From<RoleAssignment> for PolicyRule {
    fn from(a: RoleAssignment) -> Self {
        PolicyRule::RoleAssignment(a)
    }
}

/// Partial match over rules, used for cascading bulk removal.
/// `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleFilter {
    Policies {
        role: Option<String>,
        resource: Option<String>,
        action: Option<String>,
        domain: Option<String>,
    },
    Assignments {
        subject_id: Option<Uuid>,
        role: Option<String>,
        domain: Option<String>,
    },
}

impl RuleFilter {
    pub fn policies_for_role(role: impl Into<String>) -> Self {
        RuleFilter::Policies {
            role: Some(role.into()),
            resource: None,
            action: None,
            domain: None,
        }
    }

    pub fn assignments_for_role(role: impl Into<String>) -> Self {
        RuleFilter::Assignments {
            subject_id: None,
            role: Some(role.into()),
            domain: None,
        }
    }

    pub fn assignments_for_subject(subject_id: Uuid) -> Self {
        RuleFilter::Assignments {
            subject_id: Some(subject_id),
            role: None,
            domain: None,
        }
    }

    pub fn ptype(&self) -> &'static str {
        match self {
            RuleFilter::Policies { .. } => POLICY_PTYPE,
            RuleFilter::Assignments { .. } => ASSIGNMENT_PTYPE,
        }
    }

    /// `(column index, value)` pairs that must all match.
    pub fn constraints(&self) -> Vec<(usize, String)> {
        let mut out = Vec::new();
        match self {
            RuleFilter::Policies {
                role,
                resource,
                action,
                domain,
            } => {
                if let Some(role) = role {
                    out.push((0, role.clone()));
                }
                if let Some(resource) = resource {
                    out.push((1, normalize_resource(resource)));
                }
                if let Some(action) = action {
                    out.push((2, normalize_action(action)));
                }
                if let Some(domain) = domain {
                    out.push((3, domain.clone()));
                }
            }
            RuleFilter::Assignments {
                subject_id,
                role,
                domain,
            } => {
                if let Some(subject_id) = subject_id {
                    out.push((0, subject_id.to_string()));
                }
                if let Some(role) = role {
                    out.push((1, role.clone()));
                }
                if let Some(domain) = domain {
                    out.push((2, domain.clone()));
                }
            }
        }
        out
    }

    pub fn matches(&self, rule: &PolicyRule) -> bool {
        if rule.ptype() != self.ptype() {
            return false;
        }
        let values = rule.to_values();
        self.constraints()
            .iter()
            .all(|(index, value)| values[*index] == *value)
    }
}

/// Rule counts by role, by subject and in total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PolicyStats {
    pub total_rules: u64,
    pub total_policies: u64,
    pub total_assignments: u64,
    pub policies_by_role: BTreeMap<String, u64>,
    pub assignments_by_role: BTreeMap<String, u64>,
    pub assignments_by_subject: BTreeMap<String, u64>,
}

impl PolicyStats {
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a PolicyRule>) -> Self {
        let mut stats = PolicyStats::default();
        for rule in rules {
            stats.total_rules += 1;
            match rule {
                PolicyRule::Policy(p) => {
                    stats.total_policies += 1;
                    *stats.policies_by_role.entry(p.role.clone()).or_default() += 1;
                }
                PolicyRule::RoleAssignment(a) => {
                    stats.total_assignments += 1;
                    *stats.assignments_by_role.entry(a.role.clone()).or_default() += 1;
                    *stats
                        .assignments_by_subject
                        .entry(a.subject_id.to_string())
                        .or_default() += 1;
                }
            }
        }
        stats
    }
}

/// Full copy of the policy store, as produced by backup and accepted by restore.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PolicySnapshot {
    pub taken_utc: DateTime<Utc>,
    pub policies: Vec<Policy>,
    pub assignments: Vec<RoleAssignment>,
}

impl PolicySnapshot {
    pub fn from_rules(rules: Vec<PolicyRule>, taken_utc: DateTime<Utc>) -> Self {
        let mut policies = Vec::new();
        let mut assignments = Vec::new();
        for rule in rules {
            match rule {
                PolicyRule::Policy(p) => policies.push(p),
                PolicyRule::RoleAssignment(a) => assignments.push(a),
            }
        }
        policies.sort();
        assignments.sort();
        Self {
            taken_utc,
            policies,
            assignments,
        }
    }

    pub fn into_rules(self) -> Vec<PolicyRule> {
        self.policies
            .into_iter()
            .map(PolicyRule::Policy)
            .chain(self.assignments.into_iter().map(PolicyRule::RoleAssignment))
            .collect()
    }
}

/// Strip path parameters so `/users/:id/roles` and `/users/{id}/roles` both
/// become `/users/roles`. The bare wildcard is kept as is.
pub fn normalize_resource(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed == WILDCARD {
        return WILDCARD.to_string();
    }

    let segments: Vec<&str> = trimmed
        .split('/')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !segment.starts_with(':'))
        .filter(|segment| !(segment.starts_with('{') && segment.ends_with('}')))
        .collect();

    format!("/{}", segments.join("/"))
}

pub fn normalize_action(action: &str) -> String {
    action.trim().to_ascii_uppercase()
}

fn normalize_domain(domain: Option<&str>) -> Option<String> {
    domain
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}
