use axum::{
    extract::{FromRequest, Request},
    Json,
};
use press_core::error::{AppError, FieldError};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// Per-request validation yielding one `{field, rule, message}` per failed rule.
pub trait ValidateRequest {
    fn validate_request(&self) -> Result<(), Vec<FieldError>>;
}

impl<T: Validate> ValidateRequest for T {
    fn validate_request(&self) -> Result<(), Vec<FieldError>> {
        self.validate().map_err(|e| field_errors(&e))
    }
}

/// Flatten validator output, sorted by field so responses are stable.
/// Nested structs report dotted paths such as `new.resource`.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect(errors, "", &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.rule.cmp(&b.rule)));
    out
}

fn collect(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", path));
                    out.push(FieldError::new(path.clone(), e.code.to_string(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect(nested, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect(nested, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + ValidateRequest + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid JSON body: {}", e)))?;

        value.validate_request().map_err(AppError::ValidationError)?;

        Ok(ValidatedJson(value))
    }
}

fn rule_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// Letters, digits, `_`, `-` and `.`; 3 to 32 characters.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(rule_error(
            "length",
            "Username must be between 3 and 32 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(rule_error(
            "charset",
            "Username may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    Ok(())
}

/// At least 8 characters with one letter and one digit.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if len < 8 {
        return Err(rule_error(
            "length",
            "Password must be at least 8 characters",
        ));
    }
    if len > 128 {
        return Err(rule_error(
            "length",
            "Password must be at most 128 characters",
        ));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err(rule_error(
            "strength",
            "Password must contain at least one letter and one number",
        ));
    }
    Ok(())
}

/// E.164: `+` followed by 7 to 15 digits.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = match phone.strip_prefix('+') {
        Some(rest) => rest,
        None => return Err(rule_error("phone", "Phone must be in E.164 format")),
    };
    if !(7..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(rule_error("phone", "Phone must be in E.164 format"));
    }
    Ok(())
}

/// Lowercase letters, digits, `_` and `-`; 1 to 64 characters.
pub fn validate_role_name(role: &str) -> Result<(), ValidationError> {
    if role.is_empty() || role.len() > 64 {
        return Err(rule_error("length", "Role must be between 1 and 64 characters"));
    }
    if !role
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
    {
        return Err(rule_error(
            "charset",
            "Role may only contain lowercase letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// `*` or an absolute path of at most 256 characters.
pub fn validate_resource(resource: &str) -> Result<(), ValidationError> {
    if resource == "*" {
        return Ok(());
    }
    if !resource.starts_with('/') || resource.len() > 256 {
        return Err(rule_error(
            "resource",
            "Resource must be '*' or a path starting with '/'",
        ));
    }
    if resource.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(rule_error("resource", "Resource must not contain whitespace"));
    }
    Ok(())
}

/// `*` or an HTTP method name.
pub fn validate_action(action: &str) -> Result<(), ValidationError> {
    if action == "*" {
        return Ok(());
    }
    if action.is_empty() || action.len() > 16 || !action.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(rule_error("action", "Action must be '*' or an HTTP method"));
    }
    Ok(())
}
