//! URL template parsing and parameter binding.
//!
//! Templates use axum 0.8 `{name}` segments; the legacy `:name` form is
//! accepted and normalized so definitions written against older routers keep
//! working. Binding is textual: scalar values are interpolated via their
//! display form and no percent-encoding is applied, so values containing
//! reserved URL characters pass through as-is.

use serde_json::Value;

use crate::error::ApiError;
use crate::route::PathParams;

/// Convert legacy `:name` path segments to axum 0.8 `{name}` segments.
///
/// Segments already in `{name}` form and literal segments are left untouched.
///
/// # Examples
///
/// ```
/// # use loopcall::normalize_path;
/// assert_eq!(normalize_path("/echo/:id"), "/echo/{id}");
/// assert_eq!(normalize_path("/echo/{id}"), "/echo/{id}");
/// assert_eq!(normalize_path("/plain"), "/plain");
/// ```
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| match seg.strip_prefix(':') {
            Some(name) if !name.is_empty() => format!("{{{name}}}"),
            _ => seg.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Names of all `{name}` segments, in order of appearance.
pub fn param_names(template: &str) -> Vec<&str> {
    template
        .split('/')
        .filter_map(|seg| {
            seg.strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .filter(|name| !name.is_empty())
        })
        .collect()
}

/// True iff the template contains at least one `{name}` segment.
pub fn has_params(template: &str) -> bool {
    !param_names(template).is_empty()
}

/// Registration-time template validation: must be absolute, parameter names
/// must be unique.
pub fn validate(template: &str) -> Result<(), ApiError> {
    if !template.starts_with('/') {
        return Err(ApiError::InvalidTemplate {
            template: template.to_string(),
            reason: "must start with '/'".to_string(),
        });
    }
    let names = param_names(template);
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(ApiError::DuplicateParam {
                name: (*name).to_string(),
                template: template.to_string(),
            });
        }
    }
    Ok(())
}

/// Substitute every `{name}` segment with `params[name]`.
///
/// Fails with [`ApiError::MissingParam`] when any named segment has no
/// corresponding key, or the value is `null`, an empty string, or a
/// non-scalar. The whole binding is checked before anything is substituted,
/// so a failure never yields a partially substituted URL.
pub fn apply_params(template: &str, params: &PathParams) -> Result<String, ApiError> {
    let names = param_names(template);
    let mut bound = Vec::with_capacity(names.len());
    for name in &names {
        match params.get(*name).and_then(scalar_to_string) {
            Some(value) => bound.push((*name, value)),
            None => {
                return Err(ApiError::MissingParam {
                    name: (*name).to_string(),
                    template: template.to_string(),
                })
            }
        }
    }

    let url = template
        .split('/')
        .map(|seg| {
            match seg
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .and_then(|name| bound.iter().find(|(n, _)| *n == name))
            {
                Some((_, value)) => value.clone(),
                None => seg.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    Ok(url)
}

/// Display form of a scalar JSON value; `None` for anything unbindable
/// (null, empty string, arrays, objects).
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
