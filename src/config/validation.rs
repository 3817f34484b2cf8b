//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, IP literals)
//! - Reject empty metadata keys, malformed probe paths and unknown CORS methods
//!
//! Returns all validation errors, not just the first.

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::net::ServerInfo;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check `config`, collecting every problem rather than stopping at the first.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("server", &config.server, &mut errors);
    check_address("backend", &config.backend, &mut errors);

    if let Some(tls) = &config.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("tls.cert_path", "must not be empty"));
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("tls.key_path", "must not be empty"));
        }
    }

    for (i, rule) in config.metadata.iter().enumerate() {
        if rule.keys.is_empty() {
            errors.push(ValidationError::new(format!("metadata[{i}].keys"), "no keys given"));
        }
        if rule.keys.iter().any(|k| k.trim().is_empty()) {
            errors.push(ValidationError::new(
                format!("metadata[{i}].keys"),
                "keys must not be empty",
            ));
        }
    }

    if let Some(cors) = &config.cors {
        for method in &cors.allowed_methods {
            let method = method.trim();
            if method != "*" && method.to_ascii_uppercase().parse::<Method>().is_err() {
                errors.push(ValidationError::new(
                    "cors.allowed_methods",
                    format!("invalid method '{method}'"),
                ));
            }
        }
    }

    for (field, path) in [
        ("probes.health", &config.probes.health),
        ("probes.status", &config.probes.status),
    ] {
        if let Some(path) = path {
            if !path.starts_with('/') {
                errors.push(ValidationError::new(field, "path must start with '/'"));
            }
        }
    }

    if config.probes.health.is_some() && config.probes.health == config.probes.status {
        errors.push(ValidationError::new("probes", "health and status share a path"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(field: &str, info: &ServerInfo, errors: &mut Vec<ValidationError>) {
    if let Err(err) = info.validate() {
        errors.push(ValidationError::new(field, err.to_string()));
    }
}
