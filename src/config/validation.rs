//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - An empty bind address is left to the listener, which reports it as
//!   address-not-configured

use crate::config::schema::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.name must not be empty")]
    EmptyListenerName,
    #[error("listener.bind_address {0:?} is not host:port")]
    BindAddress(String),
    #[error("listener.tls.{0} must not be empty")]
    TlsPath(&'static str),
    #[error("timeouts.request_secs must be greater than zero")]
    ZeroTimeout,
    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Every violation found in one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn validate_config(config: &ServiceConfig) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if config.listener.name.trim().is_empty() {
        errors.push(ValidationError::EmptyListenerName);
    }

    let bind = config.listener.bind_address.trim();
    if !bind.is_empty() && !looks_like_host_port(bind) {
        errors.push(ValidationError::BindAddress(bind.to_string()));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::TlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::TlsPath("key_path"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    let metrics = &config.observability;
    if metrics.metrics_enabled && metrics.metrics_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(metrics.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn looks_like_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.ends_with(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServiceConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServiceConfig::default();
        config.listener.name = " ".into();
        config.listener.bind_address = "invalid::addr".into();
        config.listener.tls = Some(TlsConfig { cert_path: String::new(), key_path: "k.pem".into() });
        config.timeouts.request_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors.0,
            vec![
                ValidationError::EmptyListenerName,
                ValidationError::BindAddress("invalid::addr".into()),
                ValidationError::TlsPath("cert_path"),
                ValidationError::ZeroTimeout,
            ]
        );
        assert!(errors.to_string().starts_with("Validation failed: listener.name"));
    }

    #[test]
    fn accepts_port_only_shorthand() {
        let mut config = ServiceConfig::default();
        config.listener.bind_address = ":9999".into();
        assert!(validate_config(&config).is_ok());
        config.listener.bind_address = "[::1]:9999".into();
        assert!(validate_config(&config).is_ok());
    }
}
