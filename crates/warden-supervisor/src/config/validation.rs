use super::*;
use anyhow::{anyhow, Result};
use std::collections::HashSet;

/// Validate the complete configuration
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    validate_service_name(&config.service_name)?;

    if config.executable.as_os_str().is_empty() {
        return Err(anyhow!("Executable path cannot be empty"));
    }

    validate_env(&config.env, "service")?;

    if config.stop_timeout.is_zero() {
        return Err(anyhow!("Stop timeout must be greater than 0"));
    }

    if config.rotation.enable_rotation && config.rotation.rotation_size_bytes == 0 {
        return Err(anyhow!("Rotation size must be greater than 0 when rotation is enabled"));
    }

    validate_health_config(&config.health)?;

    for kind in [
        HookKind::PreLaunch,
        HookKind::PostLaunch,
        HookKind::PreStop,
        HookKind::PostStop,
    ] {
        if let Some(hook) = config.hook(kind) {
            validate_hook_config(kind, hook)?;
        }
    }

    if let Some(ref failure) = config.failure_program {
        if failure.path.as_os_str().is_empty() {
            return Err(anyhow!("Failure program path cannot be empty"));
        }
        if failure.timeout.is_zero() {
            return Err(anyhow!("Failure program timeout must be greater than 0"));
        }
    }

    Ok(())
}

fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("Service name cannot be empty"));
    }

    if name.len() > 64 {
        return Err(anyhow!("Service name too long (max 64 characters): {}", name));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(anyhow!(
            "Service name can only contain alphanumeric characters, dots, hyphens, and underscores: {}",
            name
        ));
    }

    Ok(())
}

fn validate_env(env: &[EnvVar], owner: &str) -> Result<()> {
    let mut names = HashSet::new();
    for var in env {
        if var.name.is_empty() || var.name.contains('=') {
            return Err(anyhow!("Invalid {} environment variable name: '{}'", owner, var.name));
        }
        if !names.insert(var.name.as_str()) {
            return Err(anyhow!("Duplicate {} environment variable: {}", owner, var.name));
        }
    }
    Ok(())
}

fn validate_health_config(health: &HealthConfig) -> Result<()> {
    if !health.enable_health_monitoring {
        return Ok(());
    }

    if health.heartbeat_interval.is_zero() {
        return Err(anyhow!("Heartbeat interval must be greater than 0"));
    }

    if health.max_failed_checks == 0 {
        return Err(anyhow!("Max failed checks must be greater than 0"));
    }

    Ok(())
}

fn validate_hook_config(kind: HookKind, hook: &HookConfig) -> Result<()> {
    if hook.path.as_os_str().is_empty() {
        return Err(anyhow!("{} hook path cannot be empty", kind));
    }

    if hook.timeout.is_zero() {
        return Err(anyhow!("{} hook timeout must be greater than 0", kind));
    }

    validate_env(&hook.env, &format!("{} hook", kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SupervisorConfig {
        SupervisorConfig::new("svc", "/usr/bin/svc")
    }

    #[test]
    fn test_base_config_is_valid() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn test_rejects_bad_service_names() {
        for name in ["", "has space", "slash/name"] {
            let mut config = base();
            config.service_name = name.to_string();
            assert!(validate_config(&config).is_err(), "accepted {:?}", name);
        }
    }

    #[test]
    fn test_rejects_duplicate_env_names() {
        let mut config = base();
        config.env = vec![
            EnvVar { name: "A".into(), value: "1".into() },
            EnvVar { name: "A".into(), value: "2".into() },
        ];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_health_checked_only_when_enabled() {
        let mut config = base();
        config.health.max_failed_checks = 0;
        assert!(validate_config(&config).is_ok());

        config.health.enable_health_monitoring = true;
        assert!(validate_config(&config).is_err());

        config.health.max_failed_checks = 1;
        config.health.heartbeat_interval = Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_hook_timeout() {
        let mut config = base();
        config.hooks.pre_stop = Some(HookConfig {
            path: "/usr/bin/drain".into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            timeout: Duration::ZERO,
            retry_attempts: 0,
            ignore_failure: false,
        });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("pre-stop"));
    }
}
