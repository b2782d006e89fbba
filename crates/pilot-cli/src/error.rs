use thiserror::Error;

pub const ENV_PREFIX: &str = "PILOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting, set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },
    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted settings key, e.g. `provider.api_key`
pub fn to_env_var(field: &str) -> String {
    let key = field.replace('.', "__").to_uppercase();
    format!("{}_{}", ENV_PREFIX, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "PILOT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("sampling.max_tokens"), "PILOT_SAMPLING__MAX_TOKENS");
        assert_eq!(to_env_var("provider"), "PILOT_PROVIDER");
    }

    #[test]
    fn test_missing_env_var_message() {
        let error = ConfigError::MissingEnvVar {
            env_var: to_env_var("provider.type"),
        };
        assert_eq!(
            error.to_string(),
            "Missing required setting, set the PILOT_PROVIDER__TYPE environment variable"
        );
    }
}
