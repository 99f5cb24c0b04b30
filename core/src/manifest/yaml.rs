use std::{
    env,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use dotenv::dotenv;
use regex::{Captures, Regex};
use tracing::error;

use crate::manifest::config::FastUpdateConfig;

/// Replaces every `${VAR}` with the value of the environment variable.
fn substitute_env_variables(contents: &str) -> Result<String, ReadConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;
    let mut missing = None;

    let result = re.replace_all(contents, |caps: &Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                error!("Environment variable {} not found", var_name);
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(ReadConfigError::MissingEnvVariable(var_name)),
        None => Ok(result.into_owned()),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReadConfigError {
    #[error("Could not open file: {0}")]
    CouldNotOpenFile(#[from] std::io::Error),

    #[error("Could not parse config: {0}")]
    CouldNotParseConfig(#[from] serde_yaml::Error),

    #[error("Could not substitute env variables: {0}")]
    CouldNotSubstituteEnvVariables(#[from] regex::Error),

    #[error("Environment variable {0} not found")]
    MissingEnvVariable(String),
}

impl FastUpdateConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, ReadConfigError> {
        let contents = substitute_env_variables(contents)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

/// Reads a config file, loading a `.env` next to it first when present.
pub fn read_config(file_path: &Path) -> Result<FastUpdateConfig, ReadConfigError> {
    let mut file = File::open(file_path)?;
    let mut contents = String::new();

    file.read_to_string(&mut contents)?;

    let env_path: Option<PathBuf> = file_path.parent().map(|parent| parent.join(".env"));
    match env_path {
        Some(path) if path.exists() => {
            dotenv::from_path(&path).ok();
        }
        _ => {
            dotenv().ok();
        }
    }

    FastUpdateConfig::from_yaml_str(&contents)
}
