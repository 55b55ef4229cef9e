//! Typed access to algorithm configuration keys.

use serde::de::DeserializeOwned;

use crate::error::{PfError, PfResult};
use calflow_env::AlgorithmConfig;

/// Reads a required key. Missing is `NotFound`; a value of the wrong shape
/// is `InvalidParameter`.
pub fn read_value<T: DeserializeOwned>(config: &AlgorithmConfig, key: &str) -> PfResult<T> {
    let value = config
        .parameter(key)
        .ok_or_else(|| PfError::not_found(format!("'{}' has no key '{}'", config.label(), key)))?;
    serde_json::from_value(value.clone()).map_err(|err| {
        PfError::invalid(format!("'{}' key '{}': {}", config.label(), key, err))
    })
}

/// Overwrites `target` if the key is present; a missing key keeps the default.
pub fn read_if_present<T: DeserializeOwned>(config: &AlgorithmConfig, key: &str, target: &mut T) -> PfResult<()> {
    match read_value(config, key) {
        Ok(value) => {
            *target = value;
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err),
    }
}
