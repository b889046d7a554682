use std::{
    fmt::{self, Debug, Formatter},
    path::PathBuf,
};

use zeroize::Zeroizing;

/// Path of the SoftHSM2 module on Debian based distributions
pub const SOFTHSM2_PKCS11_LIB: &str = "/usr/lib/x86_64-linux-gnu/softhsm/libsofthsm2.so";
pub const DEFAULT_USER_PIN: &str = "1234";

/// Overrides [`SOFTHSM2_PKCS11_LIB`]
pub const LIBRARY_PATH_ENV: &str = "SOFTHSM2_LIBRARY_PATH";
/// Overrides [`DEFAULT_USER_PIN`]
pub const USER_PIN_ENV: &str = "SOFTHSM2_USER_PIN";

/// Run configuration, read once at start-up.
#[derive(Clone)]
pub struct InspectConfig {
    /// The PKCS#11 shared library to load
    pub module_path: PathBuf,
    /// The PIN of the user role, used on every token
    pub user_pin: Zeroizing<String>,
}

impl InspectConfig {
    /// Build the configuration from the process environment.
    ///
    /// An unset or empty variable falls back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());
        Self {
            module_path: non_empty(LIBRARY_PATH_ENV)
                .map_or_else(|| PathBuf::from(SOFTHSM2_PKCS11_LIB), PathBuf::from),
            user_pin: Zeroizing::new(
                non_empty(USER_PIN_ENV).unwrap_or_else(|| DEFAULT_USER_PIN.to_owned()),
            ),
        }
    }
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Debug for InspectConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InspectConfig")
            .field("module_path", &self.module_path)
            .field("user_pin", &"********")
            .finish()
    }
}
