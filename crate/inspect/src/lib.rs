//! Lists the private keys stored on the initialized tokens of a PKCS#11 module.
//!
//! The module is loaded with [`HsmLib::load`] and handed to
//! [`inspect_tokens`], which walks the token slots, logs in with the user PIN
//! and prints the type, identifier and label of every private key.

#![allow(non_snake_case)]

mod attributes;
mod config;
mod driver;
mod error;
mod hsm_lib;
mod inspect;
mod provider;
mod report;
mod session;

pub use attributes::{Attribute, PRIVATE_KEY_ATTRIBUTES};
pub use config::{
    DEFAULT_USER_PIN, InspectConfig, LIBRARY_PATH_ENV, SOFTHSM2_PKCS11_LIB, USER_PIN_ENV,
};
pub use driver::Pkcs11Driver;
pub use error::{HError, HResult, ProviderResult, ReturnValue};
pub use hsm_lib::HsmLib;
pub use inspect::inspect_tokens;
pub use provider::{
    ModuleInfo, ObjectHandle, Provider, SessionHandle, SlotDescriptor, SlotId, SlotInfo,
    TokenInfo,
};
pub use report::Report;
pub use session::{FIND_OBJECTS_BATCH_SIZE, ObjectSearch, Session};

#[cfg(test)]
mod tests;
