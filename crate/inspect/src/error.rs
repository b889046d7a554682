use std::fmt::{self, Display, Formatter};

use pkcs11_sys::*;
use thiserror::Error;

use crate::provider::SlotId;

pub type HResult<T> = Result<T, HError>;

/// Outcome of a PKCS#11 call that did not return `CKR_OK`.
pub type ProviderResult<T> = Result<T, ReturnValue>;

#[derive(Error, Debug)]
pub enum HError {
    #[error("failed to load the PKCS#11 module {path}: {source}")]
    ModuleLoad {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("failed to initialize {module}: {rv}")]
    Initialization { module: String, rv: ReturnValue },

    #[error("{operation} failed: {rv}")]
    Pkcs11 {
        operation: &'static str,
        rv: ReturnValue,
    },

    #[error("{operation} failed on slot {slot_id}: {rv}")]
    SlotOperation {
        operation: &'static str,
        slot_id: SlotId,
        rv: ReturnValue,
    },

    #[error("failed writing the report: {0}")]
    Report(#[from] std::io::Error),

    #[error("{0}")]
    Default(String),
}

/// A raw `CK_RV` returned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnValue(pub CK_RV);

impl ReturnValue {
    /// Symbolic name of the well known return values.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            CKR_OK => "CKR_OK",
            CKR_CANCEL => "CKR_CANCEL",
            CKR_HOST_MEMORY => "CKR_HOST_MEMORY",
            CKR_SLOT_ID_INVALID => "CKR_SLOT_ID_INVALID",
            CKR_GENERAL_ERROR => "CKR_GENERAL_ERROR",
            CKR_FUNCTION_FAILED => "CKR_FUNCTION_FAILED",
            CKR_ARGUMENTS_BAD => "CKR_ARGUMENTS_BAD",
            CKR_ATTRIBUTE_SENSITIVE => "CKR_ATTRIBUTE_SENSITIVE",
            CKR_ATTRIBUTE_TYPE_INVALID => "CKR_ATTRIBUTE_TYPE_INVALID",
            CKR_DEVICE_ERROR => "CKR_DEVICE_ERROR",
            CKR_DEVICE_MEMORY => "CKR_DEVICE_MEMORY",
            CKR_DEVICE_REMOVED => "CKR_DEVICE_REMOVED",
            CKR_FUNCTION_NOT_SUPPORTED => "CKR_FUNCTION_NOT_SUPPORTED",
            CKR_OBJECT_HANDLE_INVALID => "CKR_OBJECT_HANDLE_INVALID",
            CKR_OPERATION_ACTIVE => "CKR_OPERATION_ACTIVE",
            CKR_OPERATION_NOT_INITIALIZED => "CKR_OPERATION_NOT_INITIALIZED",
            CKR_PIN_INCORRECT => "CKR_PIN_INCORRECT",
            CKR_PIN_EXPIRED => "CKR_PIN_EXPIRED",
            CKR_PIN_LOCKED => "CKR_PIN_LOCKED",
            CKR_SESSION_CLOSED => "CKR_SESSION_CLOSED",
            CKR_SESSION_COUNT => "CKR_SESSION_COUNT",
            CKR_SESSION_HANDLE_INVALID => "CKR_SESSION_HANDLE_INVALID",
            CKR_SESSION_PARALLEL_NOT_SUPPORTED => "CKR_SESSION_PARALLEL_NOT_SUPPORTED",
            CKR_SESSION_READ_ONLY_EXISTS => "CKR_SESSION_READ_ONLY_EXISTS",
            CKR_TEMPLATE_INCOMPLETE => "CKR_TEMPLATE_INCOMPLETE",
            CKR_TEMPLATE_INCONSISTENT => "CKR_TEMPLATE_INCONSISTENT",
            CKR_TOKEN_NOT_PRESENT => "CKR_TOKEN_NOT_PRESENT",
            CKR_TOKEN_NOT_RECOGNIZED => "CKR_TOKEN_NOT_RECOGNIZED",
            CKR_TOKEN_WRITE_PROTECTED => "CKR_TOKEN_WRITE_PROTECTED",
            CKR_USER_ALREADY_LOGGED_IN => "CKR_USER_ALREADY_LOGGED_IN",
            CKR_USER_NOT_LOGGED_IN => "CKR_USER_NOT_LOGGED_IN",
            CKR_USER_PIN_NOT_INITIALIZED => "CKR_USER_PIN_NOT_INITIALIZED",
            CKR_USER_TYPE_INVALID => "CKR_USER_TYPE_INVALID",
            CKR_USER_ANOTHER_ALREADY_LOGGED_IN => "CKR_USER_ANOTHER_ALREADY_LOGGED_IN",
            CKR_BUFFER_TOO_SMALL => "CKR_BUFFER_TOO_SMALL",
            CKR_CRYPTOKI_NOT_INITIALIZED => "CKR_CRYPTOKI_NOT_INITIALIZED",
            CKR_CRYPTOKI_ALREADY_INITIALIZED => "CKR_CRYPTOKI_ALREADY_INITIALIZED",
            _ => return None,
        };
        Some(name)
    }
}

impl Display for ReturnValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:x})", self.0),
            None => write!(f, "unknown return value (0x{:x})", self.0),
        }
    }
}

/// Attach the failing operation (and slot) to a provider error.
pub(crate) trait ProviderResultExt<T> {
    fn context(self, operation: &'static str) -> HResult<T>;
    fn slot_context(self, operation: &'static str, slot_id: SlotId) -> HResult<T>;
}

impl<T> ProviderResultExt<T> for ProviderResult<T> {
    fn context(self, operation: &'static str) -> HResult<T> {
        self.map_err(|rv| HError::Pkcs11 { operation, rv })
    }

    fn slot_context(self, operation: &'static str, slot_id: SlotId) -> HResult<T> {
        self.map_err(|rv| HError::SlotOperation {
            operation,
            slot_id,
            rv,
        })
    }
}
