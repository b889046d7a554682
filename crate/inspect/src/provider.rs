//! The PKCS#11 operations the inspector relies on.
//!
//! [`HsmLib`](crate::HsmLib) implements them on top of a dynamically loaded
//! module; tests implement them in process.

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_INFO, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID,
    CK_SLOT_INFO, CK_TOKEN_INFO, CK_USER_TYPE, CKF_TOKEN_INITIALIZED,
};

use crate::{Attribute, error::ProviderResult};

pub type SlotId = CK_SLOT_ID;
pub type SessionHandle = CK_SESSION_HANDLE;
pub type ObjectHandle = CK_OBJECT_HANDLE;

/// A loaded PKCS#11 module.
///
/// Methods map one to one to the `C_*` functions of the same name. Errors are
/// the raw return value; callers add the context.
/// Dropping the provider unloads the module.
pub trait Provider {
    fn initialize(&self) -> ProviderResult<()>;

    fn finalize(&self) -> ProviderResult<()>;

    fn get_info(&self) -> ProviderResult<ModuleInfo>;

    /// Slot identifiers in provider order. With `token_present`, only the
    /// slots holding a token are returned.
    fn get_slot_list(&self, token_present: bool) -> ProviderResult<Vec<SlotId>>;

    fn get_slot_info(&self, slot_id: SlotId) -> ProviderResult<SlotInfo>;

    fn get_token_info(&self, slot_id: SlotId) -> ProviderResult<TokenInfo>;

    fn open_session(&self, slot_id: SlotId, flags: CK_FLAGS) -> ProviderResult<SessionHandle>;

    fn close_session(&self, session: SessionHandle) -> ProviderResult<()>;

    fn login(&self, session: SessionHandle, user_type: CK_USER_TYPE, pin: &[u8])
    -> ProviderResult<()>;

    fn logout(&self, session: SessionHandle) -> ProviderResult<()>;

    fn find_objects_init(&self, session: SessionHandle, template: &[Attribute])
    -> ProviderResult<()>;

    /// At most `max_object_count` handles; an empty batch ends the search.
    fn find_objects(
        &self,
        session: SessionHandle,
        max_object_count: usize,
    ) -> ProviderResult<Vec<ObjectHandle>>;

    fn find_objects_final(&self, session: SessionHandle) -> ProviderResult<()>;

    /// The values of `attribute_types`, in the requested order.
    fn get_attribute_value(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        attribute_types: &[CK_ATTRIBUTE_TYPE],
    ) -> ProviderResult<Vec<Attribute>>;
}

/// Library level information returned by `C_GetInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub cryptoki_version: (u8, u8),
    pub manufacturer: String,
    pub description: String,
    pub library_version: (u8, u8),
}

impl From<CK_INFO> for ModuleInfo {
    fn from(info: CK_INFO) -> Self {
        Self {
            cryptoki_version: (info.cryptokiVersion.major, info.cryptokiVersion.minor),
            manufacturer: padded_string(&info.manufacturerID),
            description: padded_string(&info.libraryDescription),
            library_version: (info.libraryVersion.major, info.libraryVersion.minor),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotInfo {
    pub description: String,
    pub manufacturer: String,
}

impl From<CK_SLOT_INFO> for SlotInfo {
    fn from(info: CK_SLOT_INFO) -> Self {
        Self {
            description: padded_string(&info.slotDescription),
            manufacturer: padded_string(&info.manufacturerID),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub flags: CK_FLAGS,
}

impl From<CK_TOKEN_INFO> for TokenInfo {
    fn from(info: CK_TOKEN_INFO) -> Self {
        Self {
            label: padded_string(&info.label),
            manufacturer: padded_string(&info.manufacturerID),
            model: padded_string(&info.model),
            serial_number: padded_string(&info.serialNumber),
            flags: info.flags,
        }
    }
}

/// Everything the report needs to know about one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub slot_id: SlotId,
    pub slot: SlotInfo,
    pub token: TokenInfo,
}

impl SlotDescriptor {
    #[must_use]
    pub const fn token_initialized(&self) -> bool {
        self.token.flags & CKF_TOKEN_INITIALIZED != 0
    }
}

/// PKCS#11 strings are fixed width, blank padded and not NUL terminated.
fn padded_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim_end_matches(' ')
        .to_owned()
}
