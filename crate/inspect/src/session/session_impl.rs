//! An authenticated session with one token.
//!
//! The session is opened read-write and logged in as the normal user. It is
//! released on drop: logout first (only if the login went through), then
//! close. Releasing never fails the run, errors are logged.

use pkcs11_inspect_logger::{debug, warn};
use pkcs11_sys::{CKA_CLASS, CKF_RW_SESSION, CKF_SERIAL_SESSION, CKO_PRIVATE_KEY, CKU_USER};

use crate::{
    Attribute, HResult, PRIVATE_KEY_ATTRIBUTES,
    error::ProviderResultExt,
    provider::{ObjectHandle, Provider, SessionHandle, SlotId},
    session::ObjectSearch,
};

pub struct Session<'a, P: Provider> {
    provider: &'a P,
    slot_id: SlotId,
    handle: SessionHandle,
    logged_in: bool,
}

impl<'a, P: Provider> Session<'a, P> {
    /// Open a read-write session on `slot_id` and log the user in.
    ///
    /// A wrong PIN, a locked PIN or a missing token all surface the same way,
    /// as a `C_Login` failure carrying the provider return value.
    pub(crate) fn open_authenticated(
        provider: &'a P,
        slot_id: SlotId,
        pin: &[u8],
    ) -> HResult<Self> {
        let handle = provider
            .open_session(slot_id, CKF_SERIAL_SESSION | CKF_RW_SESSION)
            .slot_context("C_OpenSession", slot_id)?;
        let mut session = Self {
            provider,
            slot_id,
            handle,
            logged_in: false,
        };
        debug!("Opened session {handle} on slot {slot_id}");
        // on failure the session is dropped here, which closes it
        provider
            .login(handle, CKU_USER, pin)
            .slot_context("C_Login", slot_id)?;
        session.logged_in = true;
        Ok(session)
    }

    #[must_use]
    pub const fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Start a search for the private keys of the token.
    pub fn find_private_keys(&self) -> HResult<ObjectSearch<'_, P>> {
        let template = [Attribute::from_ulong(CKA_CLASS, CKO_PRIVATE_KEY)];
        ObjectSearch::init(self.provider, self.handle, self.slot_id, &template)
    }

    /// Fetch the key type, identifier and label of `object`.
    pub fn get_attributes(&self, object: ObjectHandle) -> HResult<Vec<Attribute>> {
        self.provider
            .get_attribute_value(self.handle, object, &PRIVATE_KEY_ATTRIBUTES)
            .slot_context("C_GetAttributeValue", self.slot_id)
    }
}

impl<P: Provider> Drop for Session<'_, P> {
    fn drop(&mut self) {
        if self.logged_in {
            if let Err(rv) = self.provider.logout(self.handle) {
                warn!("C_Logout failed on slot {}: {rv}", self.slot_id);
            }
        }
        if let Err(rv) = self.provider.close_session(self.handle) {
            warn!("C_CloseSession failed on slot {}: {rv}", self.slot_id);
        }
        debug!("Closed session {} on slot {}", self.handle, self.slot_id);
    }
}
