use pkcs11_inspect_logger::{debug, warn};

use crate::{
    HError, HResult,
    error::ProviderResultExt,
    provider::{ModuleInfo, Provider, SlotDescriptor, SlotId},
    session::Session,
};

/// An initialized PKCS#11 module.
///
/// The driver owns the provider for the whole run. On drop it calls
/// `C_Finalize`, then the provider itself is dropped, which unloads the
/// module: teardown always happens in that order, whatever the exit path.
pub struct Pkcs11Driver<P: Provider> {
    provider: P,
    module: String,
}

impl<P: Provider> Pkcs11Driver<P> {
    /// Initialize the module. `module` names it in errors and logs.
    pub fn initialize(provider: P, module: impl Into<String>) -> HResult<Self> {
        let module = module.into();
        provider
            .initialize()
            .map_err(|rv| HError::Initialization {
                module: module.clone(),
                rv,
            })?;
        debug!("Initialized PKCS#11 module {module}");
        Ok(Self { provider, module })
    }

    pub fn module_info(&self) -> HResult<ModuleInfo> {
        self.provider.get_info().context("C_GetInfo")
    }

    /// The slots that currently hold a token, in provider order.
    pub fn token_slots(&self) -> HResult<Vec<SlotId>> {
        self.provider.get_slot_list(true).context("C_GetSlotList")
    }

    /// Combine the slot and token information of `slot_id`.
    pub fn describe_slot(&self, slot_id: SlotId) -> HResult<SlotDescriptor> {
        let slot = self
            .provider
            .get_slot_info(slot_id)
            .slot_context("C_GetSlotInfo", slot_id)?;
        let token = self
            .provider
            .get_token_info(slot_id)
            .slot_context("C_GetTokenInfo", slot_id)?;
        debug!(
            "Slot {slot_id} ({}): token {:?}, {} {} serial {}",
            slot.manufacturer, token.label, token.manufacturer, token.model, token.serial_number
        );
        Ok(SlotDescriptor {
            slot_id,
            slot,
            token,
        })
    }

    pub fn open_authenticated_session(
        &self,
        slot_id: SlotId,
        pin: &[u8],
    ) -> HResult<Session<'_, P>> {
        Session::open_authenticated(&self.provider, slot_id, pin)
    }
}

impl<P: Provider> Drop for Pkcs11Driver<P> {
    fn drop(&mut self) {
        match self.provider.finalize() {
            Ok(()) => debug!("Finalized PKCS#11 module {}", self.module),
            Err(rv) => warn!("C_Finalize failed for {}: {rv}", self.module),
        }
    }
}
