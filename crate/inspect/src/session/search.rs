use std::collections::VecDeque;

use pkcs11_inspect_logger::{trace, warn};

use crate::{
    Attribute, HResult,
    error::ProviderResultExt,
    provider::{ObjectHandle, Provider, SessionHandle, SlotId},
};

/// Maximum number of handles requested per `C_FindObjects` call
pub const FIND_OBJECTS_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    Searching,
    /// an empty batch was returned, or a batch request failed
    Done,
    Finalized,
}

/// A single pass cursor over the objects matching a search template.
///
/// Handles are pulled from the module in batches of
/// [`FIND_OBJECTS_BATCH_SIZE`] and yielded one by one; an empty batch ends
/// the iteration. The cursor lives in the module, so it cannot be restarted.
///
/// `C_FindObjectsFinal` is called exactly once: by [`ObjectSearch::finish`],
/// or on drop when the search is abandoned.
pub struct ObjectSearch<'s, P: Provider> {
    provider: &'s P,
    session: SessionHandle,
    slot_id: SlotId,
    batch: VecDeque<ObjectHandle>,
    state: SearchState,
}

impl<'s, P: Provider> ObjectSearch<'s, P> {
    pub(crate) fn init(
        provider: &'s P,
        session: SessionHandle,
        slot_id: SlotId,
        template: &[Attribute],
    ) -> HResult<Self> {
        provider
            .find_objects_init(session, template)
            .slot_context("C_FindObjectsInit", slot_id)?;
        Ok(Self {
            provider,
            session,
            slot_id,
            batch: VecDeque::with_capacity(FIND_OBJECTS_BATCH_SIZE),
            state: SearchState::Searching,
        })
    }

    /// Terminate the search.
    pub fn finish(mut self) -> HResult<()> {
        self.state = SearchState::Finalized;
        self.provider
            .find_objects_final(self.session)
            .slot_context("C_FindObjectsFinal", self.slot_id)
    }

    fn next_batch(&mut self) -> HResult<()> {
        let handles = self
            .provider
            .find_objects(self.session, FIND_OBJECTS_BATCH_SIZE)
            .slot_context("C_FindObjects", self.slot_id)?;
        trace!("Found {} objects on slot {}", handles.len(), self.slot_id);
        if handles.is_empty() {
            self.state = SearchState::Done;
        }
        self.batch.extend(handles);
        Ok(())
    }
}

impl<P: Provider> Iterator for ObjectSearch<'_, P> {
    type Item = HResult<ObjectHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch.is_empty() && self.state == SearchState::Searching {
            if let Err(e) = self.next_batch() {
                self.state = SearchState::Done;
                return Some(Err(e));
            }
        }
        self.batch.pop_front().map(Ok)
    }
}

impl<P: Provider> Drop for ObjectSearch<'_, P> {
    fn drop(&mut self) {
        if self.state != SearchState::Finalized {
            if let Err(rv) = self.provider.find_objects_final(self.session) {
                warn!("C_FindObjectsFinal failed on slot {}: {rv}", self.slot_id);
            }
        }
    }
}
