//! An in-process PKCS#11 module.
//!
//! `FakeModule` describes the slots, tokens and objects; `FakeModule::load`
//! returns a `FakeProvider` serving them, together with a journal of the
//! calls that succeeded. Unloading (dropping the provider) is journaled too,
//! so the journal can be inspected after a run consumed the provider.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use pkcs11_sys::*;

use crate::{
    Attribute, ModuleInfo, ObjectHandle, Provider, ProviderResult, ReturnValue, SessionHandle,
    SlotId, SlotInfo, TokenInfo,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Initialize,
    Finalize,
    GetInfo,
    GetSlotList,
    GetSlotInfo(SlotId),
    GetTokenInfo(SlotId),
    OpenSession(SlotId),
    CloseSession(SessionHandle),
    Login(SessionHandle),
    Logout(SessionHandle),
    FindObjectsInit(SessionHandle),
    FindObjects {
        session: SessionHandle,
        returned: usize,
    },
    FindObjectsFinal(SessionHandle),
    GetAttributeValue(ObjectHandle),
    Unload,
}

pub(crate) type Journal = Rc<RefCell<Vec<Call>>>;

#[derive(Debug, Clone)]
pub(crate) struct FakeObject {
    pub handle: ObjectHandle,
    pub attributes: Vec<Attribute>,
}

impl FakeObject {
    pub(crate) fn private_key(
        handle: ObjectHandle,
        key_type: &[u8],
        id: &[u8],
        label: &str,
    ) -> Self {
        Self::key(handle, CKO_PRIVATE_KEY, key_type, id, label)
    }

    pub(crate) fn public_key(
        handle: ObjectHandle,
        key_type: &[u8],
        id: &[u8],
        label: &str,
    ) -> Self {
        Self::key(handle, CKO_PUBLIC_KEY, key_type, id, label)
    }

    fn key(
        handle: ObjectHandle,
        class: CK_OBJECT_CLASS,
        key_type: &[u8],
        id: &[u8],
        label: &str,
    ) -> Self {
        Self {
            handle,
            attributes: vec![
                Attribute::from_ulong(CKA_CLASS, class),
                Attribute::new(CKA_KEY_TYPE, key_type.to_vec()),
                Attribute::new(CKA_ID, id.to_vec()),
                Attribute::new(CKA_LABEL, label.as_bytes().to_vec()),
            ],
        }
    }

    fn attribute(&self, attribute_type: CK_ATTRIBUTE_TYPE) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|attribute| attribute.attribute_type == attribute_type)
    }

    fn matches(&self, template: &[Attribute]) -> bool {
        template
            .iter()
            .all(|wanted| self.attribute(wanted.attribute_type) == Some(wanted))
    }

    fn is_private(&self) -> bool {
        self.matches(&[Attribute::from_ulong(CKA_CLASS, CKO_PRIVATE_KEY)])
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeSlot {
    pub slot_id: SlotId,
    pub description: String,
    pub label: String,
    pub initialized: bool,
    pub user_pin: String,
    pub objects: Vec<FakeObject>,
}

impl FakeSlot {
    pub(crate) fn new(slot_id: SlotId, label: &str) -> Self {
        Self {
            slot_id,
            description: format!("Fake slot {slot_id}"),
            label: label.to_owned(),
            initialized: true,
            user_pin: crate::DEFAULT_USER_PIN.to_owned(),
            objects: Vec::new(),
        }
    }

    pub(crate) fn uninitialized(mut self) -> Self {
        self.initialized = false;
        self
    }

    pub(crate) fn with_pin(mut self, user_pin: &str) -> Self {
        self.user_pin = user_pin.to_owned();
        self
    }

    pub(crate) fn with_objects(mut self, objects: Vec<FakeObject>) -> Self {
        self.objects.extend(objects);
        self
    }

    /// `count` private keys labelled `key-<n>`, with handles derived from the slot id
    pub(crate) fn with_private_keys(self, count: usize) -> Self {
        let slot_id = self.slot_id;
        let keys = (0..count)
            .map(|n| {
                let n_ulong = CK_ULONG::try_from(n).unwrap();
                FakeObject::private_key(
                    slot_id * 1000 + n_ulong,
                    &CKK_RSA.to_ne_bytes(),
                    &[0x10, u8::try_from(n).unwrap()],
                    &format!("key-{n}"),
                )
            })
            .collect();
        self.with_objects(keys)
    }
}

/// The static content of a fake module and the failures to inject.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeModule {
    slots: Vec<FakeSlot>,
    /// (function name, 1-based call number, return value)
    failures: Vec<(&'static str, usize, CK_RV)>,
}

impl FakeModule {
    pub(crate) fn new(slots: Vec<FakeSlot>) -> Self {
        Self {
            slots,
            failures: Vec::new(),
        }
    }

    /// Make the `nth` call to `function` return `rv`.
    pub(crate) fn fail(mut self, function: &'static str, nth: usize, rv: CK_RV) -> Self {
        self.failures.push((function, nth, rv));
        self
    }

    pub(crate) fn load(&self) -> (FakeProvider, Journal) {
        let journal = Journal::default();
        let provider = FakeProvider {
            module: self.clone(),
            journal: journal.clone(),
            initialized: Cell::new(false),
            call_counts: RefCell::new(HashMap::new()),
            sessions: RefCell::new(HashMap::new()),
            next_session: Cell::new(1),
        };
        (provider, journal)
    }
}

struct FakeSession {
    slot_index: usize,
    logged_in: bool,
    search: Option<VecDeque<ObjectHandle>>,
}

pub(crate) struct FakeProvider {
    module: FakeModule,
    journal: Journal,
    initialized: Cell<bool>,
    call_counts: RefCell<HashMap<&'static str, usize>>,
    sessions: RefCell<HashMap<SessionHandle, FakeSession>>,
    next_session: Cell<SessionHandle>,
}

impl FakeProvider {
    /// Count the call and apply the injected failure, if any.
    fn enter(&self, function: &'static str) -> ProviderResult<()> {
        let count = {
            let mut counts = self.call_counts.borrow_mut();
            let count = counts.entry(function).or_insert(0);
            *count += 1;
            *count
        };
        let injected = self
            .module
            .failures
            .iter()
            .find(|(name, nth, _)| *name == function && *nth == count);
        if let Some((_, _, rv)) = injected {
            return Err(ReturnValue(*rv));
        }
        if function != "C_Initialize" && !self.initialized.get() {
            return Err(ReturnValue(CKR_CRYPTOKI_NOT_INITIALIZED));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.journal.borrow_mut().push(call);
    }

    fn slot_index(&self, slot_id: SlotId) -> ProviderResult<usize> {
        self.module
            .slots
            .iter()
            .position(|slot| slot.slot_id == slot_id)
            .ok_or(ReturnValue(CKR_SLOT_ID_INVALID))
    }

    fn with_session<T>(
        &self,
        session: SessionHandle,
        f: impl FnOnce(&FakeSlot, &mut FakeSession) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        let mut sessions = self.sessions.borrow_mut();
        let state = sessions
            .get_mut(&session)
            .ok_or(ReturnValue(CKR_SESSION_HANDLE_INVALID))?;
        f(&self.module.slots[state.slot_index], state)
    }
}

impl Provider for FakeProvider {
    fn initialize(&self) -> ProviderResult<()> {
        self.enter("C_Initialize")?;
        if self.initialized.replace(true) {
            return Err(ReturnValue(CKR_CRYPTOKI_ALREADY_INITIALIZED));
        }
        self.record(Call::Initialize);
        Ok(())
    }

    fn finalize(&self) -> ProviderResult<()> {
        self.enter("C_Finalize")?;
        self.initialized.set(false);
        self.sessions.borrow_mut().clear();
        self.record(Call::Finalize);
        Ok(())
    }

    fn get_info(&self) -> ProviderResult<ModuleInfo> {
        self.enter("C_GetInfo")?;
        self.record(Call::GetInfo);
        Ok(ModuleInfo {
            cryptoki_version: (2, 40),
            manufacturer: "Fake".to_owned(),
            description: "Fake PKCS#11 module".to_owned(),
            library_version: (1, 0),
        })
    }

    fn get_slot_list(&self, _token_present: bool) -> ProviderResult<Vec<SlotId>> {
        self.enter("C_GetSlotList")?;
        self.record(Call::GetSlotList);
        Ok(self.module.slots.iter().map(|slot| slot.slot_id).collect())
    }

    fn get_slot_info(&self, slot_id: SlotId) -> ProviderResult<SlotInfo> {
        self.enter("C_GetSlotInfo")?;
        let slot = &self.module.slots[self.slot_index(slot_id)?];
        self.record(Call::GetSlotInfo(slot_id));
        Ok(SlotInfo {
            description: slot.description.clone(),
            manufacturer: "Fake".to_owned(),
        })
    }

    fn get_token_info(&self, slot_id: SlotId) -> ProviderResult<TokenInfo> {
        self.enter("C_GetTokenInfo")?;
        let slot = &self.module.slots[self.slot_index(slot_id)?];
        self.record(Call::GetTokenInfo(slot_id));
        let mut flags = CKF_LOGIN_REQUIRED;
        if slot.initialized {
            flags |= CKF_TOKEN_INITIALIZED | CKF_USER_PIN_INITIALIZED;
        }
        Ok(TokenInfo {
            label: slot.label.clone(),
            manufacturer: "Fake".to_owned(),
            model: "Fake token".to_owned(),
            serial_number: format!("{slot_id:016x}"),
            flags,
        })
    }

    fn open_session(&self, slot_id: SlotId, flags: CK_FLAGS) -> ProviderResult<SessionHandle> {
        self.enter("C_OpenSession")?;
        let slot_index = self.slot_index(slot_id)?;
        if flags & CKF_SERIAL_SESSION == 0 {
            return Err(ReturnValue(CKR_SESSION_PARALLEL_NOT_SUPPORTED));
        }
        if !self.module.slots[slot_index].initialized {
            return Err(ReturnValue(CKR_TOKEN_NOT_RECOGNIZED));
        }
        let session = self.next_session.get();
        self.next_session.set(session + 1);
        self.sessions.borrow_mut().insert(
            session,
            FakeSession {
                slot_index,
                logged_in: false,
                search: None,
            },
        );
        self.record(Call::OpenSession(slot_id));
        Ok(session)
    }

    fn close_session(&self, session: SessionHandle) -> ProviderResult<()> {
        self.enter("C_CloseSession")?;
        self.sessions
            .borrow_mut()
            .remove(&session)
            .ok_or(ReturnValue(CKR_SESSION_HANDLE_INVALID))?;
        self.record(Call::CloseSession(session));
        Ok(())
    }

    fn login(
        &self,
        session: SessionHandle,
        user_type: CK_USER_TYPE,
        pin: &[u8],
    ) -> ProviderResult<()> {
        self.enter("C_Login")?;
        self.with_session(session, |slot, state| {
            if user_type != CKU_USER {
                return Err(ReturnValue(CKR_USER_TYPE_INVALID));
            }
            if state.logged_in {
                return Err(ReturnValue(CKR_USER_ALREADY_LOGGED_IN));
            }
            if pin != slot.user_pin.as_bytes() {
                return Err(ReturnValue(CKR_PIN_INCORRECT));
            }
            state.logged_in = true;
            Ok(())
        })?;
        self.record(Call::Login(session));
        Ok(())
    }

    fn logout(&self, session: SessionHandle) -> ProviderResult<()> {
        self.enter("C_Logout")?;
        self.with_session(session, |_, state| {
            if !state.logged_in {
                return Err(ReturnValue(CKR_USER_NOT_LOGGED_IN));
            }
            state.logged_in = false;
            Ok(())
        })?;
        self.record(Call::Logout(session));
        Ok(())
    }

    fn find_objects_init(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> ProviderResult<()> {
        self.enter("C_FindObjectsInit")?;
        self.with_session(session, |slot, state| {
            if state.search.is_some() {
                return Err(ReturnValue(CKR_OPERATION_ACTIVE));
            }
            let logged_in = state.logged_in;
            state.search = Some(
                slot.objects
                    .iter()
                    .filter(|object| logged_in || !object.is_private())
                    .filter(|object| object.matches(template))
                    .map(|object| object.handle)
                    .collect(),
            );
            Ok(())
        })?;
        self.record(Call::FindObjectsInit(session));
        Ok(())
    }

    fn find_objects(
        &self,
        session: SessionHandle,
        max_object_count: usize,
    ) -> ProviderResult<Vec<ObjectHandle>> {
        self.enter("C_FindObjects")?;
        let handles = self.with_session(session, |_, state| {
            let search = state
                .search
                .as_mut()
                .ok_or(ReturnValue(CKR_OPERATION_NOT_INITIALIZED))?;
            let count = max_object_count.min(search.len());
            Ok(search.drain(..count).collect::<Vec<_>>())
        })?;
        self.record(Call::FindObjects {
            session,
            returned: handles.len(),
        });
        Ok(handles)
    }

    fn find_objects_final(&self, session: SessionHandle) -> ProviderResult<()> {
        self.enter("C_FindObjectsFinal")?;
        self.with_session(session, |_, state| {
            state
                .search
                .take()
                .map(drop)
                .ok_or(ReturnValue(CKR_OPERATION_NOT_INITIALIZED))
        })?;
        self.record(Call::FindObjectsFinal(session));
        Ok(())
    }

    fn get_attribute_value(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        attribute_types: &[CK_ATTRIBUTE_TYPE],
    ) -> ProviderResult<Vec<Attribute>> {
        self.enter("C_GetAttributeValue")?;
        let attributes = self.with_session(session, |slot, state| {
            let object = slot
                .objects
                .iter()
                .find(|candidate| candidate.handle == object)
                .filter(|candidate| state.logged_in || !candidate.is_private())
                .ok_or(ReturnValue(CKR_OBJECT_HANDLE_INVALID))?;
            attribute_types
                .iter()
                .map(|&attribute_type| {
                    object
                        .attribute(attribute_type)
                        .cloned()
                        .ok_or(ReturnValue(CKR_ATTRIBUTE_TYPE_INVALID))
                })
                .collect::<ProviderResult<Vec<_>>>()
        })?;
        self.record(Call::GetAttributeValue(object));
        Ok(attributes)
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        self.record(Call::Unload);
    }
}
