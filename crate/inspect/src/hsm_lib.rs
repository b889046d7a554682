use std::{ffi::c_void, path::Path, ptr};

use libloading::Library;
use pkcs11_inspect_logger::debug;
use pkcs11_sys::*;
use zeroize::Zeroizing;

use crate::{
    Attribute, HError, HResult,
    error::{ProviderResult, ReturnValue},
    provider::{ModuleInfo, ObjectHandle, Provider, SessionHandle, SlotId, SlotInfo, TokenInfo},
};

/// Call a function of the module and return early on anything but `CKR_OK`.
macro_rules! pkcs11_call {
    ($hsm:expr, $function:ident $(, $arg:expr)* $(,)?) => {{
        let function = $hsm
            .$function
            .ok_or(ReturnValue(CKR_FUNCTION_NOT_SUPPORTED))?;
        #[allow(unsafe_code)]
        let rv = unsafe { function($($arg),*) };
        if rv != CKR_OK {
            return Err(ReturnValue(rv));
        }
    }};
}

fn to_usize(value: CK_ULONG) -> ProviderResult<usize> {
    usize::try_from(value).map_err(|_| ReturnValue(CKR_GENERAL_ERROR))
}

fn to_ulong(value: usize) -> ProviderResult<CK_ULONG> {
    CK_ULONG::try_from(value).map_err(|_| ReturnValue(CKR_ARGUMENTS_BAD))
}

/// A PKCS#11 module loaded from a shared library.
///
/// Only the functions the inspector calls are resolved; a module missing one
/// of them fails to load. Dropping the value unloads the library, it does not
/// call `C_Finalize`: that belongs to [`Pkcs11Driver`](crate::Pkcs11Driver).
pub struct HsmLib {
    path: String,
    C_Initialize: CK_C_Initialize,
    C_Finalize: CK_C_Finalize,
    C_GetInfo: CK_C_GetInfo,

    C_GetSlotList: CK_C_GetSlotList,
    C_GetSlotInfo: CK_C_GetSlotInfo,
    C_GetTokenInfo: CK_C_GetTokenInfo,

    C_OpenSession: CK_C_OpenSession,
    C_CloseSession: CK_C_CloseSession,

    C_Login: CK_C_Login,
    C_Logout: CK_C_Logout,

    C_FindObjectsInit: CK_C_FindObjectsInit,
    C_FindObjects: CK_C_FindObjects,
    C_FindObjectsFinal: CK_C_FindObjectsFinal,

    C_GetAttributeValue: CK_C_GetAttributeValue,

    // dropped last: the function pointers above point into it
    _library: Library,
}

impl HsmLib {
    pub fn load<P: AsRef<Path>>(path: P) -> HResult<Self> {
        let path = path.as_ref();
        let module = path.display().to_string();
        let load_error = |source| HError::ModuleLoad {
            path: module.clone(),
            source,
        };
        debug!("Loading PKCS#11 module {module}");
        #[allow(unsafe_code)]
        unsafe {
            let library = Library::new(path).map_err(load_error)?;
            let hsm_lib = Self {
                C_Initialize: Some(*library.get(b"C_Initialize").map_err(load_error)?),
                C_Finalize: Some(*library.get(b"C_Finalize").map_err(load_error)?),
                C_GetInfo: Some(*library.get(b"C_GetInfo").map_err(load_error)?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList").map_err(load_error)?),
                C_GetSlotInfo: Some(*library.get(b"C_GetSlotInfo").map_err(load_error)?),
                C_GetTokenInfo: Some(*library.get(b"C_GetTokenInfo").map_err(load_error)?),
                C_OpenSession: Some(*library.get(b"C_OpenSession").map_err(load_error)?),
                C_CloseSession: Some(*library.get(b"C_CloseSession").map_err(load_error)?),
                C_Login: Some(*library.get(b"C_Login").map_err(load_error)?),
                C_Logout: Some(*library.get(b"C_Logout").map_err(load_error)?),
                C_FindObjectsInit: Some(
                    *library.get(b"C_FindObjectsInit").map_err(load_error)?,
                ),
                C_FindObjects: Some(*library.get(b"C_FindObjects").map_err(load_error)?),
                C_FindObjectsFinal: Some(
                    *library.get(b"C_FindObjectsFinal").map_err(load_error)?,
                ),
                C_GetAttributeValue: Some(
                    *library.get(b"C_GetAttributeValue").map_err(load_error)?,
                ),
                _library: library,
                path: module.clone(),
            };
            Ok(hsm_lib)
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Provider for HsmLib {
    fn initialize(&self) -> ProviderResult<()> {
        let mut init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        pkcs11_call!(self, C_Initialize, (&raw mut init_args).cast::<c_void>());
        Ok(())
    }

    fn finalize(&self) -> ProviderResult<()> {
        pkcs11_call!(self, C_Finalize, ptr::null_mut());
        Ok(())
    }

    fn get_info(&self) -> ProviderResult<ModuleInfo> {
        let mut info = CK_INFO::default();
        pkcs11_call!(self, C_GetInfo, &raw mut info);
        Ok(info.into())
    }

    fn get_slot_list(&self, token_present: bool) -> ProviderResult<Vec<SlotId>> {
        let token_present: CK_BBOOL = if token_present { CK_TRUE } else { CK_FALSE };
        let mut count: CK_ULONG = 0;
        pkcs11_call!(
            self,
            C_GetSlotList,
            token_present,
            ptr::null_mut(),
            &raw mut count
        );
        let mut slots = vec![CK_SLOT_ID::default(); to_usize(count)?];
        pkcs11_call!(
            self,
            C_GetSlotList,
            token_present,
            slots.as_mut_ptr(),
            &raw mut count
        );
        slots.truncate(to_usize(count)?);
        Ok(slots)
    }

    fn get_slot_info(&self, slot_id: SlotId) -> ProviderResult<SlotInfo> {
        let mut info = CK_SLOT_INFO::default();
        pkcs11_call!(self, C_GetSlotInfo, slot_id, &raw mut info);
        Ok(info.into())
    }

    fn get_token_info(&self, slot_id: SlotId) -> ProviderResult<TokenInfo> {
        let mut info = CK_TOKEN_INFO::default();
        pkcs11_call!(self, C_GetTokenInfo, slot_id, &raw mut info);
        Ok(info.into())
    }

    fn open_session(&self, slot_id: SlotId, flags: CK_FLAGS) -> ProviderResult<SessionHandle> {
        let mut session: CK_SESSION_HANDLE = 0;
        pkcs11_call!(
            self,
            C_OpenSession,
            slot_id,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session
        );
        Ok(session)
    }

    fn close_session(&self, session: SessionHandle) -> ProviderResult<()> {
        pkcs11_call!(self, C_CloseSession, session);
        Ok(())
    }

    fn login(
        &self,
        session: SessionHandle,
        user_type: CK_USER_TYPE,
        pin: &[u8],
    ) -> ProviderResult<()> {
        let mut pin = Zeroizing::new(pin.to_vec());
        let pin_len = to_ulong(pin.len())?;
        pkcs11_call!(
            self,
            C_Login,
            session,
            user_type,
            pin.as_mut_ptr() as CK_UTF8CHAR_PTR,
            pin_len
        );
        Ok(())
    }

    fn logout(&self, session: SessionHandle) -> ProviderResult<()> {
        pkcs11_call!(self, C_Logout, session);
        Ok(())
    }

    fn find_objects_init(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> ProviderResult<()> {
        // C_FindObjectsInit does not write to the template values
        let mut ck_template = template
            .iter()
            .map(|attribute| {
                Ok(CK_ATTRIBUTE {
                    type_: attribute.attribute_type,
                    pValue: attribute.value.as_ptr().cast_mut().cast::<c_void>(),
                    ulValueLen: to_ulong(attribute.value.len())?,
                })
            })
            .collect::<ProviderResult<Vec<_>>>()?;
        let count = to_ulong(ck_template.len())?;
        pkcs11_call!(
            self,
            C_FindObjectsInit,
            session,
            ck_template.as_mut_ptr(),
            count
        );
        Ok(())
    }

    fn find_objects(
        &self,
        session: SessionHandle,
        max_object_count: usize,
    ) -> ProviderResult<Vec<ObjectHandle>> {
        let mut handles = vec![CK_OBJECT_HANDLE::default(); max_object_count];
        let mut object_count: CK_ULONG = 0;
        pkcs11_call!(
            self,
            C_FindObjects,
            session,
            handles.as_mut_ptr(),
            to_ulong(max_object_count)?,
            &raw mut object_count
        );
        let object_count = to_usize(object_count)?;
        if object_count > max_object_count {
            return Err(ReturnValue(CKR_GENERAL_ERROR));
        }
        handles.truncate(object_count);
        Ok(handles)
    }

    fn find_objects_final(&self, session: SessionHandle) -> ProviderResult<()> {
        pkcs11_call!(self, C_FindObjectsFinal, session);
        Ok(())
    }

    fn get_attribute_value(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        attribute_types: &[CK_ATTRIBUTE_TYPE],
    ) -> ProviderResult<Vec<Attribute>> {
        let mut template = attribute_types
            .iter()
            .map(|&type_| CK_ATTRIBUTE {
                type_,
                pValue: ptr::null_mut(),
                ulValueLen: 0,
            })
            .collect::<Vec<_>>();
        let count = to_ulong(template.len())?;

        // first pass: the module fills in the value lengths
        pkcs11_call!(
            self,
            C_GetAttributeValue,
            session,
            object,
            template.as_mut_ptr(),
            count
        );
        let mut values = template
            .iter()
            .map(|attribute| Ok(vec![0_u8; to_usize(attribute.ulValueLen)?]))
            .collect::<ProviderResult<Vec<_>>>()?;
        for (attribute, value) in template.iter_mut().zip(values.iter_mut()) {
            attribute.pValue = value.as_mut_ptr().cast::<c_void>();
        }

        // second pass: the values
        pkcs11_call!(
            self,
            C_GetAttributeValue,
            session,
            object,
            template.as_mut_ptr(),
            count
        );
        template
            .iter()
            .zip(values)
            .map(|(attribute, mut value)| {
                value.truncate(to_usize(attribute.ulValueLen)?);
                Ok(Attribute::new(attribute.type_, value))
            })
            .collect()
    }
}

impl Drop for HsmLib {
    fn drop(&mut self) {
        debug!("Unloading PKCS#11 module {}", self.path);
    }
}
