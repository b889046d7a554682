use std::fmt::{self, Display, Formatter};

use pkcs11_sys::{CK_ATTRIBUTE_TYPE, CK_ULONG, CKA_ID, CKA_KEY_TYPE, CKA_LABEL};

/// Attributes fetched for every private key, in display order.
pub const PRIVATE_KEY_ATTRIBUTES: [CK_ATTRIBUTE_TYPE; 3] = [CKA_KEY_TYPE, CKA_ID, CKA_LABEL];

/// A PKCS#11 attribute and its raw value, as returned by `C_GetAttributeValue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attribute_type: CK_ATTRIBUTE_TYPE,
    pub value: Vec<u8>,
}

impl Attribute {
    #[must_use]
    pub const fn new(attribute_type: CK_ATTRIBUTE_TYPE, value: Vec<u8>) -> Self {
        Self {
            attribute_type,
            value,
        }
    }

    /// A `CK_ULONG` valued attribute (object class, key type...) in the
    /// native layout a module reads and writes.
    #[must_use]
    pub fn from_ulong(attribute_type: CK_ATTRIBUTE_TYPE, value: CK_ULONG) -> Self {
        Self::new(attribute_type, value.to_ne_bytes().to_vec())
    }
}

/// Renders the attribute as one report line (without indentation).
///
/// The key type and the identifier are binary and shown in hex, the label as
/// text. Anything else is shown as `#<type>: <hex>`.
impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.attribute_type {
            CKA_KEY_TYPE => write!(f, "type: {}", hex::encode(&self.value)),
            CKA_ID => write!(f, "id: {}", hex::encode(&self.value)),
            CKA_LABEL => write!(f, "label: {}", String::from_utf8_lossy(&self.value)),
            other => write!(f, "#{other}: {}", hex::encode(&self.value)),
        }
    }
}
