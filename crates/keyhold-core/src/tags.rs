/// Prefix for key-encrypting key entries in the hardware key store.
pub const KEK_PREFIX: &str = "keyhold.kek";
/// Prefix for wrapped data-encrypting key blobs.
pub const DEK_PREFIX: &str = "keyhold.dek";

/// Tag of the KEK backing the logical key `base`.
pub fn kek_tag(base: &str) -> String {
    format!("{KEK_PREFIX}-{base}")
}

/// Tag of the wrapped DEK belonging to the logical key `base`.
pub fn dek_tag(base: &str) -> String {
    format!("{DEK_PREFIX}-{base}")
}

/// Both storage identifiers derived from one logical key name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTags {
    pub kek: String,
    pub dek: String,
}

impl KeyTags {
    pub fn for_name(base: &str) -> Self {
        Self {
            kek: kek_tag(base),
            dek: dek_tag(base),
        }
    }
}
