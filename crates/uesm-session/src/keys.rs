//! Key namespaces in the backing store.

/// Prefix for session record keys.
pub const SESSION_PREFIX: &str = "sess:";

/// Prefix for IMSI index sets.
pub const IMSI_INDEX_PREFIX: &str = "idx:imsi:";

/// Prefix for MSISDN index sets.
pub const MSISDN_INDEX_PREFIX: &str = "idx:msisdn:";

/// Key of the record for `tmsi`.
pub fn session_key(tmsi: &str) -> String {
    format!("{SESSION_PREFIX}{tmsi}")
}

/// Key of the IMSI index set for `imsi`.
pub fn imsi_index_key(imsi: &str) -> String {
    format!("{IMSI_INDEX_PREFIX}{imsi}")
}

/// Key of the MSISDN index set for `msisdn`.
pub fn msisdn_index_key(msisdn: &str) -> String {
    format!("{MSISDN_INDEX_PREFIX}{msisdn}")
}
