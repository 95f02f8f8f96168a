//! Identifier validation for session records.

use crate::error::{Error, Result};
use crate::record::SessionRecord;

/// Minimum TMSI length, in characters.
pub const MIN_TMSI_LEN: usize = 4;

/// Minimum IMSI length, in characters.
pub const MIN_IMSI_LEN: usize = 14;

/// Minimum MSISDN length, in characters.
pub const MIN_MSISDN_LEN: usize = 10;

/// Check the three identifiers of a record, in order `tmsi`, `imsi`, `msisdn`.
pub fn validate_record(record: &SessionRecord) -> Result<()> {
    check_length("tmsi", &record.tmsi, MIN_TMSI_LEN)?;
    check_length("imsi", &record.imsi, MIN_IMSI_LEN)?;
    check_length("msisdn", &record.msisdn, MIN_MSISDN_LEN)?;
    Ok(())
}

/// Reject an empty identifier.
pub fn require(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(field, format!("{field} is required")));
    }
    Ok(())
}

fn check_length(field: &'static str, value: &str, min: usize) -> Result<()> {
    require(field, value)?;
    if value.chars().count() < min {
        return Err(Error::validation(
            field,
            format!("{field} must be at least {min} characters long"),
        ));
    }
    Ok(())
}
