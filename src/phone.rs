//! Brazilian phone normalization.
//!
//! Patients type numbers in every imaginable shape: `(33) 99888-7766`,
//! `33998887766`, `+55 33 99888 7766`, `9888-7766`. The SMS transport
//! needs one canonical dialable string, so everything is reduced to
//! digits and classified by length.

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PhoneConfig {
    /// Country calling code, digits only.
    pub country_code: String,
    /// Area code assumed when the input carries none.
    pub default_area_code: String,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            country_code: "55".to_string(),
            default_area_code: "33".to_string(),
        }
    }
}

/// Ninth digit prepended to Brazilian mobile numbers.
const MOBILE_MARKER: char = '9';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number has an unrecognized format: {0}")]
    InvalidPhoneFormat(String),
}

/// Converts arbitrary phone input into a canonical dialable string for
/// the configured country (13 digits starting with the country code), or
/// rejects it. Pure and total: same input, same output.
pub fn normalize(config: &PhoneConfig, raw: &str) -> Result<String, PhoneError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        // Already canonical: country code + area code + 9-digit mobile.
        13 if digits.starts_with(&config.country_code) => Ok(digits),
        // Area code + mobile marker + 8 digits.
        11 if digits.chars().nth(2) == Some(MOBILE_MARKER) => {
            Ok(format!("{}{}", config.country_code, digits))
        }
        // Area code + 8-digit landline.
        10 => Ok(format!("{}{}", config.country_code, digits)),
        // Mobile without area code.
        9 if digits.starts_with(MOBILE_MARKER) => Ok(format!(
            "{}{}{}",
            config.country_code, config.default_area_code, digits
        )),
        // Landline without area code.
        8 => Ok(format!(
            "{}{}{}",
            config.country_code, config.default_area_code, digits
        )),
        _ => Err(PhoneError::InvalidPhoneFormat(raw.to_string())),
    }
}
