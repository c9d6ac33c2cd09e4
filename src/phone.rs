use std::fmt;

use thiserror::Error;

pub const CHANNEL_PREFIX: &str = "whatsapp:";

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number contains invalid character `{0}`")]
    InvalidCharacter(char),
    #[error("phone number must have between {MIN_DIGITS} and {MAX_DIGITS} digits, got {0}")]
    InvalidLength(usize),
}

/// A phone number in E.164 form, without the channel prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn e164(&self) -> &str {
        &self.0
    }

    pub fn channel_address(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    default_country_code: String,
}

impl PhoneNormalizer {
    pub fn new(default_country_code: impl Into<String>) -> Self {
        let code: String = default_country_code.into();
        Self {
            default_country_code: code.trim_start_matches('+').to_string(),
        }
    }

    pub fn normalize(&self, raw: &str) -> Result<PhoneNumber, PhoneError> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix(CHANNEL_PREFIX)
            .unwrap_or(trimmed)
            .trim();
        if trimmed.is_empty() {
            return Err(PhoneError::Empty);
        }

        let (international, rest) = match trimmed.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let mut digits = String::with_capacity(rest.len());
        for ch in rest.chars() {
            match ch {
                '0'..='9' => digits.push(ch),
                ' ' | '-' | '.' | '(' | ')' => {}
                other => return Err(PhoneError::InvalidCharacter(other)),
            }
        }

        // National numbers are DDD (2 digits) followed by 8 or 9 digits.
        if !international && (digits.len() == 10 || digits.len() == 11) {
            digits.insert_str(0, &self.default_country_code);
        }

        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(PhoneError::InvalidLength(digits.len()));
        }

        Ok(PhoneNumber(format!("+{digits}")))
    }
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new("55")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_international_numbers() {
        let phone = PhoneNormalizer::default()
            .normalize("+5511999999999")
            .unwrap();
        assert_eq!(phone.e164(), "+5511999999999");
        assert_eq!(phone.channel_address(), "whatsapp:+5511999999999");
    }

    #[test]
    fn strips_channel_prefix_and_punctuation() {
        let phone = PhoneNormalizer::default()
            .normalize("whatsapp:+55 (11) 99999-9999")
            .unwrap();
        assert_eq!(phone.e164(), "+5511999999999");
    }

    #[test]
    fn prefixes_national_numbers_with_default_country_code() {
        let normalizer = PhoneNormalizer::new("+55");
        assert_eq!(
            normalizer.normalize("11999999999").unwrap().e164(),
            "+5511999999999"
        );
        assert_eq!(
            normalizer.normalize("1133334444").unwrap().e164(),
            "+551133334444"
        );
    }

    #[test]
    fn treats_unprefixed_full_numbers_as_international() {
        let phone = PhoneNormalizer::default()
            .normalize("5511999999999")
            .unwrap();
        assert_eq!(phone.e164(), "+5511999999999");
    }

    #[test]
    fn rejects_malformed_numbers() {
        let normalizer = PhoneNormalizer::default();
        assert_eq!(normalizer.normalize("   "), Err(PhoneError::Empty));
        assert_eq!(normalizer.normalize("whatsapp:"), Err(PhoneError::Empty));
        assert_eq!(
            normalizer.normalize("+55 11 9999x9999"),
            Err(PhoneError::InvalidCharacter('x'))
        );
        assert_eq!(
            normalizer.normalize("+123"),
            Err(PhoneError::InvalidLength(3))
        );
    }
}
