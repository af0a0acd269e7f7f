//! Client-side passcode checks.

use std::time::Duration;

use super::error::ValidationError;

/// Number of digits in a passcode
pub const OTP_LENGTH: usize = 6;

/// Check a passcode before it is sent anywhere.
/// Surrounding whitespace is ignored; the trimmed code is returned.
pub fn validate_otp(code: &str) -> Result<&str, ValidationError> {
    let code = code.trim();
    if code.len() != OTP_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidOtp { expected: OTP_LENGTH });
    }
    Ok(code)
}

/// Render a countdown as `m:ss`
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_otp() {
        assert_eq!(validate_otp("123456"), Ok("123456"));
        assert_eq!(validate_otp(" 000042\n"), Ok("000042"));

        let invalid = Err(ValidationError::InvalidOtp { expected: 6 });
        assert_eq!(validate_otp(""), invalid);
        assert_eq!(validate_otp("12345"), invalid);
        assert_eq!(validate_otp("1234567"), invalid);
        assert_eq!(validate_otp("12a456"), invalid);
        assert_eq!(validate_otp("12 456"), invalid);
        assert_eq!(validate_otp("１２３４５６"), invalid); // full-width digits
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(Duration::from_secs(300)), "5:00");
        assert_eq!(format_countdown(Duration::from_secs(59)), "0:59");
        assert_eq!(format_countdown(Duration::from_millis(61_900)), "1:01");
        assert_eq!(format_countdown(Duration::ZERO), "0:00");
    }
}
