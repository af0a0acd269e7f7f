//! Terminal input helpers.

use std::io::{self, Write};

use anyhow::Result;

/// Maximum length for email input.
const MAX_EMAIL_LENGTH: usize = 254;

/// Print `label` and read one trimmed line from stdin
pub fn read_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Ask for an email, offering `last` as the default
pub fn prompt_email(last: Option<&str>) -> Result<String> {
    loop {
        let input = match last {
            Some(last) => {
                let input = read_line(&format!("Email [{}]: ", last))?;
                if input.is_empty() {
                    last.to_string()
                } else {
                    input
                }
            }
            None => read_line("Email: ")?,
        };
        if is_plausible_email(&input) {
            return Ok(input);
        }
        println!("Please enter a valid email address.");
    }
}

pub fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

pub fn prompt_yes_no(label: &str, default: bool) -> Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    let input = read_line(&format!("{} {}: ", label, hint))?;
    Ok(parse_yes_no(&input, default))
}

fn parse_yes_no(input: &str, default: bool) -> bool {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}

/// Cheap shape check; the server has the final word
fn is_plausible_email(input: &str) -> bool {
    if input.len() > MAX_EMAIL_LENGTH
        || input.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return false;
    }
    match input.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no() {
        assert!(parse_yes_no("y", false));
        assert!(parse_yes_no("YES", false));
        assert!(!parse_yes_no("n", true));
        assert!(parse_yes_no("", true));
        assert!(!parse_yes_no("", false));
        assert!(parse_yes_no("maybe", true));
    }

    #[test]
    fn test_is_plausible_email() {
        assert!(is_plausible_email("a@b.com"));
        assert!(is_plausible_email("shopper+sale@boutique.example"));
        assert!(!is_plausible_email(""));
        assert!(!is_plausible_email("no-at-sign.com"));
        assert!(!is_plausible_email("@b.com"));
        assert!(!is_plausible_email("a@localhost"));
        assert!(!is_plausible_email("a@.com"));
        assert!(!is_plausible_email("a b@c.com"));
        assert!(!is_plausible_email(&format!("{}@b.com", "x".repeat(260))));
    }
}
