use super::RegistrationError;

pub const PREFIX: &str = "017";
const MAX_SERIAL: u32 = 9999;

/// Serial part of a well-formed number: `017` followed by four digits, 0001..=9999.
pub fn parse(number: &str) -> Option<u32> {
    let digits = number.trim().strip_prefix(PREFIX)?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let serial: u32 = digits.parse().ok()?;
    (1..=MAX_SERIAL).contains(&serial).then_some(serial)
}

pub fn format(serial: u32) -> String {
    format!("{PREFIX}{serial:04}")
}

/// The number after the highest one issued so far.
pub fn next_after<'a>(
    issued: impl IntoIterator<Item = &'a str>,
) -> Result<String, RegistrationError> {
    let max = issued.into_iter().filter_map(parse).max().unwrap_or(0);
    if max >= MAX_SERIAL {
        return Err(RegistrationError::ApplicationNumbersExhausted);
    }
    Ok(format(max + 1))
}
