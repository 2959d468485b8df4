use std::time::{Duration, SystemTime};

/// Milliseconds since the unix epoch; clamps to 0 before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

/// Random stack identifier: 16 base36 chars from the OS random source.
pub fn create_stack_id() -> Result<String, getrandom::Error> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw)?;
    let alphabet = b"0123456789abcdefghijklmnopqrstuvwxyz";
    Ok(raw
        .iter()
        .map(|b| alphabet[(*b as usize) % alphabet.len()] as char)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_ids_are_base36_and_distinct() {
        let a = create_stack_id().unwrap();
        let b = create_stack_id().unwrap();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(a, b);
    }
}
