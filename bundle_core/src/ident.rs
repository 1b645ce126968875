//! Resource-id validation and the identifier character class.

/// Is_valid_resource_id reports whether `s` is usable as a bundle resource
/// id: non-empty, a leading lowercase letter, then lowercase letters,
/// digits, and hyphens.
pub fn is_valid_resource_id(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b'a'..=b'z') => {}
        _ => return false,
    }
    bytes.all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'))
}

/// Is_ident_char reports whether `c` may appear inside a bundle reference.
///
/// Uppercase letters and underscores are excluded so that reference
/// tokenization stops at them.
pub fn is_ident_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["a", "db", "pet-store", "node0", "a-1-b-2"] {
            assert!(is_valid_resource_id(id), "{id:?} should be valid");
        }
    }

    #[test]
    fn invalid_ids() {
        for id in [
            "", "A", "Db", "1db", "-db", "db_1", "db.1", "db 1", "db/1", "дб",
        ] {
            assert!(!is_valid_resource_id(id), "{id:?} should be invalid");
        }
    }

    #[test]
    fn ident_chars() {
        for c in ['a', 'z', '0', '9', '-'] {
            assert!(is_ident_char(c));
        }
        for c in ['A', 'Z', '_', '.', ' ', '$', '{', '}'] {
            assert!(!is_ident_char(c));
        }
    }
}
