use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use storeforge_store::StoreId;

pub const DEFAULT_ID_LENGTH: usize = 12;
pub const DEFAULT_PASSWORD_LENGTH: usize = 24;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// A fresh store id: `length` lowercase hex characters from the OS CSPRNG.
pub fn new_store_id(length: usize) -> StoreId {
    let mut id = hex::encode(random_bytes(length.div_ceil(2)));
    id.truncate(length);
    StoreId::new(id)
}

/// A fresh password of `length` characters from the standard base64 alphabet.
pub fn new_password(length: usize) -> String {
    let mut password = STANDARD.encode(random_bytes(length));
    password.truncate(length);
    password
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn store_id_is_lowercase_hex_of_requested_length() {
        let id = new_store_id(DEFAULT_ID_LENGTH);
        assert_eq!(id.len(), 12);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        assert_eq!(new_store_id(7).len(), 7);
    }

    #[test]
    fn namespace_derives_from_id() {
        let id = new_store_id(DEFAULT_ID_LENGTH);
        assert_eq!(id.namespace(), format!("store-{id}"));
    }

    #[test]
    fn ids_do_not_repeat() {
        let ids: HashSet<String> = (0..1000)
            .map(|_| new_store_id(DEFAULT_ID_LENGTH).into_inner())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn password_uses_base64_alphabet() {
        let pw = new_password(DEFAULT_PASSWORD_LENGTH);
        assert_eq!(pw.len(), 24);
        assert!(pw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
        assert_ne!(pw, new_password(DEFAULT_PASSWORD_LENGTH));
    }
}
