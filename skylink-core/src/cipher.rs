//! Repeating-key XOR cipher over bit strings. Demonstrative only: the key is reused cyclically.

use crate::bits::{BitString, ParseBitsError};

/// `out[i] = payload[i] XOR key[i mod len(key)]`.
pub fn encrypt(payload: &BitString, key: &BitString) -> Result<BitString, CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    Ok(xor_cycled(payload, key.as_slice()))
}

/// Inverse of [`encrypt`]; XOR is its own inverse.
pub fn decrypt(cipher: &BitString, key: &BitString) -> Result<BitString, CipherError> {
    encrypt(cipher, key)
}

fn xor_cycled(input: &BitString, key: &[bool]) -> BitString {
    let mut out = Vec::with_capacity(input.len());
    for (i, &bit) in input.as_slice().iter().enumerate() {
        out.push(bit ^ key[i % key.len()]);
    }
    BitString::from_bits(out)
}

/// Session key from the key exchange. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherKey(BitString);

impl CipherKey {
    pub fn new(bits: BitString) -> Result<Self, CipherError> {
        if bits.is_empty() {
            return Err(CipherError::EmptyKey);
        }
        Ok(Self(bits))
    }

    /// Parse a `'0'`/`'1'` key string as delivered by the key-exchange endpoint.
    pub fn parse(s: &str) -> Result<Self, CipherError> {
        Self::new(s.parse()?)
    }

    pub fn bits(&self) -> &BitString {
        &self.0
    }

    pub fn encrypt(&self, payload: &BitString) -> BitString {
        xor_cycled(payload, self.0.as_slice())
    }

    pub fn decrypt(&self, cipher: &BitString) -> BitString {
        xor_cycled(cipher, self.0.as_slice())
    }
}

/// Missing or unusable cipher key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("cipher key is empty")]
    EmptyKey,
    #[error("cipher key is not a bit string: {0}")]
    InvalidKey(#[from] ParseBitsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn bits(s: &str) -> BitString {
        s.parse().unwrap()
    }

    #[test]
    fn known_vector() {
        let c = encrypt(&bits("1010"), &bits("11")).unwrap();
        assert_eq!(c.to_string(), "0101");
        assert_eq!(decrypt(&c, &bits("11")).unwrap().to_string(), "1010");
    }

    #[test]
    fn key_longer_than_message() {
        let c = encrypt(&bits("11"), &bits("0110")).unwrap();
        assert_eq!(c.to_string(), "10");
    }

    #[test]
    fn self_inverse_for_random_inputs() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let m = BitString::from_bits((0..rng.gen_range(0..130)).map(|_| rng.gen()).collect());
            let k = BitString::from_bits((0..rng.gen_range(1..40)).map(|_| rng.gen()).collect());
            let c = encrypt(&m, &k).unwrap();
            assert_eq!(c.len(), m.len());
            assert_eq!(decrypt(&c, &k).unwrap(), m);
            assert_eq!(encrypt(&decrypt(&c, &k).unwrap(), &k).unwrap(), c);
        }
    }

    #[test]
    fn empty_key_rejected() {
        assert_eq!(encrypt(&bits("101"), &BitString::new()), Err(CipherError::EmptyKey));
        assert_eq!(decrypt(&bits("101"), &BitString::new()), Err(CipherError::EmptyKey));
        assert_eq!(CipherKey::parse(""), Err(CipherError::EmptyKey));
    }

    #[test]
    fn key_parse_rejects_non_bits() {
        assert!(matches!(CipherKey::parse("10z"), Err(CipherError::InvalidKey(_))));
    }

    #[test]
    fn cipher_key_matches_free_functions() {
        let key = CipherKey::parse("1101").unwrap();
        let m = bits("0011101011");
        assert_eq!(key.encrypt(&m), encrypt(&m, key.bits()).unwrap());
        assert_eq!(key.decrypt(&key.encrypt(&m)), m);
        assert_eq!(key.bits().len(), 4);
    }
}
