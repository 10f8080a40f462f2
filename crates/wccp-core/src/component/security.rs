//! Security component and MD5 message integrity.
//!
//! The security component always sits directly after the message header, so
//! the digest field lives at a fixed offset in every message.

use md5::{Digest, Md5};

use super::Component;
use crate::wire::{ComponentType, ParseError, Reader, WireError, Writer, COMPONENT_HEADER_SIZE, DIGEST_SIZE, KEY_SIZE, MSG_HEADER_SIZE};

/// Offset of the digest within a message.
pub const DIGEST_OFFSET: usize = MSG_HEADER_SIZE + COMPONENT_HEADER_SIZE + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SecurityOption {
    None = 0,
    Md5 = 1,
}

impl TryFrom<u32> for SecurityOption {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SecurityOption::None),
            1 => Ok(SecurityOption::Md5),
            other => Err(WireError::UnknownSecurityOption(other)),
        }
    }
}

/// Shared secret, zero padded or truncated to eight bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityKey([u8; KEY_SIZE]);

impl SecurityKey {
    pub fn new(secret: &[u8]) -> Self {
        let mut key = [0u8; KEY_SIZE];
        let n = secret.len().min(KEY_SIZE);
        key[..n].copy_from_slice(&secret[..n]);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecurityKey(..)")
    }
}

/// Security option plus, for MD5, the received digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityComp {
    option: SecurityOption,
    digest: [u8; DIGEST_SIZE],
}

impl SecurityComp {
    pub fn new(option: SecurityOption) -> Self {
        Self {
            option,
            digest: [0; DIGEST_SIZE],
        }
    }

    pub fn option(&self) -> SecurityOption {
        self.option
    }

    pub fn size_for(option: SecurityOption) -> usize {
        match option {
            SecurityOption::None => COMPONENT_HEADER_SIZE + 4,
            SecurityOption::Md5 => COMPONENT_HEADER_SIZE + 4 + DIGEST_SIZE,
        }
    }

    /// Write the digest of a fully built message into its digest field.
    ///
    /// `msg` is the whole message, header included. No-op for NONE.
    pub fn secure(option: SecurityOption, key: &SecurityKey, msg: &mut [u8]) -> Result<(), WireError> {
        if option != SecurityOption::Md5 {
            return Ok(());
        }
        let end = DIGEST_OFFSET + DIGEST_SIZE;
        if msg.len() < end {
            return Err(WireError::BufferTooSmall {
                needed: end,
                space: msg.len(),
            });
        }
        msg[DIGEST_OFFSET..end].fill(0);
        let digest = digest_of(key, msg);
        msg[DIGEST_OFFSET..end].copy_from_slice(&digest);
        Ok(())
    }

    /// Check the received digest against `msg` hashed with a zeroed digest
    /// field. The bytes are never modified.
    pub fn validate(&self, key: &SecurityKey, msg: &[u8]) -> bool {
        match self.option {
            SecurityOption::None => true,
            SecurityOption::Md5 => {
                let end = DIGEST_OFFSET + DIGEST_SIZE;
                if msg.len() < end {
                    return false;
                }
                digest_of(key, msg) == self.digest
            }
        }
    }
}

/// MD5 over key, then the message with its digest field read as zeros.
fn digest_of(key: &SecurityKey, msg: &[u8]) -> [u8; DIGEST_SIZE] {
    let end = DIGEST_OFFSET + DIGEST_SIZE;
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    hasher.update(&msg[..DIGEST_OFFSET]);
    hasher.update([0u8; DIGEST_SIZE]);
    hasher.update(&msg[end..]);
    hasher.finalize().into()
}

impl Component for SecurityComp {
    const TYPE: ComponentType = ComponentType::Security;

    fn calc_size(&self) -> usize {
        Self::size_for(self.option)
    }

    /// The digest is always written as zeros; `secure` fills it later.
    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_u32(self.option as u32)?;
        if self.option == SecurityOption::Md5 {
            w.put_bytes(&[0u8; DIGEST_SIZE])?;
        }
        Ok(())
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let option = SecurityOption::try_from(r.read_u32()?).map_err(|_| ParseError::CompInvalid)?;
        let mut digest = [0u8; DIGEST_SIZE];
        if option == SecurityOption::Md5 {
            digest = r.read::<[u8; DIGEST_SIZE]>()?;
        }
        Ok(Self { option, digest })
    }
}
