use std::sync::atomic::{AtomicU64, Ordering};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

/// Pluggable transformation of packet payloads on the wire. Only payloads are transformed, the
///  4-byte header is always sent in clear so that relaying devices can route without being
///  able to read the payload.
pub trait SecurityCodec: Send + Sync {
    fn pack(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn unpack(&self, packed: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// the maximum number of bytes `pack` adds to a payload
    fn overhead(&self) -> usize;
}

pub struct NoSecurity;
impl SecurityCodec for NoSecurity {
    fn pack(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn unpack(&self, packed: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(packed.to_vec())
    }

    fn overhead(&self) -> usize {
        0
    }
}


/// AES-256-GCM payload encryption. A packed payload looks like this:
///
/// ```ascii
///  0: nonce (12 bytes): 4 bytes chosen randomly per instance, followed by a u64 BE counter
/// 12: ciphertext, followed by the 16 byte AES-GCM tag
/// ```
pub struct Aes256GcmSecurity {
    cipher: Aes256Gcm,
    nonce_fixed: u32,
    nonce_incremented: AtomicU64,
}

impl Aes256GcmSecurity {
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    pub fn new(key: &[u8; 32]) -> Aes256GcmSecurity {
        Aes256GcmSecurity {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            nonce_fixed: rand::random(),
            nonce_incremented: AtomicU64::new(0),
        }
    }

    /// derives the key from a secret shared by all devices
    pub fn from_shared_secret(secret: &[u8]) -> Aes256GcmSecurity {
        let key: [u8; 32] = Sha256::digest(secret).into();
        Self::new(&key)
    }
}

impl SecurityCodec for Aes256GcmSecurity {
    fn pack(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut result = Vec::with_capacity(plaintext.len() + self.overhead());
        result.put_u32(self.nonce_fixed);
        result.put_u64(self.nonce_incremented.fetch_add(1, Ordering::AcqRel));

        let nonce = Nonce::from_slice(&result[..Self::NONCE_LEN]);
        let ciphertext = self.cipher.encrypt(nonce, plaintext)
            .map_err(|_| anyhow!("encryption error"))?;
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn unpack(&self, packed: &[u8]) -> anyhow::Result<Vec<u8>> {
        if packed.len() < Self::NONCE_LEN + Self::TAG_LEN {
            bail!("encrypted payload too short: {} bytes", packed.len());
        }

        let (nonce, ciphertext) = packed.split_at(Self::NONCE_LEN);
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("cryptographically invalid payload"))
    }

    fn overhead(&self) -> usize {
        Self::NONCE_LEN + Self::TAG_LEN
    }
}


/// LZ4 compression of payloads, stacked on top of another codec: the compressed bytes are
///  passed through the inner codec, so compression happens before encryption and
///  decompression after decryption.
///
/// ```ascii
/// 0: uncompressed length (u32 LE)
/// 4: LZ4 block
/// ```
pub struct Lz4Compression<S> {
    inner: S,
    max_payload_size: usize,
}

impl<S: SecurityCodec> Lz4Compression<S> {
    const SIZE_PREFIX_LEN: usize = 4;

    /// Received payloads claiming to decompress to more than `max_payload_size` bytes are
    ///  rejected before anything is allocated for them.
    pub fn new(inner: S, max_payload_size: usize) -> Lz4Compression<S> {
        Lz4Compression {
            inner,
            max_payload_size,
        }
    }
}

impl Lz4Compression<NoSecurity> {
    pub fn without_encryption(max_payload_size: usize) -> Lz4Compression<NoSecurity> {
        Self::new(NoSecurity, max_payload_size)
    }
}

impl<S: SecurityCodec> SecurityCodec for Lz4Compression<S> {
    fn pack(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let compressed = lz4_flex::compress_prepend_size(plaintext);
        self.inner.pack(&compressed)
    }

    fn unpack(&self, packed: &[u8]) -> anyhow::Result<Vec<u8>> {
        let compressed = self.inner.unpack(packed)?;
        if compressed.len() < Self::SIZE_PREFIX_LEN {
            bail!("compressed payload too short: {} bytes", compressed.len());
        }

        let uncompressed_len = (&compressed[..]).get_u32_le() as usize;
        if uncompressed_len > self.max_payload_size {
            bail!("compressed payload claims {} bytes, maximum is {}", uncompressed_len, self.max_payload_size);
        }

        lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| anyhow!("invalid compressed payload: {}", e))
    }

    fn overhead(&self) -> usize {
        // incompressible data grows a little
        lz4_flex::block::get_maximum_output_size(self.max_payload_size) - self.max_payload_size
            + Self::SIZE_PREFIX_LEN
            + self.inner.overhead()
    }
}
