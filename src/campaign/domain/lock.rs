//! Advisory lock keys.
//!
//! `PostgreSQL` advisory locks are addressed by two `int4` values. Both are
//! 32-bit FNV-1 hashes: the first of a fixed namespace shared by every lock
//! this crate takes, the second of the caller's key. Collisions only make
//! unrelated holders wait for each other.

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Namespace hashed into the first half of every advisory lock address.
pub const LOCK_NAMESPACE: &str = "campaigns";

/// Hashes bytes with 32-bit FNV-1 (multiply, then xor).
#[must_use]
pub fn fnv1_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV32_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV32_PRIME) ^ u32::from(*byte)
    })
}

#[expect(
    clippy::cast_possible_wrap,
    reason = "advisory lock addresses reinterpret the unsigned hash bits as int4"
)]
const fn as_int4(hash: u32) -> i32 {
    hash as i32
}

/// Address of a transaction-scoped advisory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvisoryLockKey {
    namespace: i32,
    id: i32,
}

impl AdvisoryLockKey {
    /// Derives the lock address for a caller-supplied key.
    #[must_use]
    pub fn for_key(key: &str) -> Self {
        Self {
            namespace: as_int4(fnv1_32(LOCK_NAMESPACE.as_bytes())),
            id: as_int4(fnv1_32(key.as_bytes())),
        }
    }

    /// Returns the namespace half of the address.
    #[must_use]
    pub const fn namespace(self) -> i32 {
        self.namespace
    }

    /// Returns the key half of the address.
    #[must_use]
    pub const fn id(self) -> i32 {
        self.id
    }
}
