//! sealbox-crypto: client-side key management and envelope encryption
//!
//! Every symmetric operation goes through [`envelope`] (AES-256-GCM, fresh
//! 96-bit IV per call). Asymmetric sharing uses RSA-OAEP/SHA-256; audit
//! entries are signed with RSA-PSS/SHA-256.
//!
//! Key hierarchy:
//! ```text
//! Password Key Kp (PBKDF2-HMAC-SHA256(password, salt), never stored)
//!   ├── Master Key Km (256-bit random, stored wrapped under Kp)
//!   │   ├── File Key Kf (per-file, 256-bit random, stored wrapped under Km)
//!   │   └── Index state blob (client chain heads)
//!   ├── Search Key Ks (256-bit random, stored wrapped under Kp)
//!   │   └── Keyword chain values (encrypted file ids)
//!   └── RSA-4096 private key (PKCS8 DER, stored wrapped under Kp)
//!       └── Shared File Keys (RSA-OAEP, wrapped under the recipient's public key)
//! ```

pub mod encoding;
pub mod envelope;
pub mod error;
pub mod hierarchy;
pub mod kdf;
pub mod keys;
pub mod share;
pub mod sign;

pub use envelope::{decrypt, encrypt, Envelope};
pub use error::{CryptoError, CryptoResult};
pub use hierarchy::{register, KeyHierarchy, KeyParams, Registration, UnlockedKeys, UserKeyBundle};
pub use kdf::{derive_password_key, generate_salt, PasswordKey};
pub use keys::{fill_random, generate_keypair, FileKey, MasterKey, PrivateKey, PublicKey, SearchKey};
pub use share::{accept_share, share_file_key};
pub use sign::{sign, verify_signature};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag (128-bit)
pub const TAG_SIZE: usize = 16;

/// Size of a PBKDF2 salt (128-bit)
pub const SALT_SIZE: usize = 16;

/// Default PBKDF2-HMAC-SHA256 iteration count
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 150_000;

/// Default RSA modulus size in bits
pub const DEFAULT_RSA_BITS: usize = 4096;
