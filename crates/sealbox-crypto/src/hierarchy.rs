//! Key hierarchy manager: registration, unlock, and the per-session key ring.
//!
//! State machine:
//! ```text
//! Locked --unlock(ok)--> Unlocked --clear--> Locked
//!    ^                       |
//!    +-----unlock(failed)----+
//! ```
//! A failed unlock always leaves the hierarchy `Locked`. Failures of other
//! operations (e.g. unwrapping one corrupt file key) do not change state.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::encoding::base64_array;
use crate::envelope::{self, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_password_key, generate_salt, PasswordKey};
use crate::keys::{generate_keypair, FileKey, MasterKey, PrivateKey, PublicKey, SearchKey};
use crate::{DEFAULT_PBKDF2_ITERATIONS, DEFAULT_RSA_BITS, SALT_SIZE};

/// Parameters for creating a new user key bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyParams {
    /// PBKDF2-HMAC-SHA256 iterations (default: 150000)
    pub pbkdf2_iterations: u32,
    /// RSA modulus size (default: 4096)
    pub rsa_bits: usize,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }
}

/// Everything the server stores about a user's keys. Secrets are wrapped
/// under Kp; the salt, iteration count and public key are in the clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeyBundle {
    #[serde(with = "base64_array")]
    pub password_salt: [u8; SALT_SIZE],
    pub kdf_iterations: u32,
    pub master_key: Envelope,
    pub search_key: Envelope,
    pub private_key: Envelope,
    /// base64 SPKI DER
    pub public_key: String,
}

/// Plaintext session secrets. Exists only in memory while unlocked.
#[derive(Debug, Clone)]
pub struct UnlockedKeys {
    pub master: MasterKey,
    pub search: SearchKey,
    pub private: PrivateKey,
    pub public: PublicKey,
}

/// Output of [`register`]: the bundle to persist plus the freshly created keys.
#[derive(Debug)]
pub struct Registration {
    pub bundle: UserKeyBundle,
    pub keys: UnlockedKeys,
}

/// Create a brand-new key hierarchy protected by `password`.
pub fn register(password: &SecretString, params: &KeyParams) -> CryptoResult<Registration> {
    let salt = generate_salt()?;
    let kp = derive_password_key(password, &salt, params.pbkdf2_iterations)?;

    let master = MasterKey::generate()?;
    let search = SearchKey::generate()?;
    let private = generate_keypair(params.rsa_bits)?;
    let public = private.public_key();

    let bundle = UserKeyBundle {
        password_salt: salt,
        kdf_iterations: params.pbkdf2_iterations,
        master_key: envelope::encrypt(master.as_bytes(), kp.as_bytes())?,
        search_key: envelope::encrypt(search.as_bytes(), kp.as_bytes())?,
        private_key: envelope::encrypt(&private.to_pkcs8_der()?, kp.as_bytes())?,
        public_key: public.to_b64()?,
    };

    debug!(rsa_bits = params.rsa_bits, "key hierarchy created");

    Ok(Registration {
        bundle,
        keys: UnlockedKeys {
            master,
            search,
            private,
            public,
        },
    })
}

/// Recover the plaintext secrets from a bundle. Every failure past key
/// derivation is reported as [`CryptoError::WrongPassphrase`].
fn open_bundle(password: &SecretString, bundle: &UserKeyBundle) -> CryptoResult<UnlockedKeys> {
    let kp = derive_password_key(password, &bundle.password_salt, bundle.kdf_iterations)?;

    let master = unwrap_secret(&bundle.master_key, &kp)
        .and_then(|bytes| MasterKey::from_slice(&bytes))
        .map_err(|_| CryptoError::WrongPassphrase)?;
    let search = unwrap_secret(&bundle.search_key, &kp)
        .and_then(|bytes| SearchKey::from_slice(&bytes))
        .map_err(|_| CryptoError::WrongPassphrase)?;
    let private = unwrap_secret(&bundle.private_key, &kp)
        .and_then(|der| PrivateKey::from_pkcs8_der(&der))
        .map_err(|_| CryptoError::WrongPassphrase)?;

    // A swapped public key would silently misdirect every share addressed to us
    let public = PublicKey::from_b64(&bundle.public_key).map_err(|_| CryptoError::WrongPassphrase)?;
    if public != private.public_key() {
        return Err(CryptoError::WrongPassphrase);
    }

    Ok(UnlockedKeys {
        master,
        search,
        private,
        public,
    })
}

fn unwrap_secret(
    sealed: &Envelope,
    kp: &PasswordKey,
) -> CryptoResult<zeroize::Zeroizing<Vec<u8>>> {
    envelope::decrypt(sealed, kp.as_bytes()).map(zeroize::Zeroizing::new)
}

#[derive(Debug, Default)]
enum KeyState {
    #[default]
    Locked,
    Unlocked(Box<UnlockedKeys>),
}

/// Session-scoped holder of Km, Ks and the RSA private key.
#[derive(Debug, Default)]
pub struct KeyHierarchy {
    state: KeyState,
}

impl KeyHierarchy {
    /// A locked hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// An unlocked hierarchy holding the keys produced by [`register`].
    pub fn from_keys(keys: UnlockedKeys) -> Self {
        Self {
            state: KeyState::Unlocked(Box::new(keys)),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self.state, KeyState::Unlocked(_))
    }

    /// Recompute Kp and unwrap the three secrets.
    pub fn unlock(&mut self, password: &SecretString, bundle: &UserKeyBundle) -> CryptoResult<()> {
        match open_bundle(password, bundle) {
            Ok(keys) => {
                self.state = KeyState::Unlocked(Box::new(keys));
                info!("key hierarchy unlocked");
                Ok(())
            }
            Err(e) => {
                self.clear();
                warn!("unlock failed: {e}");
                Err(e)
            }
        }
    }

    /// Wipe all in-memory secrets.
    pub fn clear(&mut self) {
        if self.is_unlocked() {
            debug!("key hierarchy cleared");
        }
        self.state = KeyState::Locked;
    }

    pub fn keys(&self) -> CryptoResult<&UnlockedKeys> {
        match &self.state {
            KeyState::Unlocked(keys) => Ok(keys),
            KeyState::Locked => Err(CryptoError::Locked),
        }
    }

    pub fn master_key(&self) -> CryptoResult<&MasterKey> {
        self.keys().map(|k| &k.master)
    }

    pub fn search_key(&self) -> CryptoResult<&SearchKey> {
        self.keys().map(|k| &k.search)
    }

    pub fn private_key(&self) -> CryptoResult<&PrivateKey> {
        self.keys().map(|k| &k.private)
    }

    pub fn public_key(&self) -> CryptoResult<&PublicKey> {
        self.keys().map(|k| &k.public)
    }

    /// Wrap Kf under Km (owner path).
    pub fn wrap_file_key(&self, file_key: &FileKey) -> CryptoResult<Envelope> {
        envelope::encrypt(file_key.as_bytes(), self.master_key()?.as_bytes())
    }

    /// Unwrap a Kf previously wrapped under Km.
    pub fn unwrap_file_key(&self, wrapped: &Envelope) -> CryptoResult<FileKey> {
        let bytes = zeroize::Zeroizing::new(envelope::decrypt(
            wrapped,
            self.master_key()?.as_bytes(),
        )?);
        FileKey::from_slice(&bytes).map_err(|_| CryptoError::Authentication)
    }
}
