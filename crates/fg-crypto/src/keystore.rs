//! Durable storage for a unit's keypair.
//!
//! A keypair lives in a directory as two files:
//! - `id_ed25519`: the private seed (mode 0600 on Unix)
//! - `id_ed25519.pub`: the public key and its fingerprint
//!
//! The private file is the commit point. It is created with
//! create-no-replace semantics so that concurrent `generate` calls against
//! the same directory produce exactly one keypair; every other caller gets
//! [`IdentityError::AlreadyExists`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::hash::fingerprint;
use crate::identity::{Identity, IdentityError};

pub const PRIVATE_KEY_FILE: &str = "id_ed25519";
pub const PUBLIC_KEY_FILE: &str = "id_ed25519.pub";

/// Smallest RSA-equivalent strength `generate` accepts.
pub const MIN_KEY_BITS: u32 = 2048;

/// Default RSA-equivalent strength requested by operators.
pub const DEFAULT_KEY_BITS: u32 = 4096;

/// Delay after the private key appears, so a concurrent writer can finish
/// flushing the public half.
pub const KEY_SETTLE_DELAY: Duration = Duration::from_secs(2);

const ALGORITHM: &str = "ed25519";

/// Location of a keypair on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPaths {
    dir: PathBuf,
}

impl KeyPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }
}

/// Storage backend for key material.
pub trait KeyStore: Send + Sync {
    /// Make sure the location behind `paths` can hold a keypair.
    fn prepare(&self, paths: &KeyPaths) -> io::Result<()>;
    /// Whether a private key is present at `paths`.
    fn exists(&self, paths: &KeyPaths) -> bool;
    /// Read the private key blob, `None` if absent.
    fn read_private(&self, paths: &KeyPaths) -> io::Result<Option<Vec<u8>>>;
    /// Read the public key blob, `None` if absent.
    fn read_public(&self, paths: &KeyPaths) -> io::Result<Option<Vec<u8>>>;
    /// Replace the file at `path` atomically.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    /// Create the file at `path`, failing with `ErrorKind::AlreadyExists`
    /// if anything is already there. The content is durable before the
    /// name becomes visible.
    fn create_new(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Filesystem-backed key store.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileKeyStore;

impl FileKeyStore {
    pub fn new() -> Self {
        Self
    }

    fn temp_path(path: &Path) -> io::Result<PathBuf> {
        let mut suffix = [0u8; 8];
        getrandom::getrandom(&mut suffix).map_err(io::Error::other)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(path.with_file_name(format!(".{}.{}.tmp", name, hex::encode(suffix))))
    }

    /// Create a fresh owner-only file; the mode is set before any byte lands.
    fn open_private(path: &Path) -> io::Result<fs::File> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path)
    }

    fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = Self::open_private(path)?;
        let written = file.write_all(bytes).and_then(|()| file.sync_all());
        if written.is_err() {
            let _ = fs::remove_file(path);
        }
        written
    }

    fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl KeyStore for FileKeyStore {
    fn prepare(&self, paths: &KeyPaths) -> io::Result<()> {
        fs::create_dir_all(paths.dir())
    }

    fn exists(&self, paths: &KeyPaths) -> bool {
        paths.private_path().exists()
    }

    fn read_private(&self, paths: &KeyPaths) -> io::Result<Option<Vec<u8>>> {
        Self::read_optional(&paths.private_path())
    }

    fn read_public(&self, paths: &KeyPaths) -> io::Result<Option<Vec<u8>>> {
        Self::read_optional(&paths.public_path())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let temp = Self::temp_path(path)?;
        Self::write_synced(&temp, bytes)?;
        fs::rename(&temp, path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            e
        })
    }

    fn create_new(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let temp = Self::temp_path(path)?;
        Self::write_synced(&temp, bytes)?;
        // link(2) refuses to replace an existing name
        let linked = fs::hard_link(&temp, path);
        let _ = fs::remove_file(&temp);
        linked
    }
}

/// Serialized private key file.
#[derive(Serialize, Deserialize)]
struct StoredPrivateKey {
    version: u32,
    algorithm: String,
    /// Ed25519 seed (32 bytes, hex encoded)
    seed: String,
    /// RFC3339 creation time
    created_at: String,
}

/// Serialized public key file.
#[derive(Serialize, Deserialize)]
struct StoredPublicKey {
    version: u32,
    algorithm: String,
    public_key: String,
    fingerprint: String,
}

impl StoredPrivateKey {
    const CURRENT_VERSION: u32 = 1;

    fn new(identity: &Identity) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            algorithm: ALGORITHM.to_string(),
            seed: hex::encode(&identity.seed()[..]),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn into_identity(self) -> Result<Identity, IdentityError> {
        if self.algorithm != ALGORITHM {
            return Err(IdentityError::CorruptKey(format!(
                "unsupported algorithm {}",
                self.algorithm
            )));
        }
        let mut seed = zeroize::Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(&self.seed, &mut seed[..])
            .map_err(|e| IdentityError::CorruptKey(format!("private seed: {e}")))?;
        Ok(Identity::from_seed(&seed))
    }
}

impl StoredPublicKey {
    fn new(identity: &Identity) -> Self {
        Self {
            version: StoredPrivateKey::CURRENT_VERSION,
            algorithm: ALGORITHM.to_string(),
            public_key: hex::encode(identity.public_key()),
            fingerprint: identity.fingerprint().to_string(),
        }
    }

    fn encode(identity: &Identity) -> Result<Vec<u8>, IdentityError> {
        serde_json::to_vec_pretty(&Self::new(identity))
            .map_err(|e| IdentityError::GenerationError(e.to_string()))
    }
}

/// Generate a keypair and persist both halves under `paths`.
///
/// Never overwrites: fails with [`IdentityError::AlreadyExists`] if a private
/// key is present, including when another process wins a concurrent race.
pub fn generate(
    store: &dyn KeyStore,
    paths: &KeyPaths,
    bits: u32,
) -> Result<Identity, IdentityError> {
    if bits < MIN_KEY_BITS {
        return Err(IdentityError::GenerationError(format!(
            "requested strength {bits} is below the minimum of {MIN_KEY_BITS}"
        )));
    }
    if store.exists(paths) {
        return Err(IdentityError::AlreadyExists(paths.dir().display().to_string()));
    }

    let identity = Identity::generate()?;
    store.prepare(paths)?;

    let private = serde_json::to_vec_pretty(&StoredPrivateKey::new(&identity))
        .map_err(|e| IdentityError::GenerationError(e.to_string()))?;
    match store.create_new(&paths.private_path(), &private) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(IdentityError::AlreadyExists(paths.dir().display().to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    store.write_atomic(&paths.public_path(), &StoredPublicKey::encode(&identity)?)?;

    info!(fingerprint = %identity.fingerprint(), "keypair saved to {}", paths.dir().display());
    Ok(identity)
}

/// Load the keypair stored under `paths`.
///
/// A missing public half is rebuilt from the private seed; a public half that
/// disagrees with the private seed is reported as corrupt.
pub fn load(store: &dyn KeyStore, paths: &KeyPaths) -> Result<Identity, IdentityError> {
    let private = store
        .read_private(paths)?
        .ok_or_else(|| IdentityError::NotFound(paths.private_path().display().to_string()))?;

    let stored: StoredPrivateKey = serde_json::from_slice(&private)
        .map_err(|e| IdentityError::CorruptKey(format!("private key file: {e}")))?;
    let identity = stored.into_identity()?;

    match store.read_public(paths)? {
        Some(public) => {
            let stored: StoredPublicKey = serde_json::from_slice(&public)
                .map_err(|e| IdentityError::CorruptKey(format!("public key file: {e}")))?;
            let public_key = hex::decode(&stored.public_key)
                .map_err(|e| IdentityError::CorruptKey(format!("public key: {e}")))?;
            if public_key != identity.public_key() {
                return Err(IdentityError::CorruptKey(
                    "public key does not match private key".to_string(),
                ));
            }
            if stored.fingerprint != fingerprint(&public_key).as_str() {
                return Err(IdentityError::CorruptKey(
                    "stored fingerprint does not match public key".to_string(),
                ));
            }
        }
        None => {
            warn!("public key missing at {}, rebuilding", paths.public_path().display());
            store.write_atomic(&paths.public_path(), &StoredPublicKey::encode(&identity)?)?;
        }
    }

    Ok(identity)
}

/// Wait until a private key exists under `paths`, then wait `settle` more.
///
/// Re-checks every `poll_interval`. Returns [`IdentityError::Cancelled`] as
/// soon as `shutdown` carries `true` or its sender is dropped.
pub async fn wait_until_present(
    store: &dyn KeyStore,
    paths: &KeyPaths,
    poll_interval: Duration,
    settle: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), IdentityError> {
    loop {
        if *shutdown.borrow() {
            return Err(IdentityError::Cancelled);
        }

        if store.exists(paths) {
            tokio::select! {
                _ = tokio::time::sleep(settle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(IdentityError::Cancelled);
                    }
                }
            }
            info!("{} found", paths.private_path().display());
            return Ok(());
        }

        debug!("waiting for {} ...", paths.private_path().display());
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Err(IdentityError::Cancelled);
                }
            }
        }
    }
}
