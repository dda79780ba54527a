pub mod blob;
pub mod cipher;
pub mod key;
pub mod persistence;

pub use blob::EncryptedBlob;
pub use cipher::SecureStore;
pub use key::SecretKey;
pub use persistence::SealedStateFile;
