//! Depot Keys – authority key material, certificates and key protection

pub mod authority;
pub mod certificate;
pub mod codec;
pub mod error;

pub use error::{KeyError, Result};

pub use authority::{
    generate_authority_key, pkcs1_der, self_signed_authority, Authority, LeafRequest, SubjectName,
    AUTHORITY_KEY_BITS,
};

pub use certificate::{serial_to_i64, Certificate, CERTIFICATE_PEM_TAG};

pub use codec::{is_encrypted_block, KeyCodec, DEFAULT_ITERATIONS, KEY_PEM_TAG, MIN_ITERATIONS};
