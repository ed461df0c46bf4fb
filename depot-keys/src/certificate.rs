//! X.509 certificate wrapper
//!
//! Holds the DER encoding of a certificate together with the fields the
//! depot needs for record keeping: subject attributes, serial number and
//! validity window.

use chrono::{DateTime, Utc};
use openssl::x509::X509;
use pem::Pem;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::AttributeTypeAndValue;

use crate::error::{KeyError, Result};

pub const CERTIFICATE_PEM_TAG: &str = "CERTIFICATE";

/// Standard X.509 certificate wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// DER-encoded certificate bytes
    der_bytes: Vec<u8>,
    /// Subject CN; `None` when absent or empty
    common_name: Option<String>,
    organization: Option<String>,
    country: Option<String>,
    /// Serial number as DER INTEGER content bytes (two's complement, big endian)
    raw_serial: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Create from DER-encoded bytes
    pub fn from_der(der_bytes: Vec<u8>) -> Result<Self> {
        let (_, parsed) = X509Certificate::from_der(&der_bytes)
            .map_err(|e| KeyError::Certificate(format!("Failed to parse certificate: {e}")))?;

        let subject = parsed.subject();
        let common_name = first_attribute(subject.iter_common_name())?.filter(|cn| !cn.is_empty());
        let organization = first_attribute(subject.iter_organization())?;
        let country = first_attribute(subject.iter_country())?;
        let raw_serial = parsed.tbs_certificate.raw_serial().to_vec();
        let not_before = to_utc(parsed.validity().not_before.timestamp())?;
        let not_after = to_utc(parsed.validity().not_after.timestamp())?;

        Ok(Self {
            der_bytes,
            common_name,
            organization,
            country,
            raw_serial,
            not_before,
            not_after,
        })
    }

    /// Parse a `CERTIFICATE` PEM block. Any other block type is an integrity error.
    pub fn from_pem(text: &str) -> Result<Self> {
        let block = pem::parse(text)?;
        if block.tag() != CERTIFICATE_PEM_TAG {
            return Err(KeyError::Integrity(format!(
                "PEM block not a certificate: '{}'",
                block.tag()
            )));
        }
        Self::from_der(block.into_contents())
    }

    pub fn from_openssl(cert: &X509) -> Result<Self> {
        Self::from_der(cert.to_der()?)
    }

    pub fn to_pem(&self) -> String {
        pem::encode(&Pem::new(CERTIFICATE_PEM_TAG, self.der_bytes.clone()))
    }

    pub fn to_openssl(&self) -> Result<X509> {
        Ok(X509::from_der(&self.der_bytes)?)
    }

    pub fn der_bytes(&self) -> &[u8] {
        &self.der_bytes
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn raw_serial(&self) -> &[u8] {
        &self.raw_serial
    }

    /// Serial number as `i64`, or `None` when it does not fit
    pub fn serial_i64(&self) -> Option<i64> {
        serial_to_i64(&self.raw_serial)
    }

    /// Lowercase hex SHA-256 digest of the DER encoding
    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.der_bytes))
    }
}

fn first_attribute<'a, 'b: 'a>(
    mut values: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Result<Option<String>> {
    values
        .next()
        .map(|attr| {
            attr.as_str()
                .map(str::to_string)
                .map_err(|e| KeyError::Certificate(format!("Unreadable subject attribute: {e}")))
        })
        .transpose()
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| KeyError::Certificate(format!("Validity time out of range: {timestamp}")))
}

/// Interpret DER INTEGER content bytes as a signed 64-bit value
pub fn serial_to_i64(raw: &[u8]) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }
    let negative = raw[0] & 0x80 != 0;
    let pad = if negative { 0xff } else { 0x00 };

    // Drop sign-extension bytes that do not change the value
    let mut bytes = raw;
    while bytes.len() > 1 && bytes[0] == pad && (bytes[1] & 0x80 != 0) == negative {
        bytes = &bytes[1..];
    }
    if bytes.len() > 8 {
        return None;
    }

    let mut buf = [pad; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    Some(i64::from_be_bytes(buf))
}
