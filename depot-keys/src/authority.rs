//! Authority key material and certificate construction
//!
//! The authority is an RSA-2048 key with a self-signed CA certificate.
//! [`Authority`] is the decrypted, in-memory form handed to callers once the
//! depot has created or loaded it.

use std::fmt;

use chrono::{Months, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder};
use zeroize::Zeroizing;

use crate::certificate::Certificate;
use crate::error::{KeyError, Result};

pub const AUTHORITY_KEY_BITS: u32 = 2048;

/// Subject attributes of a certificate. Empty attributes are left out of the name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubjectName {
    pub common_name: String,
    pub organization: String,
    pub country: String,
}

impl SubjectName {
    pub fn new(
        common_name: impl Into<String>,
        organization: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            organization: organization.into(),
            country: country.into(),
        }
    }

    fn to_x509_name(&self) -> Result<X509Name> {
        let mut name_builder = X509NameBuilder::new()?;
        for (nid, value) in [
            (Nid::COUNTRYNAME, &self.country),
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::COMMONNAME, &self.common_name),
        ] {
            if !value.is_empty() {
                name_builder.append_entry_by_nid(nid, value).map_err(|e| {
                    KeyError::Certificate(format!("Failed to set subject attribute: {e}"))
                })?;
            }
        }
        Ok(name_builder.build())
    }
}

/// Generate a fresh authority key pair
pub fn generate_authority_key() -> Result<PKey<Private>> {
    let rsa = Rsa::generate(AUTHORITY_KEY_BITS)
        .map_err(|e| KeyError::Crypto(format!("RSA key generation failed: {e}")))?;
    Ok(PKey::from_rsa(rsa)?)
}

/// PKCS#1 DER encoding of an RSA private key
pub fn pkcs1_der(key: &PKey<Private>) -> Result<Zeroizing<Vec<u8>>> {
    Ok(Zeroizing::new(key.rsa()?.private_key_to_der()?))
}

/// Build the self-signed CA certificate for `key`
pub fn self_signed_authority(
    key: &PKey<Private>,
    subject: &SubjectName,
    validity_years: u32,
    serial: i64,
) -> Result<Certificate> {
    let name = subject.to_x509_name()?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = serial_number(serial)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(years_in_days(validity_years)?)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()?,
    )?;
    let subject_key_id = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(subject_key_id)?;

    builder.sign(key, MessageDigest::sha256())?;
    Certificate::from_openssl(&builder.build())
}

/// End-entity certificate to be signed by the authority
pub struct LeafRequest<'a, T: HasPublic> {
    pub public_key: &'a PKeyRef<T>,
    pub subject: SubjectName,
    pub validity_days: u32,
}

/// Decrypted authority certificate and private key
#[derive(Clone)]
pub struct Authority {
    certificate: Certificate,
    private_key: PKey<Private>,
}

impl Authority {
    /// Pair a certificate with its private key; fails if they do not match
    pub fn new(certificate: Certificate, private_key: PKey<Private>) -> Result<Self> {
        let cert_key = certificate.to_openssl()?.public_key()?;
        if !cert_key.public_eq(&private_key) {
            return Err(KeyError::Integrity(
                "authority key does not match authority certificate".to_string(),
            ));
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Rebuild from a certificate and a PKCS#1 DER private key
    pub fn from_pkcs1_der(certificate: Certificate, private_key_der: &[u8]) -> Result<Self> {
        let rsa = Rsa::private_key_from_der(private_key_der)
            .map_err(|e| KeyError::InvalidKeyFormat(format!("PKCS#1 decoding error: {e}")))?;
        Self::new(certificate, PKey::from_rsa(rsa)?)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Certificate chain presented to enrolling clients
    pub fn chain(&self) -> Vec<Certificate> {
        vec![self.certificate.clone()]
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// Private key in PKCS#1 DER format
    pub fn private_key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        pkcs1_der(&self.private_key)
    }

    /// Sign an end-entity certificate carrying `serial`
    pub fn sign_leaf<T: HasPublic>(&self, request: &LeafRequest<'_, T>, serial: i64) -> Result<Certificate> {
        let ca_cert = self.certificate.to_openssl()?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let serial = serial_number(serial)?;
        let subject = request.subject.to_x509_name()?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(request.validity_days)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(ca_cert.subject_name())?;
        builder.set_pubkey(request.public_key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;
        let subject_key_id = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(subject_key_id)?;
        let authority_key_id = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(&*ca_cert), None))?;
        builder.append_extension(authority_key_id)?;

        builder.sign(&self.private_key, MessageDigest::sha256())?;
        Certificate::from_openssl(&builder.build())
    }

    /// Check that `certificate` carries a valid signature from this authority
    pub fn issued(&self, certificate: &Certificate) -> Result<bool> {
        Ok(certificate.to_openssl()?.verify(&self.private_key)?)
    }
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("certificate", &self.certificate.common_name())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn serial_number(serial: i64) -> Result<Asn1Integer> {
    if serial <= 0 {
        return Err(KeyError::Certificate(format!(
            "serial number must be positive, got {serial}"
        )));
    }
    Ok(BigNum::from_slice(&serial.to_be_bytes())?.to_asn1_integer()?)
}

fn years_in_days(years: u32) -> Result<u32> {
    let now = Utc::now();
    let end = years
        .checked_mul(12)
        .and_then(|months| now.checked_add_months(Months::new(months)))
        .ok_or_else(|| KeyError::Certificate(format!("validity of {years} years out of range")))?;
    u32::try_from((end - now).num_days())
        .map_err(|_| KeyError::Certificate(format!("validity of {years} years out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_years_in_days() {
        let ten = years_in_days(10).unwrap();
        assert!((3652..=3653).contains(&ten), "got {ten}");
        assert_eq!(years_in_days(0).unwrap(), 0);
    }

    #[test]
    fn test_serial_must_be_positive() {
        assert!(serial_number(0).is_err());
        assert!(serial_number(-5).is_err());
        assert!(serial_number(i64::MAX).is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = generate_authority_key().unwrap();
        let cert =
            self_signed_authority(&key, &SubjectName::new("Debug CA", "", ""), 1, 1).unwrap();
        let authority = Authority::new(cert, key).unwrap();
        let rendered = format!("{authority:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("Debug CA"));
    }
}
