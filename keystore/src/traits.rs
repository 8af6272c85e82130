//! Traits for the crate

use anyhow::{anyhow, bail, Context, Result};
use x509_parser::prelude::{FromDer as _, X509Certificate};
use x509_parser::public_key::PublicKey;
use x509_parser::time::ASN1Time;

/// The basic constraints extension of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaConstraint {
    /// Whether the certificate may issue other certificates.
    pub ca: bool,
    /// Maximum path length, `None` when unconstrained.
    pub path_len: Option<u32>,
    /// Whether the extension is marked critical.
    pub critical: bool,
}

/// Types that carry a DER certificate which can be inspected.
///
/// Every accessor parses the certificate on its own; use [`with_x509`] and the
/// free functions of this module to read several fields from one parse.
pub trait CertExt {
    /// The DER encoding of the certificate.
    fn cert_der(&self) -> &[u8];

    /// Get the first common name of the subject.
    fn common_name(&self) -> Result<Option<String>> {
        with_x509(self.cert_der(), common_name)
    }

    /// Whether subject and issuer are the same name.
    fn is_self_issued(&self) -> Result<bool> {
        with_x509(self.cert_der(), |cert| Ok(is_self_issued(cert)))
    }

    /// Get the basic constraints extension, if present.
    fn ca_constraint(&self) -> Result<Option<CaConstraint>> {
        with_x509(self.cert_der(), ca_constraint)
    }

    /// The `(not_before, not_after)` bounds.
    fn validity(&self) -> Result<(ASN1Time, ASN1Time)> {
        with_x509(self.cert_der(), |cert| Ok(validity(cert)))
    }

    /// Serial number as lowercase hex.
    fn serial_hex(&self) -> Result<String> {
        with_x509(self.cert_der(), |cert| Ok(serial_hex(cert)))
    }

    /// Dotted OID of the signature algorithm.
    fn signature_algorithm(&self) -> Result<String> {
        with_x509(self.cert_der(), |cert| Ok(signature_algorithm(cert)))
    }

    /// Big-endian `(modulus, exponent)` of the RSA subject key, without leading zeros.
    fn rsa_public_key(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        with_x509(self.cert_der(), rsa_public_key)
    }
}

/// Parse `der` once and hand the certificate to `f`.
pub fn with_x509<T>(der: &[u8], f: impl FnOnce(&X509Certificate<'_>) -> Result<T>) -> Result<T> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| anyhow!("Failed to parse certificate: {e}"))?;
    f(&cert)
}

/// First common name of the subject.
pub fn common_name(cert: &X509Certificate<'_>) -> Result<Option<String>> {
    cert.subject()
        .iter_common_name()
        .next()
        .map(|cn| cn.as_str().map(str::to_string))
        .transpose()
        .context("Failed to decode common name")
}

pub fn is_self_issued(cert: &X509Certificate<'_>) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw()
}

pub fn ca_constraint(cert: &X509Certificate<'_>) -> Result<Option<CaConstraint>> {
    let found = cert
        .basic_constraints()
        .context("Failed to decode basic constraints")?
        .map(|ext| CaConstraint {
            ca: ext.value.ca,
            path_len: ext.value.path_len_constraint,
            critical: ext.critical,
        });
    Ok(found)
}

pub fn validity(cert: &X509Certificate<'_>) -> (ASN1Time, ASN1Time) {
    let validity = cert.validity();
    (validity.not_before, validity.not_after)
}

pub fn serial_hex(cert: &X509Certificate<'_>) -> String {
    hex::encode(cert.raw_serial())
}

pub fn signature_algorithm(cert: &X509Certificate<'_>) -> String {
    cert.signature_algorithm.algorithm.to_id_string()
}

/// Big-endian `(modulus, exponent)` of the RSA subject key, without leading zeros.
pub fn rsa_public_key(cert: &X509Certificate<'_>) -> Result<(Vec<u8>, Vec<u8>)> {
    let parsed = cert
        .public_key()
        .parsed()
        .context("Failed to parse subject public key")?;
    let PublicKey::RSA(rsa) = parsed else {
        bail!("Subject public key is not RSA");
    };
    Ok((strip_zeros(rsa.modulus), strip_zeros(rsa.exponent)))
}

fn strip_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

impl CertExt for rcgen::Certificate {
    fn cert_der(&self) -> &[u8] {
        self.der()
    }
}
