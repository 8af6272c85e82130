//! Self-signed identity creation.
//!
//! Everything in here is pure: keys and certificates are built in memory and
//! handed back to the caller, nothing touches the filesystem.

use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    SerialNumber, PKCS_RSA_SHA256,
};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::{pkcs8::EncodePrivateKey, BigUint, RsaPrivateKey};
use rustls_pki_types::PrivatePkcs8KeyDer;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// RSA modulus size in bits.
pub const RSA_KEY_BITS: usize = 2048;
/// RSA public exponent.
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;
/// How far `not_before` lies in the past, to tolerate clock skew between hosts.
pub const BACKDATE: Duration = Duration::from_secs(24 * 60 * 60);
/// Certificate lifetime counted from generation time.
pub const VALIDITY: Duration = Duration::from_secs(5 * 365 * 24 * 60 * 60);

const SERIAL_LEN: usize = 20;

/// Subject attributes shared by every generated certificate.
///
/// The common name is supplied per identity, the rest comes from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTemplate {
    /// Organizational unit (OU).
    pub org_unit: String,
    /// Organization (O).
    pub organization: String,
    /// Locality (L).
    pub locality: String,
    /// State or province (ST).
    pub state: String,
    /// Two-letter country code (C).
    pub country: String,
}

impl Default for SubjectTemplate {
    fn default() -> Self {
        Self {
            org_unit: "Lab3".into(),
            organization: "DistributedSystems".into(),
            locality: "Moscow".into(),
            state: "Moscow".into(),
            country: "RU".into(),
        }
    }
}

impl SubjectTemplate {
    fn distinguished_name(&self, common_name: &str) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationalUnitName, self.org_unit.as_str());
        dn.push(DnType::OrganizationName, self.organization.as_str());
        dn.push(DnType::LocalityName, self.locality.as_str());
        dn.push(DnType::StateOrProvinceName, self.state.as_str());
        dn.push(DnType::CountryName, self.country.as_str());
        dn
    }
}

/// Generate a fresh RSA key pair usable for SHA-256 signatures.
pub fn generate_rsa_key() -> Result<KeyPair> {
    let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
    let rsa_key = RsaPrivateKey::new_with_exp(&mut rand::rngs::OsRng, RSA_KEY_BITS, &exponent)
        .context("Failed to generate RSA key")?;
    let pkcs8 = rsa_key
        .to_pkcs8_der()
        .context("Failed to encode RSA key as PKCS#8")?;
    let key = KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(pkcs8.as_bytes()),
        &PKCS_RSA_SHA256,
    )
    .context("Failed to load RSA key")?;
    Ok(key)
}

/// A random positive serial number.
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = vec![0u8; SERIAL_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .ok()
        .context("Failed to draw serial number")?;
    // Keep the DER INTEGER positive.
    bytes[0] &= 0x7f;
    Ok(SerialNumber::from(bytes))
}

/// Information required to create a self-signed certificate.
#[derive(bon::Builder)]
pub struct IdentityRequest<'a> {
    key: &'a KeyPair,
    common_name: &'a str,
    subject: &'a SubjectTemplate,
    not_before: Option<SystemTime>,
    not_after: Option<SystemTime>,
    serial_number: Option<SerialNumber>,
    #[builder(default = true)]
    ca: bool,
}

impl IdentityRequest<'_> {
    fn into_cert_params(self) -> Result<CertificateParams> {
        let mut params = CertificateParams::default();
        params.distinguished_name = self.subject.distinguished_name(self.common_name);
        if self.ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        let now = SystemTime::now();
        params.not_before = self.not_before.unwrap_or(now - BACKDATE).into();
        params.not_after = self.not_after.unwrap_or(now + VALIDITY).into();
        params.serial_number = Some(match self.serial_number {
            Some(serial) => serial,
            None => random_serial()?,
        });
        Ok(params)
    }

    /// Create a certificate signed by its own key.
    pub fn self_signed(self) -> Result<Certificate> {
        let key = self.key;
        let cert = self
            .into_cert_params()?
            .self_signed(key)
            .context("Failed to self-sign certificate")?;
        Ok(cert)
    }
}

/// A freshly generated key pair and the self-signed certificate binding it.
pub struct Identity {
    key: KeyPair,
    cert: Certificate,
}

impl Identity {
    /// Generate a new identity valid from a day ago until five years from now.
    pub fn generate(common_name: &str, subject: &SubjectTemplate) -> Result<Self> {
        Self::generate_at(common_name, subject, SystemTime::now())
    }

    /// Like [`Identity::generate`], with the validity window anchored at `now`.
    pub fn generate_at(
        common_name: &str,
        subject: &SubjectTemplate,
        now: SystemTime,
    ) -> Result<Self> {
        debug!(common_name, bits = RSA_KEY_BITS, "generating key pair");
        let key = generate_rsa_key()?;
        let cert = IdentityRequest::builder()
            .key(&key)
            .common_name(common_name)
            .subject(subject)
            .not_before(now - BACKDATE)
            .not_after(now + VALIDITY)
            .build()
            .self_signed()?;
        Ok(Self { key, cert })
    }

    /// The key pair.
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// The certificate.
    pub fn cert(&self) -> &Certificate {
        &self.cert
    }

    /// PKCS#8 DER encoding of the private key.
    pub fn key_der(&self) -> Vec<u8> {
        self.key.serialize_der()
    }

    /// DER encoding of the certificate.
    pub fn cert_der(&self) -> &[u8] {
        self.cert.der()
    }
}
