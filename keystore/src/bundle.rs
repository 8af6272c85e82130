//! PKCS#12 keystore encoding.
//!
//! Bundles are written with PBES2 (PBKDF2-HMAC-SHA256, AES-256-CBC) for both
//! the key and the certificate, and an HMAC-SHA256 integrity MAC, which is
//! what current OpenSSL and Java expect by default.

use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use p12_keystore::{
    Certificate as P12Certificate, EncryptionAlgorithm, KeyStore, KeyStoreEntry, MacAlgorithm,
    PrivateKeyChain,
};
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use rsa::{pkcs8::DecodePrivateKey, traits::PublicKeyParts, RsaPrivateKey};
use x509_parser::time::ASN1Time;

use crate::cert::Identity;
use crate::traits::{self, with_x509, CaConstraint, CertExt};

/// Seal an identity into a password protected PKCS#12 bundle.
///
/// The bundle holds the private key and the certificate under the alias
/// (friendly name) `name`, and no CA certificates.
pub fn seal(identity: &Identity, name: &str, password: &str) -> Result<Vec<u8>> {
    let cert = P12Certificate::from_der(identity.cert_der())
        .map_err(|e| anyhow!("Failed to load certificate into keystore: {e:?}"))?;
    // Java links key and certificate through the SHA-1 of the certificate.
    let local_key_id = digest(&SHA1_FOR_LEGACY_USE_ONLY, identity.cert_der());
    let chain = PrivateKeyChain::new(identity.key_der(), local_key_id.as_ref(), [cert]);

    let mut keystore = KeyStore::new();
    keystore.add_entry(name, KeyStoreEntry::PrivateKeyChain(chain));
    keystore
        .writer(password)
        .encryption_algorithm(EncryptionAlgorithm::PbeWithHmacSha256AndAes256)
        .mac_algorithm(MacAlgorithm::HmacSha256)
        .write()
        .map_err(|e| anyhow!("Failed to build PKCS#12 bundle: {e:?}"))
}

/// Open a PKCS#12 bundle holding exactly one key and one certificate.
///
/// A wrong password fails the integrity check.
pub fn open(der: &[u8], password: &str) -> Result<OpenedBundle> {
    let keystore = KeyStore::from_pkcs12(der, password)
        .map_err(|e| anyhow!("Failed to open PKCS#12 bundle: {e:?}"))?;

    let mut opened = None;
    for (alias, entry) in keystore.entries() {
        let KeyStoreEntry::PrivateKeyChain(chain) = entry else {
            bail!("Unexpected non-key entry {alias} in bundle");
        };
        if opened.is_some() {
            bail!("Expected one private key in bundle, found several");
        }
        let certs = chain.chain();
        if certs.len() != 1 {
            bail!("Expected one certificate in bundle, found {}", certs.len());
        }
        opened = Some(OpenedBundle {
            alias: alias.to_string(),
            key_der: chain.key().to_vec(),
            cert_der: certs[0].as_der().to_vec(),
        });
    }
    opened.context("Expected one private key in bundle, found none")
}

/// The decrypted contents of a bundle.
#[derive(Debug, Clone)]
pub struct OpenedBundle {
    /// Friendly name of the key entry.
    pub alias: String,
    /// PKCS#8 DER private key.
    pub key_der: Vec<u8>,
    /// DER certificate.
    pub cert_der: Vec<u8>,
}

impl CertExt for OpenedBundle {
    fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }
}

impl OpenedBundle {
    /// Whether the private key is the one the certificate was issued for.
    pub fn key_matches_cert(&self) -> Result<bool> {
        let (modulus, exponent) = self.rsa_public_key()?;
        self.key_matches(&modulus, &exponent)
    }

    fn key_matches(&self, modulus: &[u8], exponent: &[u8]) -> Result<bool> {
        let key =
            RsaPrivateKey::from_pkcs8_der(&self.key_der).context("Failed to decode private key")?;
        Ok(key.n().to_bytes_be() == modulus && key.e().to_bytes_be() == exponent)
    }

    /// Collect the interesting certificate fields.
    pub fn summary(&self) -> Result<BundleSummary> {
        with_x509(&self.cert_der, |cert| {
            let (not_before, not_after) = traits::validity(cert);
            let (modulus, exponent) = traits::rsa_public_key(cert)?;
            Ok(BundleSummary {
                alias: self.alias.clone(),
                common_name: traits::common_name(cert)?,
                self_issued: traits::is_self_issued(cert),
                serial: traits::serial_hex(cert),
                not_before,
                not_after,
                ca: traits::ca_constraint(cert)?,
                signature_algorithm: traits::signature_algorithm(cert),
                key_matches_cert: self.key_matches(&modulus, &exponent)?,
            })
        })
    }
}

/// Human oriented view of an opened bundle.
#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub alias: String,
    pub common_name: Option<String>,
    pub self_issued: bool,
    pub serial: String,
    pub not_before: ASN1Time,
    pub not_after: ASN1Time,
    pub ca: Option<CaConstraint>,
    pub signature_algorithm: String,
    pub key_matches_cert: bool,
}

impl fmt::Display for BundleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "alias:            {}", self.alias)?;
        writeln!(
            f,
            "common name:      {}",
            self.common_name.as_deref().unwrap_or("<none>")
        )?;
        writeln!(f, "self-issued:      {}", self.self_issued)?;
        writeln!(f, "serial:           {}", self.serial)?;
        writeln!(f, "not before:       {}", self.not_before)?;
        writeln!(f, "not after:        {}", self.not_after)?;
        match &self.ca {
            Some(ca) => {
                let path_len = ca
                    .path_len
                    .map_or_else(|| "unconstrained".to_string(), |n| n.to_string());
                writeln!(
                    f,
                    "basic constraints: ca={} path_len={} critical={}",
                    ca.ca, path_len, ca.critical
                )?;
            }
            None => writeln!(f, "basic constraints: <absent>")?,
        }
        writeln!(f, "signature:        {}", self.signature_algorithm)?;
        write!(f, "key matches cert: {}", self.key_matches_cert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::SubjectTemplate;
    use std::process::Command;
    use std::sync::OnceLock;

    const PASSWORD: &str = "changeit";

    // DER encodings (tag, length, value) of the algorithm identifiers.
    const OID_PBES2: &[u8] = &[
        0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x05, 0x0d,
    ];
    const OID_AES_256_CBC: &[u8] = &[
        0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x01, 0x2a,
    ];
    const OID_SHA256: &[u8] = &[
        0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    ];
    // pkcs-12PbeIds arc, shared by the RC2, RC4 and 3DES schemes.
    const OID_PKCS12_PBE_PREFIX: &[u8] = &[
        0x06, 0x0a, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x0c, 0x01,
    ];

    fn identity() -> &'static Identity {
        static IDENTITY: OnceLock<Identity> = OnceLock::new();
        IDENTITY.get_or_init(|| {
            Identity::generate("auth-service", &SubjectTemplate::default()).unwrap()
        })
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_seal_and_open() {
        let der = seal(identity(), "auth-service", PASSWORD).unwrap();
        assert!(!der.is_empty());

        let opened = open(&der, PASSWORD).unwrap();
        assert_eq!(opened.alias, "auth-service");
        assert_eq!(opened.cert_der, identity().cert_der());
        assert_eq!(opened.key_der, identity().key_der());
        assert!(opened.key_matches_cert().unwrap());
    }

    #[test]
    fn test_bundle_uses_pbes2_aes256() {
        let der = seal(identity(), "auth-service", PASSWORD).unwrap();

        assert!(contains(&der, OID_PBES2), "PBES2 not used");
        assert!(contains(&der, OID_AES_256_CBC), "AES-256-CBC not used");
        assert!(contains(&der, OID_SHA256), "SHA-256 MAC not used");
        assert!(
            !contains(&der, OID_PKCS12_PBE_PREFIX),
            "legacy PKCS#12 PBE scheme used"
        );
    }

    #[test]
    fn test_openssl_reads_bundle() {
        let Ok(version) = Command::new("openssl").arg("version").output() else {
            eprintln!("openssl not installed, skipping");
            return;
        };
        eprintln!("{}", String::from_utf8_lossy(&version.stdout));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("auth-keystore.p12");
        let der = seal(identity(), "auth-service", PASSWORD).unwrap();
        fs_err::write(&path, der).unwrap();

        let output = Command::new("openssl")
            .args(["pkcs12", "-nodes", "-info", "-in"])
            .arg(&path)
            .args(["-passin", &format!("pass:{PASSWORD}")])
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(output.status.success(), "openssl failed: {stderr}");
        assert!(stdout.contains("BEGIN CERTIFICATE"));
        assert!(stdout.contains("BEGIN PRIVATE KEY"));
        assert!(stdout.contains("auth-service"));
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let der = seal(identity(), "auth-service", PASSWORD).unwrap();
        assert!(open(&der, "letmein").is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(open(b"definitely not pkcs12", PASSWORD).is_err());
    }

    #[test]
    fn test_summary() {
        let der = seal(identity(), "auth-service", PASSWORD).unwrap();
        let summary = open(&der, PASSWORD).unwrap().summary().unwrap();

        assert_eq!(summary.alias, "auth-service");
        assert_eq!(summary.common_name.as_deref(), Some("auth-service"));
        assert!(summary.self_issued);
        assert!(summary.key_matches_cert);
        assert_eq!(
            summary.ca,
            Some(CaConstraint {
                ca: true,
                path_len: None,
                critical: true,
            })
        );
        assert!(summary.not_before < summary.not_after);
        assert!(summary.to_string().contains("auth-service"));
    }

    #[test]
    fn test_foreign_key_does_not_match() {
        let other = Identity::generate("data-service", &SubjectTemplate::default()).unwrap();
        let mismatched = OpenedBundle {
            alias: "auth-service".into(),
            key_der: other.key_der(),
            cert_der: identity().cert_der().to_vec(),
        };
        assert!(!mismatched.key_matches_cert().unwrap());
        assert!(!mismatched.summary().unwrap().key_matches_cert);
    }
}
