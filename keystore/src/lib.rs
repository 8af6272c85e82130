//! Self-signed TLS keystores for the lab services.
//!
//! Each service gets its own RSA key and self-signed CA certificate, packed
//! into a password protected PKCS#12 file that the service loads at startup.
//!
//! ```no_run
//! use lab_keystore::provision::{IdentitySpec, ProvisionConfig, DEFAULT_PASSWORD};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ProvisionConfig::builder()
//!         .identities(vec![IdentitySpec::new(
//!             "auth-service",
//!             "auth-service/src/main/resources/tls/auth-keystore.p12",
//!         )])
//!         .password(DEFAULT_PASSWORD)
//!         .build();
//!     for outcome in config.provision()? {
//!         println!("{} -> {}", outcome.common_name, outcome.path.display());
//!     }
//!     Ok(())
//! }
//! ```

pub extern crate rcgen;

pub mod bundle;
pub mod cert;
pub mod provision;
pub mod traits;
pub mod workdir;
