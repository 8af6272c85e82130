use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use documented::DocumentedFields;
use fs_err as fs;
use lab_keystore::bundle;
use lab_keystore::cert::SubjectTemplate;
use lab_keystore::provision::{
    IdentitySpec, ProvisionConfig, ProvisionOutcome, ProvisionStatus, DEFAULT_PASSWORD,
};
use serde::{Deserialize, Serialize};
use toml_edit::ser::to_document;
use tracing::info;

const PASSWORD_ENV: &str = "KEYSTORE_PASSWORD";
const DEFAULT_CONFIG: &str = "keystore-gen.toml";

/// Generate self-signed PKCS#12 keystores for the lab services
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a keystore for every configured identity
    Generate {
        /// Path to the configuration file, defaults are used if it does not exist
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Keep keystores that already exist
        #[arg(long)]
        skip_existing: bool,
    },
    /// Show the certificate inside a keystore
    Inspect {
        /// Path to the keystore
        path: PathBuf,
        /// Keystore password, falls back to KEYSTORE_PASSWORD and then the default
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Debug, PartialEq, Deserialize, Serialize, DocumentedFields)]
struct Config {
    /// Directory that relative keystore paths are resolved against
    workdir: PathBuf,
    /// Keystore password. The KEYSTORE_PASSWORD environment variable takes precedence
    password: String,
    /// Keep keystores that already exist instead of regenerating them
    skip_existing: bool,
    /// Organizational unit of every certificate subject
    org_unit: String,
    /// Organization of every certificate subject
    organization: String,
    /// Locality of every certificate subject
    locality: String,
    /// State or province of every certificate subject
    state: String,
    /// Country code of every certificate subject
    country: String,
    /// Keystores to generate, one per service
    identities: Vec<IdentitySpec>,
}

impl Default for Config {
    fn default() -> Self {
        let subject = SubjectTemplate::default();
        Self {
            workdir: ".".into(),
            password: DEFAULT_PASSWORD.into(),
            skip_existing: false,
            org_unit: subject.org_unit,
            organization: subject.organization,
            locality: subject.locality,
            state: subject.state,
            country: subject.country,
            identities: vec![
                IdentitySpec::new(
                    "auth-service",
                    "auth-service/src/main/resources/tls/auth-keystore.p12",
                ),
                IdentitySpec::new(
                    "data-service",
                    "data-service/src/main/resources/tls/data-keystore.p12",
                ),
            ],
        }
    }
}

impl Config {
    fn to_commented_toml(&self) -> Result<String> {
        let mut doc = to_document(self)?;

        for (i, (mut key, _value)) in doc.iter_mut().enumerate() {
            let decor = key.leaf_decor_mut();
            let docstring = Self::FIELD_DOCS[i];

            let mut comment = String::new();
            for line in docstring.lines() {
                let line = if line.is_empty() {
                    String::from("#\n")
                } else {
                    format!("# {line}\n")
                };
                comment.push_str(&line);
            }
            decor.set_prefix(comment);
        }
        Ok(doc.to_string())
    }

    fn with_password_override(mut self, password: Option<String>) -> Self {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.password = password;
        }
        self
    }

    fn into_provision_config(self, skip_existing: bool) -> ProvisionConfig {
        let subject = SubjectTemplate {
            org_unit: self.org_unit,
            organization: self.organization,
            locality: self.locality,
            state: self.state,
            country: self.country,
        };
        ProvisionConfig::builder()
            .identities(self.identities)
            .password(self.password)
            .subject(subject)
            .workdir(self.workdir)
            .skip_existing(self.skip_existing || skip_existing)
            .build()
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        toml_edit::de::from_str(&fs::read_to_string(path)?)?
    } else {
        info!("{} not found, using default configuration", path.display());
        Config::default()
    };
    Ok(config.with_password_override(env_password()))
}

/// `KEYSTORE_PASSWORD`, unless unset or empty.
fn env_password() -> Option<String> {
    std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty())
}

fn inspect_password(arg: Option<String>, env: Option<String>) -> String {
    arg.or(env.filter(|p| !p.is_empty()))
        .unwrap_or_else(|| DEFAULT_PASSWORD.to_string())
}

fn confirmation(outcome: &ProvisionOutcome) -> String {
    match outcome.status {
        ProvisionStatus::Generated => format!(
            "Generated keystore for {} at {}",
            outcome.common_name,
            outcome.path.display()
        ),
        ProvisionStatus::Skipped => format!(
            "Kept existing keystore for {} at {}",
            outcome.common_name,
            outcome.path.display()
        ),
    }
}

fn generate(config: &Path, skip_existing: bool) -> Result<()> {
    let provision = load_config(config)
        .context("Failed to load configuration")?
        .into_provision_config(skip_existing);
    provision.provision_each(|outcome| println!("{}", confirmation(outcome)))
}

fn inspect(path: &Path, password: Option<String>) -> Result<()> {
    let password = inspect_password(password, env_password());
    let der = fs::read(path)?;
    let opened = bundle::open(&der, &password).context("Failed to open keystore")?;
    let summary = opened.summary().context("Failed to read certificate")?;
    println!("{summary}");
    Ok(())
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    match args.command {
        None => generate(Path::new(DEFAULT_CONFIG), false)?,
        Some(Command::Generate {
            config,
            skip_existing,
        }) => generate(&config, skip_existing)?,
        Some(Command::Inspect { path, password }) => inspect(&path, password)?,
        Some(Command::Cfg { write_to }) => {
            let toml_str = Config::default().to_commented_toml()?;
            match write_to {
                Some(path) => fs::write(path, toml_str)?,
                None => println!("{}", toml_str),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_parses_back_to_default() {
        let toml_str = Config::default().to_commented_toml().unwrap();
        assert!(toml_str.contains("# Directory that relative keystore paths are resolved against"));

        let parsed: Config = toml_edit::de::from_str(&toml_str).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_default_identities() {
        let config = Config::default();
        let names: Vec<_> = config
            .identities
            .iter()
            .map(|spec| spec.common_name.as_str())
            .collect();
        assert_eq!(names, ["auth-service", "data-service"]);
        assert_eq!(config.password, "changeit");
    }

    #[test]
    fn test_password_override() {
        let config = Config::default().with_password_override(Some("from-env".into()));
        assert_eq!(config.password, "from-env");

        let config = Config::default().with_password_override(Some(String::new()));
        assert_eq!(config.password, DEFAULT_PASSWORD);

        let config = Config::default().with_password_override(None);
        assert_eq!(config.password, DEFAULT_PASSWORD);
    }

    #[test]
    fn test_inspect_password_matches_generate() {
        assert_eq!(inspect_password(None, Some(String::new())), DEFAULT_PASSWORD);
        assert_eq!(inspect_password(None, None), DEFAULT_PASSWORD);
        assert_eq!(inspect_password(None, Some("from-env".into())), "from-env");
        assert_eq!(
            inspect_password(Some("from-arg".into()), Some("from-env".into())),
            "from-arg"
        );

        let generated = Config::default().with_password_override(Some(String::new()));
        assert_eq!(
            inspect_password(None, Some(String::new())),
            generated.password
        );
    }

    #[test]
    fn test_config_file_with_extra_service() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keystore-gen.toml");
        fs::write(
            &path,
            r#"
workdir = "lab3"
password = "changeit"
skip_existing = true
org_unit = "Lab3"
organization = "DistributedSystems"
locality = "Moscow"
state = "Moscow"
country = "RU"

[[identities]]
common_name = "auth-service"
output_path = "auth-service/tls/auth-keystore.p12"

[[identities]]
common_name = "gateway"
output_path = "gateway/tls/gateway-keystore.p12"
"#,
        )
        .unwrap();

        let config: Config = toml_edit::de::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.workdir, PathBuf::from("lab3"));
        assert!(config.skip_existing);
        assert_eq!(
            config.identities[1],
            IdentitySpec::new("gateway", "gateway/tls/gateway-keystore.p12")
        );
    }

    #[test]
    fn test_confirmation_line() {
        let outcome = ProvisionOutcome {
            common_name: "auth-service".into(),
            path: PathBuf::from("tls/auth-keystore.p12"),
            status: ProvisionStatus::Generated,
        };
        assert_eq!(
            confirmation(&outcome),
            "Generated keystore for auth-service at tls/auth-keystore.p12"
        );
    }
}
