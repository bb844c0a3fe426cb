//! Tessera license tool
//!
//! Issuer side:
//!   tessera keygen --dir keys/
//!   tessera hash-dir release/ > manifest.json
//!   tessera issue --key-dir keys/ --fingerprint <CODE> --expires 2027-12-31
//!
//! Client side:
//!   tessera fingerprint
//!   tessera install license.json
//!   tessera validate --public-key keys/public_spki.b64
//!
//! `validate` exits 0 on success and with a distinct code per failure kind.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tessera_cli::{
    exit_code, expiry_after_days, license_store, load_config, load_or_generate_keypair,
    load_public_key, parse_expiry, read_manifest, validate_installed, EXIT_FAILURE,
    PUBLIC_KEY_FILE,
};
use tessera_license::{
    hash_directory, ClientConfig, FingerprintProvider, LicenseBuilder, LicenseEnvelope,
    RunCounter, SecretStore, Validator, DEFAULT_MANIFEST_EXTENSIONS, UNLIMITED_RUNS,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Offline license issuer and validator")]
struct Args {
    /// Client configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load or create the issuer key pair
    Keygen {
        /// Directory holding the key files
        #[arg(short, long, default_value = "keys")]
        dir: PathBuf,
    },

    /// Print this machine's hardware code
    Fingerprint,

    /// Print a file-hash manifest for a release directory
    HashDir {
        /// Release directory
        dir: PathBuf,

        /// Extensions to include (repeatable; default exe, dll, so, dylib)
        #[arg(short, long = "ext")]
        extensions: Vec<String>,

        /// Hash every file regardless of extension
        #[arg(long, conflicts_with = "extensions")]
        all: bool,

        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Sign a license for a customer's hardware code
    Issue {
        /// Directory holding the issuer key pair
        #[arg(short, long, default_value = "keys")]
        key_dir: PathBuf,

        /// Hardware code reported by `tessera fingerprint`
        #[arg(short, long)]
        fingerprint: String,

        /// Expiry as RFC 3339 or YYYY-MM-DD
        #[arg(long, conflicts_with = "days")]
        expires: Option<String>,

        /// Expiry as a number of days from now
        #[arg(long)]
        days: Option<i64>,

        /// Granted feature (repeatable)
        #[arg(long = "feature")]
        features: Vec<String>,

        /// File-hash manifest produced by `hash-dir`
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Skip environment and integrity checks on the client
        #[arg(long)]
        no_integrity: bool,

        /// Maximum number of runs (-1 for unlimited)
        #[arg(long, default_value_t = UNLIMITED_RUNS, allow_hyphen_values = true)]
        max_runs: i64,

        /// Write the license here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Store a license file for this installation
    Install {
        /// License file from the issuer
        license: PathBuf,
    },

    /// Validate the installed license (or a given file)
    Validate {
        /// Vendor public key (base64 SPKI)
        #[arg(short, long, default_value_os_t = Path::new("keys").join(PUBLIC_KEY_FILE))]
        public_key: PathBuf,

        /// License file to check instead of the installed one
        #[arg(short, long)]
        license: Option<PathBuf>,

        /// Directory that manifest paths are relative to
        #[arg(long, default_value = ".")]
        install_dir: PathBuf,
    },

    /// Clear the run counter of a license
    ResetRuns {
        /// License id as shown by `validate`
        license_id: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<u8> {
    let config = load_config(args.config.as_deref())?;
    match args.command {
        Command::Keygen { dir } => keygen(&dir),
        Command::Fingerprint => fingerprint(&config),
        Command::HashDir {
            dir,
            extensions,
            all,
            out,
        } => hash_dir(&dir, &extensions, all, out.as_deref()),
        Command::Issue {
            key_dir,
            fingerprint,
            expires,
            days,
            features,
            manifest,
            no_integrity,
            max_runs,
            out,
        } => {
            let expires_at = match (expires, days) {
                (Some(text), _) => parse_expiry(&text)?,
                (None, Some(days)) => expiry_after_days(Utc::now(), days)?,
                (None, None) => bail!("Pass --expires or --days"),
            };
            let mut builder = LicenseBuilder::new(fingerprint, expires_at)
                .features(features)
                .enable_integrity(!no_integrity)
                .max_run_count(max_runs);
            if let Some(path) = manifest {
                builder = builder.file_hashes(read_manifest(&path)?);
            }
            issue(&key_dir, builder, out.as_deref())
        }
        Command::Install { license } => install(&config, &license),
        Command::Validate {
            public_key,
            license,
            install_dir,
        } => validate(&config, &public_key, license.as_deref(), install_dir),
        Command::ResetRuns { license_id } => reset_runs(&config, &license_id),
    }
}

fn keygen(dir: &Path) -> Result<u8> {
    let (keypair, created) = load_or_generate_keypair(dir)?;
    if created {
        info!("Created issuer key pair in {:?}", dir);
    }
    println!("{}", keypair.public_key_spki_base64()?);
    Ok(0)
}

fn fingerprint_provider(config: &ClientConfig) -> Result<FingerprintProvider> {
    let layout = config.layout()?;
    let secret = Arc::new(SecretStore::user_scoped(layout.secret_path));
    Ok(FingerprintProvider::host(secret))
}

fn fingerprint(config: &ClientConfig) -> Result<u8> {
    let code = fingerprint_provider(config)?.get(config.fingerprint_length)?;
    println!("{code}");
    Ok(0)
}

fn hash_dir(dir: &Path, extensions: &[String], all: bool, out: Option<&Path>) -> Result<u8> {
    let extensions: Vec<&str> = if all {
        Vec::new()
    } else if extensions.is_empty() {
        DEFAULT_MANIFEST_EXTENSIONS.to_vec()
    } else {
        extensions.iter().map(String::as_str).collect()
    };
    let manifest = hash_directory(dir, &extensions)?;
    info!("Hashed {} file(s) under {:?}", manifest.len(), dir);
    write_output(&serde_json::to_string_pretty(&manifest)?, out)?;
    Ok(0)
}

fn issue(key_dir: &Path, builder: LicenseBuilder, out: Option<&Path>) -> Result<u8> {
    let (keypair, _) = load_or_generate_keypair(key_dir)?;
    let (payload, envelope) = builder.sign(&keypair)?;
    write_output(&envelope.to_json()?, out)?;
    info!("License id: {}", payload.license_id);
    Ok(0)
}

fn install(config: &ClientConfig, license: &Path) -> Result<u8> {
    let json = fs::read_to_string(license)
        .with_context(|| format!("Failed to read license {}", license.display()))?;
    LicenseEnvelope::parse(&json).context("Not a license file")?;

    let layout = config.layout()?;
    let code = fingerprint_provider(config)?.get(config.fingerprint_length)?;
    let store = license_store(config, &layout, &code);
    store.save(&json)?;
    info!("License installed at {:?}", store.path());
    Ok(0)
}

fn validate(
    config: &ClientConfig,
    public_key: &Path,
    license: Option<&Path>,
    install_dir: PathBuf,
) -> Result<u8> {
    let validator = Validator::from_config(load_public_key(public_key)?, config, install_dir)?;

    let outcome = match license {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read license {}", path.display()))?;
            validator.validate(&json)
        }
        None => validate_installed(&validator, config),
    };

    match outcome {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(0)
        }
        Err(e) => {
            eprintln!("License invalid: {e}");
            Ok(exit_code(&e))
        }
    }
}

fn reset_runs(config: &ClientConfig, license_id: &str) -> Result<u8> {
    let layout = config.layout()?;
    let counter = RunCounter::new(layout.run_count_path);
    if counter.reset(license_id)? {
        info!("Run count for {} cleared", license_id);
    } else {
        info!("No run count recorded for {}", license_id);
    }
    Ok(0)
}

fn write_output(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
        }
        None => {
            println!("{text}");
            Ok(())
        }
    }
}
