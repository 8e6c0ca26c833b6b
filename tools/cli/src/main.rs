//! cloudstorage CLI - command line access to any supported storage provider.
//!
//! Connection settings come from a JSON profile (`--config`, or
//! `cloudstorage/config.json` in the user's config directory) and are
//! overridden by command line flags.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::TryStreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use cloudstorage::signing::validate_expiry;
use cloudstorage::{
    get_driver_by_name, Acl, BlobSource, ContainerInfo, DriverConfig, Metadata, Storage,
    UploadOptions,
};

#[derive(Parser)]
#[command(name = "cloudstorage")]
#[command(about = "cloudstorage - One interface for S3, Azure, GCS, Cloud Files and local storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Provider: AZURE, CLOUDFILES, GOOGLESTORAGE, LOCAL or S3.
    #[arg(short, long, global = true)]
    driver: Option<String>,

    /// Account key (access key, account name, username or local root).
    #[arg(short, long, global = true)]
    key: Option<String>,

    /// Account secret.
    #[arg(short, long, global = true)]
    secret: Option<String>,

    /// Prompt for the account secret instead of passing it on the command line.
    #[arg(long, global = true)]
    ask_secret: bool,

    /// Provider region.
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// JSON profile with the driver configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Per-call timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    timeout: Option<u64>,

    /// Provider option, e.g. `endpoint=http://localhost:9000`.
    #[arg(short, long = "option", global = true, value_name = "NAME=VALUE", value_parser = parse_pair)]
    options: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List containers.
    Containers,

    /// Create a container.
    Create {
        /// Container name.
        name: String,

        /// ACL: "private", "public-read" or "public-read-write".
        #[arg(long)]
        acl: Option<String>,
    },

    /// Delete a container.
    Remove {
        /// Container name.
        name: String,

        /// Delete the container's blobs first.
        #[arg(long)]
        cascade: bool,
    },

    /// List blobs in a container.
    Ls {
        /// Container name.
        container: String,

        /// Only list blobs whose names start with this prefix.
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Upload a file.
    Put {
        /// Container name.
        container: String,

        /// Source file.
        file: PathBuf,

        /// Blob name (default: the file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Content type (default: guessed from the blob name).
        #[arg(long)]
        content_type: Option<String>,

        /// Expected MD5, hex or base64.
        #[arg(long)]
        checksum: Option<String>,

        /// Metadata entry.
        #[arg(short, long = "meta", value_name = "NAME=VALUE", value_parser = parse_pair)]
        metadata: Vec<(String, String)>,
    },

    /// Download a blob.
    Get {
        /// Container name.
        container: String,

        /// Blob name.
        name: String,

        /// Destination file (default: last segment of the blob name).
        dest: Option<PathBuf>,
    },

    /// Delete a blob.
    Rm {
        /// Container name.
        container: String,

        /// Blob name.
        name: String,
    },

    /// Print a signed download URL.
    UrlDownload {
        /// Container name.
        container: String,

        /// Blob name.
        name: String,

        /// Lifetime in seconds.
        #[arg(short, long, default_value_t = 3600)]
        expires: u64,
    },

    /// Print a signed upload URL and its form fields.
    UrlUpload {
        /// Container name.
        container: String,

        /// Blob name.
        name: String,

        /// Lifetime in seconds.
        #[arg(short, long, default_value_t = 3600)]
        expires: u64,

        /// Extra form field to sign.
        #[arg(short, long = "field", value_name = "NAME=VALUE", value_parser = parse_pair)]
        fields: Vec<(String, String)>,
    },

    /// Show a blob's metadata, or replace it with `--set`.
    Meta {
        /// Container name.
        container: String,

        /// Blob name.
        name: String,

        /// Metadata entry; the given entries replace all existing ones.
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_pair)]
        set: Vec<(String, String)>,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "cloudstorage", &mut std::io::stdout());
        return Ok(());
    }

    let storage = connect(&cli)?;

    match cli.command {
        Commands::Containers => cmd_containers(&storage).await,

        Commands::Create { name, acl } => cmd_create(&storage, &name, acl.as_deref()).await,

        Commands::Remove { name, cascade } => cmd_remove(&storage, &name, cascade).await,

        Commands::Ls { container, prefix } => {
            cmd_ls(&storage, &container, prefix.as_deref()).await
        }

        Commands::Put {
            container,
            file,
            name,
            content_type,
            checksum,
            metadata,
        } => {
            let mut options = UploadOptions::new().with_metadata(metadata.into_iter().collect());
            if let Some(content_type) = content_type {
                options = options.with_content_type(content_type);
            }
            if let Some(checksum) = checksum {
                options = options.with_checksum(checksum);
            }
            cmd_put(&storage, &container, &file, name.as_deref(), options).await
        }

        Commands::Get {
            container,
            name,
            dest,
        } => cmd_get(&storage, &container, &name, dest).await,

        Commands::Rm { container, name } => cmd_rm(&storage, &container, &name).await,

        Commands::UrlDownload {
            container,
            name,
            expires,
        } => cmd_url_download(&storage, &container, &name, expires),

        Commands::UrlUpload {
            container,
            name,
            expires,
            fields,
        } => cmd_url_upload(&storage, &container, &name, expires, fields),

        Commands::Meta {
            container,
            name,
            set,
        } => cmd_meta(&storage, &container, &name, set).await,

        Commands::Completions { .. } => Ok(()),
    }
}

/// Parse a `NAME=VALUE` argument.
fn parse_pair(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", value))
}

/// Profile used when `--config` is not given.
fn default_profile() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("cloudstorage").join("config.json"))
        .filter(|path| path.is_file())
}

/// Read a JSON profile: the driver configuration plus a `driver` field.
fn load_profile(path: &Path) -> Result<(Option<String>, DriverConfig)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    let mut value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Profile {} is not valid JSON", path.display()))?;
    let driver = value
        .as_object_mut()
        .and_then(|profile| profile.remove("driver"))
        .and_then(|driver| driver.as_str().map(str::to_string));
    let config = DriverConfig::from_value(value)
        .with_context(|| format!("Invalid profile {}", path.display()))?;
    Ok((driver, config))
}

/// Merge the profile with the command line flags.
fn resolve_config(cli: &Cli) -> Result<(String, DriverConfig)> {
    let profile = cli.config.clone().or_else(default_profile);
    let (profile_driver, mut config) = match &profile {
        Some(path) => load_profile(path)?,
        None => (None, DriverConfig::new()),
    };

    let driver = cli
        .driver
        .clone()
        .or(profile_driver)
        .context("No driver given; pass --driver or set \"driver\" in the profile")?;

    if let Some(key) = &cli.key {
        config = config.with_key(key.as_str());
    }
    if let Some(secret) = &cli.secret {
        config = config.with_secret(secret.as_str());
    }
    if let Some(region) = &cli.region {
        config = config.with_region(region.as_str());
    }
    if let Some(timeout) = cli.timeout {
        config = config.with_timeout(Duration::from_millis(timeout));
    }
    for (name, value) in &cli.options {
        config = config.with_option(name.as_str(), value.as_str());
    }

    Ok((driver, config))
}

fn connect(cli: &Cli) -> Result<Storage> {
    let (driver, mut config) = resolve_config(cli)?;
    if cli.ask_secret {
        let secret = rpassword::prompt_password("Secret: ").context("Failed to read secret")?;
        config = config.with_secret(secret);
    }
    debug!(driver = %driver, config = ?config, "Connecting");
    get_driver_by_name(&driver)?
        .connect(config)
        .with_context(|| format!("Failed to set up the {} driver", driver))
}

fn parse_acl(acl: Option<&str>) -> Result<Option<Acl>> {
    Ok(acl.map(str::parse::<Acl>).transpose()?)
}

/// List containers.
async fn cmd_containers(storage: &Storage) -> Result<()> {
    let containers: Vec<_> = storage
        .list_containers()
        .try_collect()
        .await
        .context("Failed to list containers")?;

    if containers.is_empty() {
        println!("No containers.");
    }
    for container in containers {
        println!("{}\t{}", container.name(), container.acl());
    }
    Ok(())
}

/// Create a container.
async fn cmd_create(storage: &Storage, name: &str, acl: Option<&str>) -> Result<()> {
    let container = storage
        .create_container(name, parse_acl(acl)?)
        .await
        .context("Failed to create container")?;
    println!("Container ready: {} ({})", container.name(), container.acl());
    Ok(())
}

/// Delete a container.
async fn cmd_remove(storage: &Storage, name: &str, cascade: bool) -> Result<()> {
    storage
        .delete_container(name, cascade)
        .await
        .with_context(|| format!("Failed to delete container '{}'", name))?;
    println!("Container deleted: {}", name);
    Ok(())
}

/// List blobs.
async fn cmd_ls(storage: &Storage, container: &str, prefix: Option<&str>) -> Result<()> {
    let container = storage
        .get_container(container)
        .await
        .context("Failed to open container")?;
    let blobs: Vec<_> = container
        .list_blobs(prefix)
        .try_collect()
        .await
        .context("Failed to list blobs")?;

    if blobs.is_empty() {
        println!("No blobs.");
    }
    for blob in blobs {
        println!(
            "{}\t{} bytes\t{}",
            blob.name(),
            blob.size(),
            blob.checksum().unwrap_or("-")
        );
    }
    Ok(())
}

/// Upload a file.
async fn cmd_put(
    storage: &Storage,
    container: &str,
    file: &Path,
    name: Option<&str>,
    options: UploadOptions,
) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Cannot derive a blob name from the file; pass --name")?,
    };
    info!("Uploading {} to {}/{}", file.display(), container, name);

    let container = storage
        .get_container(container)
        .await
        .context("Failed to open container")?;
    let blob = container
        .upload_blob(&name, BlobSource::path(file), options)
        .await
        .context("Upload failed")?;

    println!("Uploaded {} ({} bytes)", blob.name(), blob.size());
    if let Some(checksum) = blob.checksum() {
        println!("  MD5: {}", checksum);
    }
    Ok(())
}

/// Download a blob.
async fn cmd_get(storage: &Storage, container: &str, name: &str, dest: Option<PathBuf>) -> Result<()> {
    let dest = dest.unwrap_or_else(|| PathBuf::from(name.rsplit('/').next().unwrap_or(name)));
    let blob = storage
        .get_container(container)
        .await
        .context("Failed to open container")?
        .get_blob(name)
        .await
        .context("Failed to find blob")?;
    let written = blob
        .download_to_path(&dest)
        .await
        .context("Download failed")?;
    println!("Downloaded {} ({} bytes) to {}", name, written, dest.display());
    Ok(())
}

/// Delete a blob.
async fn cmd_rm(storage: &Storage, container: &str, name: &str) -> Result<()> {
    storage
        .get_container(container)
        .await
        .context("Failed to open container")?
        .delete_blob(name)
        .await
        .with_context(|| format!("Failed to delete '{}'", name))?;
    println!("Deleted {}", name);
    Ok(())
}

/// Signing needs no round trip, so the container is not fetched.
fn check_target(storage: &Storage, container: &str, name: &str, expires: u64) -> Result<Duration> {
    let driver = storage.driver();
    driver.validate_container_name(container)?;
    driver.validate_blob_name(name)?;
    let expires_in = Duration::from_secs(expires);
    validate_expiry(expires_in, None)?;
    Ok(expires_in)
}

/// Print a signed download URL.
fn cmd_url_download(storage: &Storage, container: &str, name: &str, expires: u64) -> Result<()> {
    let expires_in = check_target(storage, container, name, expires)?;
    let url = storage
        .driver()
        .generate_download_url(&ContainerInfo::new(container), name, expires_in)
        .context("Failed to sign download URL")?;
    println!("{}", url);
    Ok(())
}

/// Print a signed upload URL.
fn cmd_url_upload(
    storage: &Storage,
    container: &str,
    name: &str,
    expires: u64,
    fields: Vec<(String, String)>,
) -> Result<()> {
    let expires_in = check_target(storage, container, name, expires)?;
    let signed = storage
        .driver()
        .generate_upload_url(
            &ContainerInfo::new(container),
            name,
            expires_in,
            &fields.into_iter().collect(),
        )
        .context("Failed to sign upload URL")?;
    println!("{}", serde_json::to_string_pretty(&signed)?);
    Ok(())
}

/// Show or replace blob metadata.
async fn cmd_meta(
    storage: &Storage,
    container: &str,
    name: &str,
    set: Vec<(String, String)>,
) -> Result<()> {
    let mut blob = storage
        .get_container(container)
        .await
        .context("Failed to open container")?
        .get_blob(name)
        .await
        .context("Failed to find blob")?;

    if !set.is_empty() {
        let metadata: Metadata = set.into_iter().collect();
        blob.set_metadata(metadata)
            .await
            .context("Failed to update metadata")?;
    }
    println!("{}", serde_json::to_string_pretty(blob.metadata())?);
    Ok(())
}
