//! `configure` noun: settings file, regions and access tokens.

use anyhow::{bail, Context as _, Result};
use clap::Subcommand;
use taegis_magic::client::{self, auth};
use taegis_magic::config::{self, Config};
use taegis_magic::paths;

#[derive(Subcommand, Debug)]
pub enum ConfigureCommand {
    /// Print the effective settings
    Show,

    /// Print one setting (dotted key, e.g. `queries.track`)
    Get { key: String },

    /// Change one setting
    Set { key: String, value: String },

    /// Reset one setting to its default
    Unset { key: String },

    /// Manage region names
    Regions {
        #[command(subcommand)]
        command: RegionsCommand,
    },

    /// Store or forget the access token for a region
    Auth {
        /// Region name (defaults to `defaults.region`)
        #[arg(long)]
        region: Option<String>,

        /// Token to store; prompted for when omitted
        #[arg(long, conflicts_with = "forget")]
        token: Option<String>,

        /// Drop the stored token
        #[arg(long)]
        forget: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum RegionsCommand {
    /// List built-in and configured regions
    List,

    /// Add or replace a region
    Add { name: String, url: String },

    /// Remove a configured region
    Remove { name: String },
}

pub fn execute(config: &Config, command: ConfigureCommand) -> Result<()> {
    let path = paths::config_path();
    match command {
        ConfigureCommand::Show => {
            println!("# {}", path.display());
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigureCommand::Get { key } => {
            let value = config.get_value(&key)?;
            match value {
                toml::Value::String(s) => println!("{s}"),
                other => println!("{other}"),
            }
        }
        ConfigureCommand::Set { key, value } => {
            let mut updated = config.clone();
            updated.set_value(&key, &value)?;
            config::save(&path, &updated)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{key} = {value}");
        }
        ConfigureCommand::Unset { key } => {
            let mut updated = config.clone();
            if updated.unset_value(&key)? {
                config::save(&path, &updated)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("{key} reset to default");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigureCommand::Regions { command } => regions(config, &path, command)?,
        ConfigureCommand::Auth {
            region,
            token,
            forget,
        } => {
            let region = region.unwrap_or_else(|| config.defaults.region.clone());
            // Unknown regions fail here rather than at first use.
            client::region_url(config, &region)?;
            let credentials = paths::credentials_path();
            if forget {
                if auth::forget_token(&region, &credentials)? {
                    println!("Forgot access token for {region}");
                } else {
                    println!("No access token stored for {region}");
                }
            } else {
                match token {
                    Some(token) => auth::store_token(&region, token.trim(), &credentials)?,
                    None => {
                        auth::prompt_for_token(&region, &credentials)?;
                    }
                }
                println!("Stored access token for {region}");
            }
        }
    }
    Ok(())
}

fn regions(config: &Config, path: &std::path::Path, command: RegionsCommand) -> Result<()> {
    match command {
        RegionsCommand::List => {
            for (name, url) in client::regions(config) {
                let marker = if name == config.defaults.region { "*" } else { " " };
                println!("{marker} {name:<12} {url}");
            }
        }
        RegionsCommand::Add { name, url } => {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                bail!("Region url must start with https:// or http://");
            }
            let mut updated = config.clone();
            updated.regions.insert(name.clone(), url.clone());
            config::save(path, &updated)?;
            println!("Added region {name} -> {url}");
        }
        RegionsCommand::Remove { name } => {
            let mut updated = config.clone();
            if updated.regions.remove(&name).is_none() {
                bail!("Region '{name}' is not configured (built-in regions cannot be removed)");
            }
            config::save(path, &updated)?;
            println!("Removed region {name}");
        }
    }
    Ok(())
}
