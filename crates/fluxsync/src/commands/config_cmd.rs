//! Config subcommand handlers.

use serde::Serialize;

use fluxsync_config::{self as config, Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ShownProfile<'a> {
    name: &'a str,
    #[serde(flatten)]
    profile: Profile,
}

/// Render the selected profile with its password masked.
fn format_profile(
    cfg: &Config,
    name: Option<&str>,
    format: OutputFormat,
) -> Result<String, CliError> {
    let (name, profile) = cfg.profile(name)?;
    let shown = ShownProfile {
        name: &name,
        profile: profile.redacted(),
    };
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&shown)?),
        OutputFormat::Plain => {
            let body = toml::to_string_pretty(&shown.profile)
                .map_err(|e| CliError::Config(e.to_string()))?;
            Ok(format!("[profiles.{name}]\n{body}"))
        }
    }
}

fn format_profiles(cfg: &Config) -> String {
    let mut names: Vec<&String> = cfg.profiles.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let marker = if cfg.default_profile.as_ref() == Some(name) {
                "*"
            } else {
                " "
            };
            format!("{marker} {name}  {}", cfg.profiles[name].server)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_line(&config::config_path().display().to_string())?;
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let text = format_profile(&cfg, global.profile.as_deref(), global.output)?;
            output::print_line(&text)?;
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured in {}", config::config_path().display());
            } else {
                output::print_line(&format_profiles(&cfg))?;
            }
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            cfg.profile(Some(&name))?;
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("Default profile set to '{name}'");
        }
    }
    Ok(())
}
