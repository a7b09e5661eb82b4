use crate::output::print_json;
use clap::Subcommand;
use standby_core::config::{Config, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcommand: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    match subcommand {
        ConfigSubcommand::Show => {
            if json {
                print_json(&config)?;
            } else {
                print!("{}", serde_yaml::to_string(&config)?);
            }
            Ok(())
        }
        ConfigSubcommand::Validate => {
            let warnings = config.validate();
            if json {
                print_json(&warnings)?;
            } else if warnings.is_empty() {
                println!("config ok");
            } else {
                for w in &warnings {
                    let tag = match w.level {
                        WarnLevel::Warning => "warning",
                        WarnLevel::Error => "error",
                    };
                    println!("{tag}: {}", w.message);
                }
            }
            if warnings.iter().any(|w| w.level == WarnLevel::Error) {
                anyhow::bail!("config has errors");
            }
            Ok(())
        }
    }
}

