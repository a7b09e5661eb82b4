use anyhow::Context;
use standby_core::{paths, Engine};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let created = Engine::init(root)
        .with_context(|| format!("failed to initialize {}", root.display()))?;

    if json {
        return crate::output::print_json(&serde_json::json!({
            "root": root,
            "config_created": created,
        }));
    }

    println!("Initializing standby in: {}", root.display());
    let verb = if created { "created" } else { "exists: " };
    println!("  {verb} {}", paths::CONFIG_FILE);
    println!("  ready:   {}", paths::DB_FILE);
    Ok(())
}
