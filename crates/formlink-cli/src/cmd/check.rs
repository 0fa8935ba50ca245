use crate::output::print_json;
use anyhow::Context;
use formlink_core::config::WarnLevel;
use formlink_core::FormDefinition;
use std::path::Path;

pub fn run(form_path: &Path, config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let form = FormDefinition::load(form_path)
        .with_context(|| format!("failed to load form {}", form_path.display()))?;
    let warnings = config.validate(&form);

    if json {
        let value = serde_json::json!({
            "form": form.name,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Form '{}' is valid. No warnings.", form.name);
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            match &w.action {
                Some(action) => println!("[{prefix}] {action}: {}", w.message),
                None => println!("[{prefix}] {}", w.message),
            }
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("form check found errors");
    }
    Ok(())
}
