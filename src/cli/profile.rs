//! Profile CLI subcommands.
//!
//! Profiles are stored per archive under `profiles/<id>.json`.

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use crate::domain::{Archive, FieldType, MetadataField, MetadataValue, Profile};

/// Profile-related subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Create a profile
    Create {
        /// Profile name
        name: String,

        /// Free-text description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Field as `name:type[:required]`, with `=a|b` after the type for options
        /// (e.g. `status:select=draft|final:required`)
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Default value as `field=value`
        #[arg(long = "default")]
        defaults: Vec<String>,
    },

    /// List profiles
    List,

    /// Show a profile's fields
    Show {
        /// Profile id or name
        profile: String,
    },

    /// Delete a profile (assets keep their metadata)
    Delete {
        /// Profile id or name
        profile: String,
    },
}

pub fn execute(archive: &Archive, command: ProfileCommands) -> Result<()> {
    match command {
        ProfileCommands::Create {
            name,
            description,
            fields,
            defaults,
        } => create(archive, name, description, &fields, &defaults),
        ProfileCommands::List => list(archive),
        ProfileCommands::Show { profile } => show(archive, &profile),
        ProfileCommands::Delete { profile } => delete(archive, &profile),
    }
}

fn create(
    archive: &Archive,
    name: String,
    description: String,
    fields: &[String],
    defaults: &[String],
) -> Result<()> {
    let store = archive.profiles();
    if store.list()?.iter().any(|p| p.name == name) {
        bail!("A profile named '{}' already exists", name);
    }

    let mut profile = Profile::new(name, description);
    for spec in fields {
        profile.add_field(parse_field(spec)?)?;
    }

    for pair in defaults {
        let (field, raw) = pair
            .split_once('=')
            .with_context(|| format!("Expected field=value, got '{}'", pair))?;
        let value = MetadataValue::parse_loose(raw);
        let Some(def) = profile.fields.iter_mut().find(|f| f.name == field) else {
            bail!("Default given for unknown field '{}'", field);
        };
        if let Err(reason) = def.check(&value) {
            bail!("Invalid default for '{}': {}", field, reason);
        }
        def.default_value = Some(value);
    }

    let path = store.save(&profile)?;
    println!("Created profile {} ({})", profile.name, profile.id);
    println!("  {}", path.display());
    Ok(())
}

/// Parse `name:type[:required]` where type may carry `=opt1|opt2`
pub fn parse_field(spec: &str) -> Result<MetadataField> {
    let mut parts = spec.split(':');
    let name = parts.next().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        bail!("Field spec has no name: '{}'", spec);
    }

    let type_part = parts.next().unwrap_or("text");
    let (type_name, options) = match type_part.split_once('=') {
        Some((t, opts)) => (t, Some(opts)),
        None => (type_part, None),
    };
    let field_type: FieldType = type_name
        .parse()
        .with_context(|| format!("Invalid field spec '{}'", spec))?;

    let display = name.replace('_', " ");
    let mut field = MetadataField::new(name, display, field_type);
    if let Some(opts) = options {
        field = field.with_options(opts.split('|').map(str::trim).filter(|o| !o.is_empty()));
    }

    for flag in parts {
        match flag.trim() {
            "required" | "req" => field = field.required(),
            "" => {}
            other => bail!("Unknown field flag '{}' in '{}'", other, spec),
        }
    }
    Ok(field)
}

fn list(archive: &Archive) -> Result<()> {
    let profiles = archive.profiles().list()?;
    if profiles.is_empty() {
        println!("No profiles defined");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<8}", "ID", "NAME", "FIELDS");
    println!("{}", "-".repeat(72));
    for profile in profiles {
        println!("{:<38} {:<24} {:<8}", profile.id, profile.name, profile.fields.len());
    }
    Ok(())
}

fn show(archive: &Archive, id_or_name: &str) -> Result<()> {
    let profile = archive.profiles().find(id_or_name)?;

    println!("Profile: {}", profile.name);
    println!("ID: {}", profile.id);
    if !profile.description.is_empty() {
        println!("Description: {}", profile.description);
    }
    println!("Updated: {}", profile.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("\nFields:");
    for field in &profile.fields {
        let mut notes = Vec::new();
        if field.required {
            notes.push("required".to_string());
        }
        if let Some(options) = &field.options {
            notes.push(format!("options: {}", options.join(", ")));
        }
        if let Some(default) = &field.default_value {
            notes.push(format!("default: {}", default.display()));
        }
        if let Some(pattern) = &field.validation_pattern {
            notes.push(format!("pattern: {}", pattern));
        }
        println!("  {:<20} {:<12} {}", field.name, field.field_type.as_str(), notes.join("; "));
    }
    Ok(())
}

fn delete(archive: &Archive, id_or_name: &str) -> Result<()> {
    let store = archive.profiles();
    let profile = store.find(id_or_name)?;
    if store.delete(&profile.id)? {
        println!("Deleted profile {} ({})", profile.name, profile.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_spec() {
        let field = parse_field("status:select=draft|final:required").unwrap();
        assert_eq!(field.name, "status");
        assert_eq!(field.field_type, FieldType::Select);
        assert!(field.required);
        assert_eq!(field.options.unwrap(), vec!["draft", "final"]);

        let field = parse_field("notes").unwrap();
        assert_eq!(field.field_type, FieldType::Text);
        assert!(!field.required);

        assert!(parse_field(":text").is_err());
        assert!(parse_field("x:colour").is_err());
        assert!(parse_field("x:text:sometimes").is_err());
    }
}
