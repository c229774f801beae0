//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};

/// Every settable key, in display order
const VALID_KEYS: &[&str] = &[
    "general.use_env",
    "general.log_format",
    "network.proxy",
    "network.timeout_secs",
    "network.insecure_registries",
    "build.container_cli",
    "build.reuse",
    "build.exclude",
    "credentials.gcp.key_file",
    "credentials.gcp.service_account",
    "credentials.azure.refresh_token",
    "credentials.docker.config_path",
];

/// Keys stored as arrays; values are comma separated on the command line
const LIST_KEYS: &[&str] = &["network.insecure_registries", "build.exclude"];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Get { key }) => get_value(config, &key)?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> KilnResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn get_value(config: &Config, key: &str) -> KilnResult<()> {
    validate_config_key(key)?;
    let doc = toml::Value::try_from(config)?;

    match lookup(&doc, key) {
        Some(value) => println!("{}", render(value)),
        None => ui::remark(&UiContext::detect(), &format!("{} is not set", key)),
    }
    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> KilnResult<()> {
    let ctx = UiContext::detect();

    if let Err(e) = validate_config_key(key) {
        ui::step_error_detail(&ctx, "Unknown config key", key);
        ui::remark(&ctx, "Valid keys:");
        for key in VALID_KEYS {
            ui::remark(&ctx, &format!("  {}", key));
        }
        return Err(e);
    }

    let updated = apply_value(config, key, value)?;
    manager.save(&updated).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Return a copy of `config` with `key` set, type-checked against the schema
fn apply_value(config: &Config, key: &str, value: &str) -> KilnResult<Config> {
    let mut doc = toml::Value::try_from(config)?;
    set_toml_value(&mut doc, key, value)?;

    doc.try_into().map_err(|e: toml::de::Error| {
        KilnError::User(format!("Invalid value for {}: {}", key, e.message()))
    })
}

fn validate_config_key(key: &str) -> KilnResult<()> {
    if VALID_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(KilnError::User(format!("Unknown config key: {}", key)))
    }
}

fn lookup<'a>(doc: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(doc, |current, part| current.get(part))
}

fn render(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed.
///
/// An empty value removes the key, which resets optional settings.
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> KilnResult<()> {
    let (path, leaf) = key
        .rsplit_once('.')
        .ok_or_else(|| KilnError::User(format!("Expected section.key, got: {}", key)))?;

    let mut current = doc;
    for part in path.split('.') {
        current = current
            .as_table_mut()
            .ok_or_else(|| KilnError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| KilnError::User(format!("Expected table for key: {}", key)))?;

    let toml_value = if LIST_KEYS.contains(&key) {
        let items: Vec<toml::Value> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| toml::Value::String(s.to_string()))
            .collect();
        toml::Value::Array(items)
    } else if value.is_empty() {
        table.remove(leaf);
        return Ok(());
    } else if let Ok(b) = parse_bool(value) {
        toml::Value::Boolean(b)
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    };

    table.insert(leaf.to_string(), toml_value);
    Ok(())
}

fn parse_bool(value: &str) -> KilnResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(KilnError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_string_value() {
        let config = apply_value(&Config::default(), "build.container_cli", "podman").unwrap();
        assert_eq!(config.build.container_cli, "podman");
    }

    #[test]
    fn set_bool_and_number() {
        let config = apply_value(&Config::default(), "build.reuse", "false").unwrap();
        assert!(!config.build.reuse);

        let config = apply_value(&config, "network.timeout_secs", "90").unwrap();
        assert_eq!(config.network.timeout_secs, 90);
        assert!(!config.build.reuse);
    }

    #[test]
    fn set_list_value() {
        let config = apply_value(&Config::default(), "build.exclude", "node_modules, .git,").unwrap();
        assert_eq!(config.build.exclude, vec!["node_modules", ".git"]);
    }

    #[test]
    fn set_optional_then_clear() {
        let config = apply_value(&Config::default(), "network.proxy", "http://proxy:3128").unwrap();
        assert_eq!(config.network.proxy.as_deref(), Some("http://proxy:3128"));

        let config = apply_value(&config, "network.proxy", "").unwrap();
        assert_eq!(config.network.proxy, None);
    }

    #[test]
    fn set_nested_credentials_key() {
        let config =
            apply_value(&Config::default(), "credentials.gcp.key_file", "/keys/sa.json").unwrap();
        assert_eq!(
            config.credentials.gcp.key_file,
            Some(std::path::PathBuf::from("/keys/sa.json"))
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = apply_value(&Config::default(), "network.timeout_secs", "soon").unwrap_err();
        assert!(err.to_string().contains("network.timeout_secs"));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(validate_config_key("vm.name").is_err());
        assert!(validate_config_key("build.reuse").is_ok());
    }

    #[test]
    fn lookup_and_render() {
        let mut config = Config::default();
        config.network.insecure_registries = vec!["localhost:5000".into(), "registry.lan".into()];
        let doc = toml::Value::try_from(&config).unwrap();

        assert_eq!(render(lookup(&doc, "build.container_cli").unwrap()), "docker");
        assert_eq!(render(lookup(&doc, "network.timeout_secs").unwrap()), "30");
        assert_eq!(
            render(lookup(&doc, "network.insecure_registries").unwrap()),
            "localhost:5000,registry.lan"
        );
        assert!(lookup(&doc, "network.proxy").is_none());
    }

    #[tokio::test]
    async fn set_persists_to_file() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        set_value(&manager, &Config::default(), "build.container_cli", "podman")
            .await
            .unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.build.container_cli, "podman");
    }

    #[tokio::test]
    async fn set_unknown_key_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path.clone());

        assert!(set_value(&manager, &Config::default(), "vm.name", "x")
            .await
            .is_err());
        assert!(!path.exists());
    }
}
