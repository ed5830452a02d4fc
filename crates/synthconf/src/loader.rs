//! Finding config files, merging them, and overlaying the environment.

use crate::{ConfigError, Environment, SynthwireConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/synthwire/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("synthwire/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("synthwire.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one config file into a raw TOML table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table, filling gaps with compiled defaults and
/// expanding `~` and `$VAR` in paths.
pub fn from_table(
    table: toml::Table,
    sources: &ConfigSources,
) -> Result<SynthwireConfig, ConfigError> {
    let mut config: SynthwireConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: sources
                    .files
                    .last()
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from("<defaults>")),
                message: e.to_string(),
            })?;

    let paths = &mut config.infra.paths;
    for dir in [
        &mut paths.log_dir,
        &mut paths.synthdef_dir,
        &mut paths.synth_source_dir,
    ] {
        let expanded = expand_path(&dir.to_string_lossy());
        *dir = expanded;
    }

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut SynthwireConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    if let Ok(v) = env::var("SYNTHWIRE_ENV") {
        config.environment = v.parse::<Environment>()?;
        sources.env_overrides.push("SYNTHWIRE_ENV".to_string());
    }

    // Paths
    if let Ok(v) = env::var("SYNTHWIRE_LOG_DIR") {
        config.infra.paths.log_dir = expand_path(&v);
        sources.env_overrides.push("SYNTHWIRE_LOG_DIR".to_string());
    }
    if let Ok(v) = env::var("SYNTHWIRE_SYNTHDEF_DIR") {
        config.infra.paths.synthdef_dir = expand_path(&v);
        sources.env_overrides.push("SYNTHWIRE_SYNTHDEF_DIR".to_string());
    }
    if let Ok(v) = env::var("SYNTHWIRE_SYNTH_SOURCE_DIR") {
        config.infra.paths.synth_source_dir = expand_path(&v);
        sources.env_overrides.push("SYNTHWIRE_SYNTH_SOURCE_DIR".to_string());
    }

    // Bind
    if let Ok(v) = env::var("SYNTHWIRE_HOST") {
        config.infra.bind.host = v;
        sources.env_overrides.push("SYNTHWIRE_HOST".to_string());
    }
    if let Ok(v) = env::var("SYNTHWIRE_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("SYNTHWIRE_HTTP_PORT".to_string());
        }
    }

    // Telemetry
    if let Ok(v) = env::var("SYNTHWIRE_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("SYNTHWIRE_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }

    // ICE
    if let Ok(v) = env::var("SYNTHWIRE_STUN_URL") {
        config.session.ice.stun_urls = split_list(&v);
        sources.env_overrides.push("SYNTHWIRE_STUN_URL".to_string());
    }
    if let Ok(host) = env::var("TURN_SERVER_HOST") {
        if !host.is_empty() {
            config.session.ice.turn_urls = vec![format!("turn:{}:3478?transport=udp", host)];
            sources.env_overrides.push("TURN_SERVER_HOST".to_string());
        }
    }
    if let Ok(v) = env::var("TURN_USERNAME") {
        config.session.ice.turn_username = Some(v);
        sources.env_overrides.push("TURN_USERNAME".to_string());
    }
    if let Ok(v) = env::var("TURN_PASSWORD") {
        config.session.ice.turn_credential = Some(v);
        sources.env_overrides.push("TURN_PASSWORD".to_string());
    }
    if let Ok(v) = env::var("TURN_MIN_PORT") {
        if let Ok(port) = v.parse() {
            config.session.ice.port_min = port;
            sources.env_overrides.push("TURN_MIN_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("TURN_MAX_PORT") {
        if let Ok(port) = v.parse() {
            config.session.ice.port_max = port;
            sources.env_overrides.push("TURN_MAX_PORT".to_string());
        }
    }

    // Synth
    if let Ok(v) = env::var("SYNTHWIRE_SCSYNTH") {
        config.session.synth.binary = v;
        sources.env_overrides.push("SYNTHWIRE_SCSYNTH".to_string());
    }
    if let Ok(v) = env::var("SYNTHWIRE_READINESS_MARKER") {
        config.session.synth.readiness_marker = v;
        sources.env_overrides.push("SYNTHWIRE_READINESS_MARKER".to_string());
    }

    Ok(())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        match directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            Some(home) => home.join(stripped),
            None => PathBuf::from(path),
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(toml: &str) -> SynthwireConfig {
        let table = parse_table(toml, Path::new("test.toml")).unwrap();
        from_table(table, &ConfigSources::default()).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_path_unknown_var_is_literal() {
        let expanded = expand_path("$SYNTHWIRE_SURELY_UNSET_VAR/logs");
        assert_eq!(expanded, PathBuf::from("$SYNTHWIRE_SURELY_UNSET_VAR/logs"));
    }

    #[test]
    fn test_discover_config_files() {
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[paths]
log_dir = "/custom/logs"
"#,
        );
        assert_eq!(config.infra.paths.log_dir, PathBuf::from("/custom/logs"));
        assert_eq!(config.infra.bind.http_port, 8080);
        assert_eq!(config.session.ice.gathering_timeout_ms, 15_000);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
environment = "production"

[paths]
log_dir = "/var/log/synthwire"
synthdef_dir = "/srv/synthdefs"

[bind]
host = "127.0.0.1"
http_port = 9000

[telemetry]
log_level = "debug"
otlp_endpoint = "127.0.0.1:4317"

[ice]
stun_urls = ["stun:stun.example.net:3478"]
turn_urls = ["turn:relay.example.net:3478?transport=udp"]
turn_username = "u"
turn_credential = "p"
gathering_timeout_ms = 5000
disconnect_grace_ms = 2000

[synth]
binary = "/usr/local/bin/scsynth"
readiness_marker = "client:"
channels = 1

[pipeline]
client_prefix = "encoder"
"#,
        );

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.infra.paths.synthdef_dir, PathBuf::from("/srv/synthdefs"));
        assert_eq!(config.infra.bind.addr(), "127.0.0.1:9000");
        assert_eq!(config.infra.telemetry.otlp_endpoint.as_deref(), Some("127.0.0.1:4317"));
        assert_eq!(config.session.ice.turn_urls.len(), 1);
        assert_eq!(config.session.ice.gathering_timeout_ms, 5000);
        assert_eq!(config.session.ice.disconnect_grace_ms, 2000);
        assert_eq!(config.session.synth.binary, "/usr/local/bin/scsynth");
        assert_eq!(config.session.synth.channels, 1);
        assert_eq!(config.session.pipeline.client_prefix, "encoder");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_tables_nested() {
        let mut base = parse_table(
            r#"
[ice]
gathering_timeout_ms = 1000
disconnect_grace_ms = 2000
"#,
            Path::new("base.toml"),
        )
        .unwrap();
        let overlay = parse_table(
            r#"
[ice]
disconnect_grace_ms = 9000
"#,
            Path::new("overlay.toml"),
        )
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base, &ConfigSources::default()).unwrap();
        assert_eq!(config.session.ice.gathering_timeout_ms, 1000);
        assert_eq!(config.session.ice.disconnect_grace_ms, 9000);
    }

    #[test]
    fn test_cli_override_file_is_loaded_last() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bind]\nhttp_port = 9911").unwrap();

        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last().map(PathBuf::as_path), Some(file.path()));

        let table = read_table(file.path()).unwrap();
        let config = from_table(table, &ConfigSources::default()).unwrap();
        assert_eq!(config.infra.bind.http_port, 9911);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_table("[bind\nhttp_port = 1", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
