use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Process-wide settings, fixed once the sidecar starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub page_size: u32,
    pub workspace: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            workspace: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl Config {
    /// Environment variables override entries from `SCHOOLD_CONFIG_PATH`.
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("SCHOOLD_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                merged.extend(parse_env_file(config_path)?);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let page_size = match nonempty(kv, "SCHOOLD_PAGE_SIZE") {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(StartupError {
                        code: "ERR_INVALID_PAGE_SIZE",
                        message: format!("SCHOOLD_PAGE_SIZE must be a positive integer, got {raw:?}"),
                    })
                }
            },
        };

        let workspace = nonempty(kv, "SCHOOLD_WORKSPACE").map(PathBuf::from);

        Ok(Self {
            page_size,
            workspace,
        })
    }
}

fn nonempty<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let raw = std::fs::read_to_string(path).map_err(|e| StartupError {
        code: "ERR_CONFIG_READ",
        message: format!("failed to read {path}: {e}"),
    })?;
    Ok(parse_env_lines(&raw))
}

fn parse_env_lines(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let v = v.trim().trim_matches('"');
        out.insert(k.trim().to_string(), v.to_string());
    }
    out
}
