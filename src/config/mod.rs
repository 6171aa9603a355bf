use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    /// Load defaults, then `path` (if present), then matching environment variables.
    pub fn load_from(path: &Path) -> Self {
        let mut map = default_map();

        if path.exists() {
            if let Ok(file) = fs::File::open(path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Environment takes precedence over the rc file
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path: path.to_path_buf() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Ok(v) = env::var(key) {
            return Some(v);
        }
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn chat_cache_path(&self) -> PathBuf {
        self.get_path("CHAT_CACHE_PATH")
            .unwrap_or_else(|| env::temp_dir().join("chutra").join("chat_cache"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.get_path("PREFERENCES_PATH")
            .unwrap_or_else(|| config_dir().join("preferences.json"))
    }

    pub fn python_bin(&self) -> String {
        self.get("PYTHON_BIN").unwrap_or_else(|| "python3".into())
    }

    /// `None` means snippets run unbounded (`EXECUTION_TIMEOUT=0`).
    pub fn execution_timeout(&self) -> Option<Duration> {
        match self.get_u64("EXECUTION_TIMEOUT").unwrap_or(30) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn package_install_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("PACKAGE_INSTALL_TIMEOUT").unwrap_or(300))
    }

    pub fn auto_run_delay(&self) -> Duration {
        Duration::from_millis(self.get_u64("AUTO_RUN_DELAY_MS").unwrap_or(500))
    }

    pub fn user_id(&self) -> String {
        self.get("USER_ID")
            .or_else(|| env::var("USER").ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "local".into())
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "PYTHON_BIN",
        "EXECUTION_TIMEOUT",
        "PACKAGE_INSTALL_TIMEOUT",
        "AUTO_INSTALL_PACKAGES",
        "AUTO_RUN_DELAY_MS",
        "PREFERENCES_PATH",
        "CHAT_CACHE_PATH",
        "CHAT_CACHE_LENGTH",
        "USER_ID",
        "TOOLSET_ENTITY_ID",
        "LOG_LEVEL",
    ];

    KEYS.contains(&k) || k.starts_with("CHUTRA_")
}

fn config_dir() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("chutra")
}

fn default_config_path() -> PathBuf {
    config_dir().join(".chutrarc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    let temp = env::temp_dir().join("chutra");

    // Paths
    m.insert(
        "CHAT_CACHE_PATH".into(),
        temp.join("chat_cache").to_string_lossy().into_owned(),
    );
    m.insert(
        "PREFERENCES_PATH".into(),
        config_dir().join("preferences.json").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("CHAT_CACHE_LENGTH".into(), "100".into());
    m.insert("EXECUTION_TIMEOUT".into(), "30".into());
    m.insert("PACKAGE_INSTALL_TIMEOUT".into(), "300".into());
    m.insert("AUTO_RUN_DELAY_MS".into(), "500".into());

    // Strings
    m.insert("PYTHON_BIN".into(), "python3".into());
    m.insert("LOG_LEVEL".into(), "warn".into());

    // Bools as strings
    m.insert("AUTO_INSTALL_PACKAGES".into(), "true".into());

    m
}
