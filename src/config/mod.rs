/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和校验
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod display;
pub mod grid;
pub mod physics;

pub use display::DisplayConfig;
pub use grid::GridConfig;
pub use physics::{ParamRange, ParamStore, PhysicsParams};

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// 物理参数
    pub physics: PhysicsParams,
    /// 网格配置
    pub grid: GridConfig,
    /// 显示配置
    pub display: DisplayConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl CascadeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 按扩展名加载（.json 用JSON，其余用TOML）
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 按扩展名保存
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => self.save_json(path),
            _ => self.save_toml(path),
        }
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// 从任意键值来源覆盖配置
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(raw: Option<String>, target: &mut T) {
            if let Some(value) = raw.and_then(|v| v.trim().parse().ok()) {
                *target = value;
            }
        }

        // 网格配置
        parse(lookup("CASCADE_DENSITY"), &mut self.grid.density);
        if let Some(seed) = lookup("CASCADE_SEED").and_then(|v| v.trim().parse().ok()) {
            self.grid.seed = Some(seed);
        }

        // 物理配置
        parse(lookup("CASCADE_GRAVITY"), &mut self.physics.gravity);
        parse(lookup("CASCADE_NOISE"), &mut self.physics.noise_strength);
        parse(lookup("CASCADE_THRESHOLD"), &mut self.physics.threshold);
        parse(lookup("CASCADE_COLLIDE"), &mut self.physics.collide);
        parse(lookup("CASCADE_INVERT_MASK"), &mut self.physics.invert_mask);

        // 显示配置
        parse(lookup("CASCADE_WIDTH"), &mut self.display.width);
        parse(lookup("CASCADE_HEIGHT"), &mut self.display.height);
        parse(lookup("CASCADE_VSYNC"), &mut self.display.vsync);

        if let Some(level) = lookup("CASCADE_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&level) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.physics.validate()?;
        self.grid.validate()?;
        self.display.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./cascade.toml
    /// 2. ./cascade.json
    /// 3. <用户配置目录>/cascade/cascade.toml
    /// 4. 使用默认配置
    ///
    /// 返回配置以及它的来源路径。
    pub fn load_or_default() -> (Self, Option<PathBuf>) {
        let mut candidates = vec![PathBuf::from("cascade.toml"), PathBuf::from("cascade.json")];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("cascade").join("cascade.toml"));
        }

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    tracing::info!(target: "config", "Loaded config from {:?}", path);
                    return (config, Some(path));
                }
                Err(e) => {
                    tracing::warn!(target: "config", "Ignoring {:?}: {}", path, e);
                }
            }
        }

        tracing::info!(target: "config", "Using default configuration");
        (Self::default(), None)
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: LogLevel,
    /// 是否输出线程名
    pub thread_names: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    thread_names: false,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// EnvFilter 指令
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CascadeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = CascadeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CascadeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed = CascadeConfig::from_toml_str(
            r#"
[physics]
gravity = 2.0

[grid]
density = 0.3
"#,
        )
        .unwrap();
        assert_eq!(parsed.physics.gravity, 2.0);
        assert_eq!(parsed.physics.threshold, 0.45);
        assert_eq!(parsed.grid.density, 0.3);
        assert_eq!(parsed.grid.min_width, 200);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cascade.json");

        let mut config = CascadeConfig::default();
        config.physics.invert_mask = true;
        config.display.trail_fade = 0.25;
        config.save(&path).unwrap();

        let loaded = CascadeConfig::from_file(&path).unwrap();
        assert!(loaded.physics.invert_mask);
        assert_eq!(loaded.display.trail_fade, 0.25);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CASCADE_DENSITY", "0.2"),
            ("CASCADE_SEED", " 17 "),
            ("CASCADE_COLLIDE", "false"),
            ("CASCADE_GRAVITY", "not a number"),
            ("CASCADE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = CascadeConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.grid.density, 0.2);
        assert_eq!(config.grid.seed, Some(17));
        assert!(!config.physics.collide);
        assert_eq!(config.physics.gravity, 3.5);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_unparsable_seed_keeps_previous() {
        let mut config = CascadeConfig::default();
        config.grid.seed = Some(3);
        config.apply_overrides_from(|key| (key == "CASCADE_SEED").then(|| "-1".to_string()));
        assert_eq!(config.grid.seed, Some(3));
    }

    #[test]
    fn test_nan_max_dt_rejected() {
        let config = CascadeConfig::from_toml_str("[grid]\nmax_dt = nan\n").unwrap();
        assert!(config.grid.max_dt.is_nan());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        let result = CascadeConfig::from_toml_str("physics = 3");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
