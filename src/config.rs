//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Database configuration / 数据库配置
    pub database: DatabaseConfig,
    /// Price feed configuration / 报价源配置
    pub feed: FeedConfig,
    /// Cache configuration / 缓存配置
    pub cache: CacheConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Main database file path (relative to data_dir) / 主数据库文件路径
    pub db_file: String,
}

/// Price feed configuration / 报价源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Directory holding daily snapshot files (relative to data_dir when
    /// not absolute) / 每日快照文件目录
    pub snapshot_dir: String,
}

/// Cache configuration / 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Base TTL for cached search results, seconds / 缓存TTL（秒）
    pub ttl_secs: u64,
    /// Payloads above this size are gzip-compressed / 压缩阈值（字节）
    pub compress_threshold: usize,
    /// Upper bound on cached entries / 缓存条目上限
    pub max_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8180,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "pricelist.db".to_string(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: "snapshots".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            compress_threshold: 8 * 1024,
            max_entries: 4096,
        }
    }
}

impl AppConfig {
    /// Get the full database URL / 获取完整的数据库URL
    pub fn get_database_url(&self) -> String {
        let db_path = Path::new(&self.database.data_dir).join(&self.database.db_file);
        format!("sqlite:{}?mode=rwc", db_path.to_string_lossy())
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    /// Get the snapshot directory path / 获取快照目录路径
    pub fn get_snapshot_dir(&self) -> PathBuf {
        let dir = Path::new(&self.feed.snapshot_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.get_data_dir().join(dir)
        }
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        // Create default config / 创建默认配置
        let config = AppConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<AppConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG.set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG.get_or_init(|| {
        let config = load_config().unwrap_or_default();
        Arc::new(RwLock::new(config))
    }).clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}
