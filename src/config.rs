use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/invoice_reconcile".to_string(),
            max_connections: 20,
        }
    }
}

/// 流水线参数 - 所有阈值与权重均可配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub matching: MatchingConfig,
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// 低于该置信度的字段记为非致命告警
    pub min_field_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_field_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    pub exact: f64,
    pub fuzzy: f64,
    pub partial: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            exact: 0.95,
            fuzzy: 0.85,
            partial: 0.70,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub vendor: f64,
    pub amount: f64,
    pub lines: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            vendor: 0.3,
            amount: 0.4,
            lines: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub thresholds: MatchThresholds,
    pub weights: MatchWeights,
    /// 供应商名称相似度门槛
    pub vendor_similarity_threshold: f64,
    /// 金额容差 (比例)
    pub amount_tolerance: f64,
    /// 明细配对的最低描述相似度
    pub line_pairing_floor: f64,
    /// 匹配复核调用超时 (毫秒)
    pub advisor_timeout_ms: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            thresholds: MatchThresholds::default(),
            weights: MatchWeights::default(),
            vendor_similarity_threshold: 0.85,
            amount_tolerance: 0.02,
            line_pairing_floor: 0.5,
            advisor_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub duplicate: f64,
    pub vendor: f64,
    pub price: f64,
    pub amount: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            duplicate: 0.4,
            vendor: 0.3,
            price: 0.2,
            amount: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.25,
            high: 0.50,
            critical: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    pub levels: RiskLevelThresholds,
    /// 近似重复的金额容差 (比例)
    pub duplicate_amount_tolerance: f64,
    /// 特征向量余弦相似度门槛
    pub duplicate_similarity_threshold: f64,
    /// 相似度重复只比较日期相差不超过该天数的历史发票
    pub duplicate_date_window_days: i64,
    /// 发票供应商名与订单供应商名的相似度门槛
    pub vendor_name_similarity_threshold: f64,
    pub price_spike_sigma: f64,
    /// 标准差下限 (占均值比例)，0 表示严格按 均值 + sigma × 标准差
    pub price_stddev_floor_ratio: f64,
    /// 计算价格基线所需的最少样本
    pub min_price_samples: usize,
    pub amount_anomaly_multiple: f64,
    /// 整数金额的重要性门槛
    pub round_amount_threshold: f64,
    /// 付款期限偏差容忍天数
    pub payment_terms_tolerance_days: i32,
    /// 近期发票回溯天数
    pub history_window_days: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            levels: RiskLevelThresholds::default(),
            duplicate_amount_tolerance: 0.01,
            duplicate_similarity_threshold: 0.95,
            duplicate_date_window_days: 7,
            vendor_name_similarity_threshold: 0.85,
            price_spike_sigma: 2.0,
            price_stddev_floor_ratio: 0.0,
            min_price_samples: 3,
            amount_anomaly_multiple: 3.0,
            round_amount_threshold: 10_000.0,
            payment_terms_tolerance_days: 0,
            history_window_days: 365,
        }
    }
}

impl AppConfig {
    /// 加载顺序：默认值 -> config/reconcile.* (可选) -> RECONCILE__* 环境变量
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config/reconcile").required(false))
            .add_source(
                config::Environment::with_prefix("RECONCILE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
