use thiserror::Error;

/// 协作方 (数据库 / 外部服务) 访问错误
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// 单个候选订单评分失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("order {order_id}: currency {found} does not match invoice currency {expected}")]
    CurrencyMismatch {
        order_id: String,
        expected: String,
        found: String,
    },

    #[error("order {order_id}: non-positive or unreadable total")]
    InvalidTotal { order_id: String },

    #[error("order {order_id}: unreadable amount on line '{line}'")]
    InvalidLine { order_id: String, line: String },
}
