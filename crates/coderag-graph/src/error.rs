use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("graph JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("tree-sitter language error: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("corpus root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("graph backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid graph data: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
