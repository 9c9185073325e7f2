//! モデル定義
//!
//! スタックの desired state を表すデータモデルを定義します。

mod resource;
mod stack;
mod version;

// Re-exports
pub use resource::*;
pub use stack::*;
pub use version::*;
