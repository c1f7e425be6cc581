//! モデル定義
//!
//! StackFlowで使用されるデータモデルを定義します。

mod resource;
mod stack;
mod value;

// Re-exports
pub use resource::*;
pub use stack::*;
pub use value::*;
