//! StackFlow Core
//!
//! 宣言されたクラウドリソースのモデル、KDL宣言ファイルのパース、
//! 依存グラフの構築とトポロジカル順序の計算を提供します。

pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod parser;
pub mod planner;

pub use error::*;
pub use graph::{DependencyGraph, EdgeKind};
pub use loader::{load_stack, load_stack_with_stage};
pub use model::*;
pub use parser::{parse_kdl_string, parse_kdl_string_with_stage};
pub use planner::{order, order_ids, reverse_order};
