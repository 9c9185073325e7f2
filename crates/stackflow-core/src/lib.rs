//! StackFlow Core
//!
//! スタックの desired state（リソースと依存関係）を表すモデルと、
//! KDLスタックファイルの読み込み、検証、テンプレート合成を提供します。

pub mod builtin;
pub mod error;
pub mod graph;
pub mod model;
pub mod parser;
pub mod synth;
pub mod validate;

pub use builtin::{INFRASTRUCTURE_STACK_NAME, infrastructure_stack};
pub use error::{FlowError, Result};
pub use graph::ResourceGraph;
pub use model::*;
pub use parser::{load_stack_file, parse_stack_string};
pub use synth::{Template, TemplateOutput, TemplateResource, synthesize};
pub use validate::validate;
