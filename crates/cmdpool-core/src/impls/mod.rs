//! Impls - Command の実装
//!
//! - **Program**: 外部プログラム（本番用）
//! - **Shell**: `sh -c` 経由のスクリプト
//! - **Scripted**: プロセスを起動しないテスト用実装

pub mod process;
pub mod scripted;
pub mod shell;

pub use self::process::{ProcessExecution, Program};
pub use self::scripted::{Scripted, ScriptedRun, Step};
pub use self::shell::Shell;
