//! cmdpool-core
//!
//! Bounded pool for running external commands concurrently under one shared
//! cancellation/deadline context.
//!
//! # モジュール構成
//! - **context**: キャンセルと期限をまとめた `ExecContext`
//! - **domain**: ドメインモデル（ids, envelope, result, errors）
//! - **ports**: プールが要求する抽象（Command, Executable）
//! - **impls**: Command の実装（Program, Shell, Scripted）
//! - **app**: プール本体（CommandPool, WorkerGroup, Outstanding）
//! - **config**: 環境変数からの設定
//! - **observability**: 統計（PoolStats）

pub mod app;
pub mod config;
pub mod context;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::CommandPool;
pub use config::PoolConfig;
pub use context::{ContextError, ExecContext};
pub use domain::{CommandResult, ExecError, PoolError, TaskEnvelope, TaskId};
pub use observability::PoolStats;
pub use ports::{Command, Executable};
