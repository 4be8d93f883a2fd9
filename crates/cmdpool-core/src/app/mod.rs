//! App - アプリケーション層
//!
//! ports を組み合わせてプールを実装します。
//!
//! # 主要コンポーネント
//! - **CommandPool**: 公開 API（process / start / wait / close）
//! - **WorkerGroup**: 固定数のワーカーとその実行ループ
//! - **Outstanding**: 非同期タスクの未完了数

pub mod pool;
pub(crate) mod tracker;
pub(crate) mod worker_loop;

pub use self::pool::CommandPool;
