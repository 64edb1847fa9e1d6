//! App - アプリケーション層
//!
//! ports / registry / deploy を組み合わせてバックグラウンド処理を実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: 構築とワイヤリング（起動時検証）
//! - **SyncLoop**: 高頻度の状態同期（存在・稼働・使用量）
//! - **PruneLoop**: 長期間見つからない App の registry からの除去
//! - **Watchdog**: ディレクトリ走査とコンテナごとの monitor による自己修復
//! - **LoopGroup**: 周期ループの起動・停止・panic 回復
//! - **AvailabilityGuard**: runtime 到達性の確認と呼び出しごとの timeout

pub mod availability;
pub mod builder;
pub mod prune_loop;
pub mod status;
pub mod supervisor;
pub mod sync_loop;
pub mod watchdog;

// 主要な型を再エクスポート
pub use self::availability::{AvailabilityGuard, AvailabilityPolicy};
pub use self::builder::{BuildError, Orchestrator, OrchestratorBuilder, OrchestratorHandle};
pub use self::prune_loop::{PruneLoop, PrunePolicy};
pub use self::status::StatusCounts;
pub use self::supervisor::LoopGroup;
pub use self::sync_loop::{SyncLoop, SyncReport};
pub use self::watchdog::{ScanReport, TendResult, Watchdog};
