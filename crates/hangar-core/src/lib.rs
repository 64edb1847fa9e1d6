//! hangar-core
//!
//! Core building blocks for the Hangar app lifecycle orchestrator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, app, state, plan, tenant, errors）
//! - **ports**: 抽象化レイヤー（ContainerRuntime, TenantDirectory, IdGenerator, Clock）
//! - **impls**: 実装（DockerCli, InMemoryRuntime, StaticTenantDirectory）
//! - **registry**: App registry と JSON snapshot
//! - **admission**: quota 判定（純粋関数）
//! - **deploy**: アップロードから provisioning までの deploy pipeline
//! - **app**: バックグラウンドループ（sync, prune, watchdog）とワイヤリング
//! - **config**: 設定（serde, フィールドごとのデフォルト）

pub mod admission;
pub mod app;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod registry;
