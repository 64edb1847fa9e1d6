//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **DockerCli**: `docker` CLI を使う ContainerRuntime（本番用）
//! - **InMemoryRuntime**: 呼び出しを記録する ContainerRuntime（開発・テスト用）
//! - **StaticTenantDirectory**: 設定由来の TenantDirectory

pub mod docker_cli;
pub mod inmem_runtime;
pub mod static_tenants;

pub use self::docker_cli::DockerCli;
pub use self::inmem_runtime::{InMemoryRuntime, RuntimeCalls};
pub use self::static_tenants::StaticTenantDirectory;
