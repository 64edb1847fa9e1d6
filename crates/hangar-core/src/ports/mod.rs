//! Ports - 抽象化レイヤー
//!
//! 外部システム（container engine, identity, 時刻, ID 生成）への
//! インターフェースを定義し、実装の詳細を隠蔽する。

pub mod clock;
pub mod container_runtime;
pub mod id_generator;
pub mod tenant_directory;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::container_runtime::{ContainerRuntime, ContainerSpec, ContainerStats, RestartPolicy};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::tenant_directory::TenantDirectory;
