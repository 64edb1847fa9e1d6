//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::errors::ValidationError;
use crate::domain::ids::AppId;
use crate::ports::Clock;

/// IdGenerator は一意な AppId を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（request ハンドラと watchdog の両方から使う）
pub trait IdGenerator: Send + Sync {
    /// `label` があればそれを埋め込んだ ID を返す
    fn generate_app_id(&self, label: Option<&str>) -> Result<AppId, ValidationError>;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻を timestamp 部に使うため、FixedClock で時刻部分を固定できる。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_app_id(&self, label: Option<&str>) -> Result<AppId, ValidationError> {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        match label {
            Some(label) => AppId::with_label(label, ulid),
            None => Ok(AppId::from_ulid(ulid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.generate_app_id(None).unwrap();
        let id2 = id_gen.generate_app_id(None).unwrap();

        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("app-"));
    }

    #[test]
    fn fixed_clock_ids_share_timestamp_but_differ() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.generate_app_id(Some("shop")).unwrap();
        let id2 = id_gen.generate_app_id(Some("shop")).unwrap();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);
        // "shop-" + timestamp 部分（10 文字）は同じ
        assert_eq!(id1.as_str()[..15], id2.as_str()[..15]);
    }

    #[test]
    fn invalid_label_is_rejected() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        assert!(id_gen.generate_app_id(Some("../x")).is_err());
    }
}
