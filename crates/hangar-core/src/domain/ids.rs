//! Domain identifiers.
//!
//! # ULID ベースの AppId
//! - **時刻でソート可能**: 生成順序で並ぶ
//! - **分散生成可能**: 調整なしで生成できる
//! - 任意の label（customID）を先頭に埋め込める
//!
//! AppId はファイルシステムのディレクトリ名と container 名にそのまま使われるため、
//! 文字種を `[a-z0-9-]` に制限する。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::errors::ValidationError;

const PREFIX: &str = "app-";
const MAX_ID_LEN: usize = 80;
const MIN_LABEL_LEN: usize = 3;
const MAX_LABEL_LEN: usize = 40;

/// Identifier of an App.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// ULID から AppId を作成（`app-<ulid>`）
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{PREFIX}{}", ulid.to_string().to_ascii_lowercase()))
    }

    /// label を埋め込んだ AppId を作成（`<label>-<ulid>`）
    pub fn with_label(label: &str, ulid: Ulid) -> Result<Self, ValidationError> {
        validate_label(label)?;
        Ok(Self(format!(
            "{label}-{}",
            ulid.to_string().to_ascii_lowercase()
        )))
    }

    /// Parse an externally supplied id (HTTP path, directory name).
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() || raw.len() > MAX_ID_LEN {
            return Err(ValidationError::new(
                "invalid_app_id",
                format!("app id must be 1..={MAX_ID_LEN} characters"),
            ));
        }
        if !raw.chars().all(is_slug_char) || raw.starts_with('-') {
            return Err(ValidationError::new(
                "invalid_app_id",
                format!("app id {raw:?} contains unsupported characters"),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the backing container.
    pub fn container_name(&self) -> String {
        format!("hangar-{}", self.0)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// Validate a user supplied label (`customID`).
pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    let len = label.chars().count();
    if !(MIN_LABEL_LEN..=MAX_LABEL_LEN).contains(&len) {
        return Err(ValidationError::new(
            "invalid_custom_id",
            format!("customID must be {MIN_LABEL_LEN}..={MAX_LABEL_LEN} characters"),
        ));
    }
    if !label.chars().all(is_slug_char) || label.starts_with('-') || label.ends_with('-') {
        return Err(ValidationError::new(
            "invalid_custom_id",
            "customID may only contain lowercase letters, digits and inner dashes",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn generated_ids_carry_prefix_and_are_sortable() {
        let id1 = AppId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = AppId::from_ulid(Ulid::new());

        assert!(id1.as_str().starts_with("app-"));
        assert!(id1 < id2);
        assert_eq!(id1.container_name(), format!("hangar-{id1}"));
    }

    #[test]
    fn labelled_id_embeds_label() {
        let id = AppId::with_label("my-shop", Ulid::new()).unwrap();
        assert!(id.as_str().starts_with("my-shop-"));
        // round-trips through parse
        assert_eq!(AppId::parse(id.as_str()).unwrap(), id);

        let longest = AppId::with_label(&"a".repeat(40), Ulid::new()).unwrap();
        assert!(AppId::parse(longest.as_str()).is_ok());
    }

    #[rstest]
    #[case::too_short("ab")]
    #[case::upper("MyShop")]
    #[case::slash("a/b/c")]
    #[case::dots("..hidden")]
    #[case::leading_dash("-shop")]
    fn invalid_labels_are_rejected(#[case] label: &str) {
        let err = validate_label(label).unwrap_err();
        assert_eq!(err.code, "invalid_custom_id");
    }

    #[rstest]
    #[case::empty("")]
    #[case::traversal("../etc")]
    #[case::space("app 1")]
    fn invalid_ids_are_rejected(#[case] raw: &str) {
        assert!(AppId::parse(raw).is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = AppId::parse("app-01abc").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"app-01abc\"");
    }
}
