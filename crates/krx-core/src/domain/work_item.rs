//! 수집 대상 작업 항목.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 수집 대상 종목.
///
/// 실행마다 Run Controller가 고정된 유니버스에서 한 번 공급하며 이후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// 종목코드 (예: "005930")
    pub id: String,
    /// 종목명 (표시용)
    pub display_name: String,
}

impl WorkItem {
    /// 새 작업 항목 생성.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// 종목명 없이 코드만으로 생성.
    pub fn from_code(id: impl Into<String>) -> Self {
        Self::new(id, String::new())
    }
}

/// 중복된 종목코드를 제거합니다 (처음 등장한 항목 유지, 순서 보존).
pub fn dedup_work_items(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}
