//! 수집 대상 유니버스 로딩.
//!
//! 유니버스 파일 형식 (한 줄에 한 종목):
//!
//! ```text
//! # 코스피 대형주
//! 005930,삼성전자
//! 000660,SK하이닉스
//! 035720
//! ```
//!
//! 중복 종목코드는 처음 등장한 것만 남깁니다.

use krx_core::{dedup_work_items, WorkItem};
use std::collections::HashSet;
use std::path::Path;

/// 유니버스 텍스트 파싱.
pub fn parse_universe(text: &str) -> Vec<WorkItem> {
    let items = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.splitn(2, ',');
            let code = parts.next()?.trim();
            if code.is_empty() {
                return None;
            }
            let name = parts.next().map(str::trim).unwrap_or_default();
            Some(WorkItem::new(code, name))
        })
        .collect();

    dedup_work_items(items)
}

/// 유니버스 파일 로딩.
pub async fn load_universe_file(path: impl AsRef<Path>) -> std::io::Result<Vec<WorkItem>> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    let items = parse_universe(&text);
    tracing::info!(path = %path.as_ref().display(), count = items.len(), "유니버스 로딩");
    Ok(items)
}

/// 쉼표로 구분된 종목코드 (예: "005930,000660").
pub fn parse_symbols(symbols: &str) -> Vec<WorkItem> {
    let items = symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(WorkItem::from_code)
        .collect();

    dedup_work_items(items)
}

/// 제외 목록 파일 (상장폐지 등). 유니버스 파일과 같은 형식이며 종목코드만 사용합니다.
pub async fn load_skip_list(path: impl AsRef<Path>) -> std::io::Result<HashSet<String>> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(parse_universe(&text).into_iter().map(|item| item.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_universe() {
        let text = "# 대형주\n005930,삼성전자\n\n000660, SK하이닉스 \n035720\n005930,중복\n";
        let items = parse_universe(text);

        assert_eq!(items.len(), 3);
        assert_eq!(items[0], WorkItem::new("005930", "삼성전자"));
        assert_eq!(items[1].display_name, "SK하이닉스");
        assert_eq!(items[2], WorkItem::from_code("035720"));
    }

    #[test]
    fn test_parse_symbols() {
        let items = parse_symbols(" 005930, 000660,,005930 ");
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["005930", "000660"]);
    }

    #[tokio::test]
    async fn test_load_files() {
        let dir = std::env::temp_dir().join(format!("krx-universe-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let universe = dir.join("universe.txt");
        tokio::fs::write(&universe, "005930,삼성전자\n000660\n").await.unwrap();
        let skip = dir.join("delisted.txt");
        tokio::fs::write(&skip, "# 상장폐지\n000660\n").await.unwrap();

        let items = load_universe_file(&universe).await.unwrap();
        assert_eq!(items.len(), 2);

        let skipped = load_skip_list(&skip).await.unwrap();
        assert!(skipped.contains("000660"));
        assert_eq!(skipped.len(), 1);

        assert!(load_universe_file(dir.join("missing.txt")).await.is_err());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
