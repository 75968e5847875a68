//! Day-per-page slicing for read endpoints

use crate::types::{Dataset, DayBucket};
use serde::Serialize;

/// Days per page
pub const PAGE_SIZE: usize = 1;

/// One page of the dataset, shaped as returned to API consumers
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<'a> {
    #[serde(rename = "lecturas")]
    pub days: &'a [DayBucket],
    pub page: usize,
    pub pages: usize,
    pub total: usize,
}

/// Slice the sorted dataset. Page numbers start at 1 and 0 is read as 1;
/// pages past the end come back empty.
pub fn paginate(dataset: &Dataset, page: usize) -> Page<'_> {
    let total = dataset.len();
    let page = page.max(1);
    let start = (page - 1).saturating_mul(PAGE_SIZE).min(total);
    let end = start.saturating_add(PAGE_SIZE).min(total);

    Page {
        days: &dataset.days()[start..end],
        page,
        pages: total.div_ceil(PAGE_SIZE),
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dataset(n: u32) -> Dataset {
        let days = (1..=n)
            .map(|d| DayBucket::new(NaiveDate::from_ymd_opt(2025, 6, d).unwrap()))
            .collect();
        Dataset::from_days(days)
    }

    #[test]
    fn test_first_and_last_page() {
        let data = dataset(3);
        let first = paginate(&data, 1);
        assert_eq!(first.days.len(), 1);
        assert_eq!(first.days[0].date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!((first.page, first.pages, first.total), (1, 3, 3));

        let last = paginate(&data, 3);
        assert_eq!(last.days[0].date, NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
    }

    #[test]
    fn test_page_zero_and_overflow() {
        let data = dataset(2);
        assert_eq!(paginate(&data, 0).page, 1);
        let beyond = paginate(&data, 9);
        assert!(beyond.days.is_empty());
        assert_eq!(beyond.pages, 2);
    }

    #[test]
    fn test_empty_dataset() {
        let data = Dataset::new();
        let page = paginate(&data, 1);
        assert!(page.days.is_empty());
        assert_eq!((page.pages, page.total), (0, 0));
    }

    #[test]
    fn test_page_json_shape() {
        let data = dataset(1);
        let value = serde_json::to_value(paginate(&data, 1)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "lecturas": [{"fecha": "2025-06-01", "horas": []}],
                "page": 1,
                "pages": 1,
                "total": 1
            })
        );
    }
}
