//! Relevance ordering for merged results.

use medsearch_common::ResultRecord;

/// Sort by relevance, highest first. Records without a usable score are given
/// 0.5; equal scores keep their incoming order. No deduplication.
pub fn rank(mut records: Vec<ResultRecord>) -> Vec<ResultRecord> {
    for record in &mut records {
        record.relevance_score = Some(record.relevance());
    }
    records.sort_by(|a, b| b.relevance().total_cmp(&a.relevance()));
    records
}
