use anyhow::Result;
use serde::Serialize;

use crate::blocks::Block;
use crate::client::DocsWriteApi;
use crate::error::DocsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchCall {
    pub index: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub requested: usize,
    pub inserted: usize,
    pub batches: Vec<BatchCall>,
}

/// Insert `blocks` under `parent_block_id` in batches of at most `max_batch`.
///
/// Each batch lands right after the previous one, so calls are issued one at
/// a time. A failed call stops the run with `DocsError::BatchAborted`; the
/// batches already committed stay in the document.
pub fn insert_in_batches<A: DocsWriteApi>(
    api: &mut A,
    document_id: &str,
    parent_block_id: &str,
    blocks: &[Block],
    start_index: usize,
    max_batch: usize,
) -> Result<DispatchReport> {
    let mut report = DispatchReport {
        requested: blocks.len(),
        ..DispatchReport::default()
    };

    for batch in blocks.chunks(max_batch.max(1)) {
        let index = start_index + report.inserted;
        if let Err(source) = api.insert_children(document_id, parent_block_id, batch, index) {
            log::warn!(
                "insert at index {index} failed after {} of {} blocks",
                report.inserted,
                report.requested
            );
            return Err(DocsError::BatchAborted {
                inserted: report.inserted,
                requested: report.requested,
                source,
            }
            .into());
        }
        log::info!(
            "inserted {} blocks at index {index} into {document_id}",
            batch.len()
        );
        report.inserted += batch.len();
        report.batches.push(BatchCall {
            index,
            size: batch.len(),
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{BatchCall, insert_in_batches};
    use crate::blocks::Block;
    use crate::error::DocsError;
    use crate::mock::MockApi;

    fn blocks(count: usize) -> Vec<Block> {
        (0..count).map(|n| Block::text(&n.to_string())).collect()
    }

    #[test]
    fn splits_into_sequential_batches_with_running_index() {
        let mut api = MockApi::with_document("doxA", 0);
        let report = insert_in_batches(&mut api, "doxA", "doxA", &blocks(120), 0, 50)
            .expect("dispatch");

        assert_eq!(report.inserted, 120);
        assert_eq!(
            report.batches,
            vec![
                BatchCall { index: 0, size: 50 },
                BatchCall { index: 50, size: 50 },
                BatchCall { index: 100, size: 20 },
            ]
        );
        let calls = api
            .inserts
            .iter()
            .map(|insert| (insert.index, insert.blocks.len()))
            .collect::<Vec<_>>();
        assert_eq!(calls, vec![(0, 50), (50, 50), (100, 20)]);
        assert!(
            api.inserts
                .iter()
                .all(|insert| insert.document_id == "doxA" && insert.parent_block_id == "doxA")
        );
        assert_eq!(api.inserts[2].blocks[0].plain_text(), "100");
    }

    #[test]
    fn call_count_is_ceiling_of_blocks_over_batch_size() {
        for (count, batch, expected) in [(0, 50, 0), (1, 50, 1), (50, 50, 1), (51, 50, 2), (7, 3, 3)]
        {
            let mut api = MockApi::with_document("doxA", 0);
            let report = insert_in_batches(&mut api, "doxA", "doxA", &blocks(count), 5, batch)
                .expect("dispatch");
            assert_eq!(api.inserts.len(), expected);
            assert_eq!(report.inserted, count);
            let mut running = 5;
            for insert in &api.inserts {
                assert_eq!(insert.index, running);
                running += insert.blocks.len();
            }
        }
    }

    #[test]
    fn failure_aborts_and_reports_partial_progress() {
        let mut api = MockApi::with_document("doxA", 0);
        api.fail_insert_on_call = Some(2);

        let error = insert_in_batches(&mut api, "doxA", "doxA", &blocks(120), 0, 50)
            .expect_err("must fail");
        match error.downcast_ref::<DocsError>() {
            Some(DocsError::BatchAborted {
                inserted,
                requested,
                ..
            }) => {
                assert_eq!(*inserted, 50);
                assert_eq!(*requested, 120);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(api.inserts.len(), 1);
        assert_eq!(api.insert_attempts, 2);
    }
}
