//! FRC batch planning and result aggregation.
//!
//! A selective FRC reaches at most 63 nodes and returns their answers
//! packed in selection order. Results that do not fit the inline FRC data
//! are fetched with `CMD_FRC_EXTRARESULT` and appended before decoding.
//!
//! ```text
//! FrcData:  [reserved][node 0][node 1] ... [node 53] | extra: [node 54] ... [node 62]
//! ```

use std::collections::BTreeMap;

use iqmesh_dpa::frc::{extra_result_request, FRC_DATA_LEN, FRC_EXTRA_RESULT_LEN};
use iqmesh_dpa::{
    DeviceAddress, DpaError, DpaRequest, ExclusiveAccess, FrcRequest, FrcResponse, NodeBitmap,
    TransactionTrail, MAX_DEVICE_ADDRESS,
};
use tracing::debug;

use crate::error::Result;

/// Hard limit of one selective FRC.
pub const MAX_SELECTIVE_NODES: usize = 63;

/// Size of one node's answer in the FRC data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultWidth {
    OneByte,
    FourBytes,
}

impl ResultWidth {
    pub fn bytes(self) -> usize {
        match self {
            ResultWidth::OneByte => 1,
            ResultWidth::FourBytes => 4,
        }
    }

    /// Leading FRC data bytes that belong to no selected node.
    pub fn inline_offset(self) -> usize {
        self.bytes()
    }

    /// Answers that fit the inline FRC data.
    pub fn inline_nodes(self) -> usize {
        (FRC_DATA_LEN - self.inline_offset()) / self.bytes()
    }

    /// Answers that fit inline data plus the extra result.
    pub fn max_nodes(self) -> usize {
        let capacity = (FRC_DATA_LEN - self.inline_offset() + FRC_EXTRA_RESULT_LEN) / self.bytes();
        capacity.min(MAX_SELECTIVE_NODES)
    }
}

/// One selective FRC worth of nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrcBatch {
    /// Nodes in selection order
    pub nodes: Vec<DeviceAddress>,
    pub selection: NodeBitmap,
}

impl FrcBatch {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn needs_extra_result(&self, width: ResultWidth) -> bool {
        self.nodes.len() > width.inline_nodes()
    }

    pub fn request(&self, command: u8, user_data: &[u8], hwpid: u16) -> Result<DpaRequest> {
        Ok(FrcRequest::selective(command, self.selection, user_data.to_vec())?.to_dpa_request(hwpid))
    }
}

/// Splits node lists into capacity-bounded batches.
#[derive(Debug, Clone, Copy)]
pub struct FrcBatchPlanner {
    width: ResultWidth,
}

impl FrcBatchPlanner {
    pub fn new(width: ResultWidth) -> Self {
        Self { width }
    }

    pub fn batch_capacity(&self) -> usize {
        self.width.max_nodes()
    }

    /// Consume `nodes` from the front into consecutive batches.
    ///
    /// The list is sorted and deduplicated first, so each batch's order
    /// matches the order the coordinator walks its selection bitmap.
    pub fn plan(&self, nodes: &[DeviceAddress]) -> Result<Vec<FrcBatch>> {
        let mut ordered = nodes.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        if let Some(&invalid) = ordered.iter().find(|a| **a > MAX_DEVICE_ADDRESS) {
            return Err(DpaError::InvalidAddress(u16::from(invalid)).into());
        }

        ordered
            .chunks(self.batch_capacity())
            .map(|chunk| -> Result<FrcBatch> {
                Ok(FrcBatch {
                    nodes: chunk.to_vec(),
                    selection: NodeBitmap::from_addresses(chunk)?,
                })
            })
            .collect()
    }
}

/// Parameters of a selective FRC fan-out.
#[derive(Debug, Clone)]
pub struct SelectiveFrc {
    pub command: u8,
    pub user_data: Vec<u8>,
    pub width: ResultWidth,
    pub hwpid: u16,
}

/// Send one batch and return its answer bytes in selection order.
///
/// Runs `CMD_FRC_SEND_SELECTIVE`, rejects bad FRC status, and fetches the
/// extra result when the batch overflows the inline data.
pub async fn execute_batch(
    access: &ExclusiveAccess,
    batch: &FrcBatch,
    frc: &SelectiveFrc,
    repeat: u8,
    trail: &mut TransactionTrail,
) -> Result<Vec<u8>> {
    let request = batch.request(frc.command, &frc.user_data, frc.hwpid)?;
    let response = access.execute_repeat(&request, repeat, None, trail).await?;
    let frc_response = FrcResponse::checked(&response)?;

    let mut answers = frc_response
        .data
        .get(frc.width.inline_offset()..)
        .unwrap_or_default()
        .to_vec();

    if batch.needs_extra_result(frc.width) {
        let extra = access
            .execute_repeat(&extra_result_request(), repeat, None, trail)
            .await?;
        let continuation = extra.pdata_range(0, FRC_EXTRA_RESULT_LEN, "FRC extra result")?;
        answers.extend_from_slice(continuation);
    }

    debug!(
        command = frc.command,
        nodes = batch.len(),
        status = frc_response.status,
        "FRC batch completed"
    );
    Ok(answers)
}

/// Merges per-batch answers into one address keyed map.
#[derive(Debug)]
pub struct FrcResultAggregator<T> {
    width: ResultWidth,
    results: BTreeMap<DeviceAddress, T>,
}

impl<T> FrcResultAggregator<T> {
    pub fn new(width: ResultWidth) -> Self {
        Self {
            width,
            results: BTreeMap::new(),
        }
    }

    /// Decode `answers` for `batch`, walking nodes in selection order.
    pub fn absorb(
        &mut self,
        batch: &FrcBatch,
        answers: &[u8],
        decode: impl Fn(u32) -> T,
    ) -> Result<()> {
        let size = self.width.bytes();
        for (index, &address) in batch.nodes.iter().enumerate() {
            let start = index * size;
            let chunk = answers.get(start..start + size).ok_or_else(|| {
                DpaError::BadResponse(format!(
                    "FRC answer for node {} missing at offset {}",
                    address, start
                ))
            })?;
            let raw = match self.width {
                ResultWidth::OneByte => u32::from(chunk[0]),
                ResultWidth::FourBytes => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            };
            if self.results.insert(address, decode(raw)).is_some() {
                return Err(DpaError::BadResponse(format!(
                    "node {} answered in two batches",
                    address
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Final map; every expected address must be present exactly once.
    pub fn finish(self, expected: &[DeviceAddress]) -> Result<BTreeMap<DeviceAddress, T>> {
        if let Some(missing) = expected.iter().find(|a| !self.results.contains_key(*a)) {
            return Err(DpaError::BadResponse(format!("no FRC answer decoded for node {}", missing)).into());
        }
        Ok(self.results)
    }
}

/// Value of an answer that reserves 0 for "did not answer".
pub fn answered_value(raw: u32) -> Option<u32> {
    raw.checked_sub(1)
}

/// Plan, send and aggregate a selective FRC over `nodes`.
///
/// One failed batch fails the whole fan-out.
pub async fn run_selective<T>(
    access: &ExclusiveAccess,
    nodes: &[DeviceAddress],
    frc: &SelectiveFrc,
    repeat: u8,
    trail: &mut TransactionTrail,
    decode: impl Fn(u32) -> T,
) -> Result<BTreeMap<DeviceAddress, T>> {
    let batches = FrcBatchPlanner::new(frc.width).plan(nodes)?;
    let mut aggregator = FrcResultAggregator::new(frc.width);
    for batch in &batches {
        let answers = execute_batch(access, batch, frc, repeat, trail).await?;
        aggregator.absorb(batch, &answers, &decode)?;
    }
    aggregator.finish(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacities() {
        assert_eq!(ResultWidth::OneByte.inline_nodes(), 54);
        assert_eq!(ResultWidth::OneByte.max_nodes(), 63);
        assert_eq!(ResultWidth::FourBytes.inline_nodes(), 12);
        assert_eq!(ResultWidth::FourBytes.max_nodes(), 15);
    }

    #[test]
    fn test_plan_bounds() {
        let nodes: Vec<u8> = (1..=239).collect();
        for width in [ResultWidth::OneByte, ResultWidth::FourBytes] {
            let batches = FrcBatchPlanner::new(width).plan(&nodes).unwrap();
            assert!(batches
                .iter()
                .all(|b| !b.is_empty() && b.len() <= width.max_nodes()));
            let flattened: Vec<u8> = batches.iter().flat_map(|b| b.nodes.clone()).collect();
            assert_eq!(flattened, nodes);
        }
    }

    #[test]
    fn test_plan_seventy_nodes() {
        let nodes: Vec<u8> = (1..=70).collect();
        let batches = FrcBatchPlanner::new(ResultWidth::OneByte).plan(&nodes).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 63);
        assert_eq!(batches[1].len(), 7);
        assert!(batches[0].needs_extra_result(ResultWidth::OneByte));
        assert!(!batches[1].needs_extra_result(ResultWidth::OneByte));
        assert_eq!(batches[1].selection.addresses(), (64..=70).collect::<Vec<u8>>());
    }

    #[test]
    fn test_plan_empty_and_invalid() {
        let planner = FrcBatchPlanner::new(ResultWidth::OneByte);
        assert!(planner.plan(&[]).unwrap().is_empty());
        assert!(planner.plan(&[1, 240]).is_err());
    }

    #[test]
    fn test_aggregate_selection_order() {
        let planner = FrcBatchPlanner::new(ResultWidth::OneByte);
        let batches = planner.plan(&[9, 3, 5]).unwrap();
        let mut aggregator = FrcResultAggregator::new(ResultWidth::OneByte);
        aggregator
            .absorb(&batches[0], &[4, 0, 11], answered_value)
            .unwrap();
        let results = aggregator.finish(&[3, 5, 9]).unwrap();
        assert_eq!(results[&3], Some(3));
        assert_eq!(results[&5], None);
        assert_eq!(results[&9], Some(10));
    }

    #[test]
    fn test_aggregate_four_byte_blocks() {
        let batches = FrcBatchPlanner::new(ResultWidth::FourBytes)
            .plan(&[1, 2])
            .unwrap();
        let mut answers = 0x8100_0002u32.to_le_bytes().to_vec();
        answers.extend_from_slice(&[0, 0, 0, 0]);
        let mut aggregator = FrcResultAggregator::new(ResultWidth::FourBytes);
        aggregator.absorb(&batches[0], &answers, answered_value).unwrap();
        let results = aggregator.finish(&[1, 2]).unwrap();
        assert_eq!(results[&1], Some(0x8100_0001));
        assert_eq!(results[&2], None);
    }

    #[test]
    fn test_short_answers_rejected() {
        let batches = FrcBatchPlanner::new(ResultWidth::OneByte)
            .plan(&[1, 2])
            .unwrap();
        let mut aggregator = FrcResultAggregator::new(ResultWidth::OneByte);
        assert!(aggregator.absorb(&batches[0], &[1], answered_value).is_err());
    }
}
