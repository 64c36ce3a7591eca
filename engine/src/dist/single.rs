use super::Coordinator;
use crate::{EngineErr, Result};

/// The process group of a single worker, every collective is a local no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl SingleProcess {
    pub fn new() -> Self {
        Self
    }
}

impl Coordinator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    async fn barrier(&mut self) -> Result<()> {
        Ok(())
    }

    async fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        Ok(vec![bytes])
    }

    async fn reduce_sum(&mut self, _values: &mut [f32], dst: usize) -> Result<()> {
        if dst != 0 {
            return Err(EngineErr::InvalidRank {
                rank: dst,
                world_size: 1,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::all_gather;

    #[tokio::test]
    async fn collectives_are_identities() {
        let mut coord = SingleProcess::new();
        assert!(coord.is_coordinator());

        coord.barrier().await.unwrap();

        let gathered = all_gather(&mut coord, &vec![1u64, 2, 3]).await.unwrap();
        assert_eq!(gathered, vec![vec![1, 2, 3]]);

        let mut values = [1.0, 2.0];
        coord.reduce_sum(&mut values, 0).await.unwrap();
        assert_eq!(values, [1.0, 2.0]);
    }

    #[tokio::test]
    async fn reduce_to_missing_rank_fails() {
        let mut values = [1.0];
        let res = SingleProcess.reduce_sum(&mut values, 1).await;
        assert!(matches!(res, Err(EngineErr::InvalidRank { rank: 1, .. })));
    }
}
