mod common;

use std::{thread, time::Duration};

use common::{CountingCoordinator, Doubler, RecordingEvaluator, eval_batches, group};
use engine::{
    EngineErr, InferenceLoop, Result, SingleProcess, TestConfig, Timer,
    data::{Batch, InMemoryLoader, ShardSpec},
    device::{Cpu, Device},
    infer::{Augmentation, ForwardPath, PREDICTIONS_FILE},
};
use futures::future::join_all;

#[tokio::test]
async fn single_worker_evaluates_once() -> Result<()> {
    let mut il = InferenceLoop::new(TestConfig::default(), Doubler, Cpu);
    let mut loader = InMemoryLoader::new(eval_batches(0..5));
    let mut evaluator = RecordingEvaluator::default();

    let metrics = il
        .run(&mut SingleProcess, "toy", &mut loader, &mut evaluator, "toy", None)
        .await?;

    assert_eq!(metrics, Some(5));
    assert_eq!(evaluator.calls, 1);
    assert_eq!(evaluator.seen, [0, 2, 4, 6, 8]);
    assert_eq!(evaluator.thresholds, TestConfig::default().thresholds);
    Ok(())
}

#[tokio::test]
async fn shards_are_evaluated_on_the_coordinator_only() -> Result<()> {
    const WORLD_SIZE: usize = 3;

    let mut coords = group(WORLD_SIZE).await?;
    let mut loops: Vec<_> = (0..WORLD_SIZE)
        .map(|_| InferenceLoop::new(TestConfig::default(), Doubler, Cpu))
        .collect();
    let mut loaders = (0..WORLD_SIZE)
        .map(|rank| {
            let shard = ShardSpec::new(rank, WORLD_SIZE)?;
            Ok(InMemoryLoader::new(eval_batches(0..7)).shard(shard))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut evaluators: Vec<_> = (0..WORLD_SIZE)
        .map(|_| RecordingEvaluator::default())
        .collect();

    let results = join_all(
        coords
            .iter_mut()
            .zip(&mut loops)
            .zip(&mut loaders)
            .zip(&mut evaluators)
            .map(|(((coord, il), loader), evaluator)| {
                il.run(coord, "toy", loader, evaluator, "toy", None)
            }),
    )
    .await;

    let results: Vec<_> = results.into_iter().collect::<Result<_>>()?;
    assert_eq!(results, [Some(7), None, None]);

    assert_eq!(evaluators[0].calls, 1);
    assert_eq!(evaluators[0].seen, [0, 2, 4, 6, 8, 10, 12]);
    assert!(evaluators[1..].iter().all(|e| e.calls == 0));
    Ok(())
}

#[tokio::test]
async fn gaps_are_evaluated_without_filling() -> Result<()> {
    let mut il = InferenceLoop::new(TestConfig::default(), Doubler, Cpu);
    let mut loader = InMemoryLoader::new(eval_batches([0, 1, 3]));
    let mut evaluator = RecordingEvaluator::default();

    let metrics = il
        .run(&mut SingleProcess, "toy", &mut loader, &mut evaluator, "toy", None)
        .await?;

    assert_eq!(metrics, Some(3));
    assert_eq!(evaluator.seen, [0, 2, 6]);
    Ok(())
}

#[tokio::test]
async fn non_coordinators_still_join_every_collective() -> Result<()> {
    let mut il = InferenceLoop::new(TestConfig::default(), Doubler, Cpu);
    let mut loader = InMemoryLoader::new(eval_batches(0..4));
    let mut evaluator = RecordingEvaluator::default();
    let mut coord = CountingCoordinator::new(1, 2);

    let metrics = il
        .run(&mut coord, "toy", &mut loader, &mut evaluator, "toy", None)
        .await?;

    assert_eq!(metrics, None);
    assert_eq!(coord.barriers, 1);
    assert_eq!(coord.gathers, 1);
    assert_eq!(evaluator.calls, 0);
    Ok(())
}

#[tokio::test]
async fn predictions_are_saved_when_enabled() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = TestConfig {
        save_predictions: true,
        timed: false,
        ..Default::default()
    };

    let mut il = InferenceLoop::new(cfg, Doubler, Cpu);
    let mut loader = InMemoryLoader::new(eval_batches(0..3));
    let mut evaluator = RecordingEvaluator::default();

    il.run(
        &mut SingleProcess,
        "toy",
        &mut loader,
        &mut evaluator,
        "toy",
        Some(dir.path()),
    )
    .await?;

    let saved = std::fs::read_to_string(dir.path().join(PREDICTIONS_FILE))?;
    assert_eq!(saved, "[0,2,4]");
    Ok(())
}

#[tokio::test]
async fn augmented_path_combines_views() -> Result<()> {
    let path = ForwardPath::Augmented(
        Augmentation::new(|outs: Vec<u32>| outs.into_iter().max().unwrap_or_default())
            .view(|xs: &Vec<u32>| xs.iter().map(|x| x + 10).collect()),
    );

    let mut il = InferenceLoop::new(TestConfig::default(), Doubler, Cpu).with_forward_path(path);
    let mut loader = InMemoryLoader::new(eval_batches(0..2));
    let mut evaluator = RecordingEvaluator::default();

    il.run(&mut SingleProcess, "toy", &mut loader, &mut evaluator, "toy", None)
        .await?;

    assert_eq!(evaluator.seen, [20, 22]);
    Ok(())
}

#[tokio::test]
async fn output_count_must_match_the_samples() {
    let mut il = InferenceLoop::new(TestConfig::default(), Doubler, Cpu);
    let mut loader = InMemoryLoader::new(vec![Batch::unlabeled(vec![1], vec![0, 1])]);
    let mut evaluator = RecordingEvaluator::default();

    let res = il
        .run(&mut SingleProcess, "toy", &mut loader, &mut evaluator, "toy", None)
        .await;

    assert!(matches!(
        res,
        Err(EngineErr::LengthMismatch {
            got: 1,
            expected: 2,
            ..
        })
    ));
}

/// A device whose host to device copies take `copy_time`.
struct SlowLink {
    copy_time: Duration,
}

impl Device for SlowLink {
    fn name(&self) -> &str {
        "slow-link"
    }

    fn stage<B>(&self, batch: B) -> Result<B> {
        thread::sleep(self.copy_time);
        Ok(batch)
    }
}

#[test]
fn inference_time_counts_the_transfer() -> Result<()> {
    let copy_time = Duration::from_millis(10);
    let mut il = InferenceLoop::new(TestConfig::default(), Doubler, SlowLink { copy_time });
    let mut loader = InMemoryLoader::new(eval_batches(0..3));
    let mut timer = Timer::new();

    let results = il.compute_on_dataset(&mut loader, Some(&mut timer))?;

    assert_eq!(results.len(), 3);
    assert_eq!(timer.count(), 3);
    assert!(timer.total_time() >= 3 * copy_time);
    Ok(())
}
