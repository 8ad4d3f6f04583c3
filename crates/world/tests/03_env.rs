mod common;

use common::{
    env_with, frame, scratch_dir, snapshot, CountingPredictor, EchoPredictor, EndAfter,
    MisshapenPredictor, BASE,
};
use world::{
    ActionSchema, Agent, EnvOptions, EnvState, EpisodeRecorder, MemorySink, RecordOptions,
    SpawnDirectory, SpawnList, SpawnSource, WorldError, WorldModelEnv,
};

fn counting_env(history: usize, end_at: usize) -> WorldModelEnv {
    let schema = ActionSchema::racing();
    let agent = Agent::new(Box::new(CountingPredictor::new(history)))
        .with_reward_end(Box::new(EndAfter::new(end_at)));
    env_with(agent, vec![snapshot(&schema, history, false)], EpisodeRecorder::disabled())
}

#[test]
fn step_before_reset_is_rejected() {
    let mut env = counting_env(2, 10);
    let noop = env.schema().noop();
    let err = env.step(&noop).unwrap_err();
    assert!(matches!(err, WorldError::InvalidState { state: EnvState::Uninitialized, .. }));
}

#[test]
fn reset_returns_the_last_spawn_frame_and_fills_the_window() {
    let mut env = counting_env(3, 10);
    let first = env.reset(0).unwrap();
    assert_eq!(first, frame(BASE, 2));
    assert_eq!(env.state(), EnvState::Ready);
    assert_eq!(env.context().len(), 3);
    assert_eq!(env.steps_taken(), 0);
    assert_eq!(env.spawn_point(), Some(0));
}

#[test]
fn steps_push_generated_frames_into_the_window() {
    let mut env = counting_env(2, 10);
    env.reset(0).unwrap();
    let noop = env.schema().noop();
    for i in 0..4 {
        let outcome = env.step(&noop).unwrap();
        assert_eq!(outcome.index, i);
        assert_eq!(outcome.reward, (i + 1) as f32);
        assert!(!outcome.end);
        assert_eq!(env.context().last().unwrap().0, &outcome.observation);
    }
    assert_eq!(env.state(), EnvState::Stepping);
    let held: Vec<u8> = env.context().observations().map(|o| o.pixel(0, 0)[0]).collect();
    assert_eq!(held, vec![102, 103]);
}

#[test]
fn echo_model_passes_the_context_frame_through() {
    let schema = ActionSchema::racing();
    let agent = Agent::new(Box::new(EchoPredictor { history: 2 }));
    let mut env = env_with(agent, vec![snapshot(&schema, 2, false)], EpisodeRecorder::disabled());
    let shown = env.reset(0).unwrap();
    let outcome = env.step(&schema.noop()).unwrap();
    assert_eq!(outcome.observation, shown);
    assert_eq!(outcome.raw_observation, shown);
    assert_eq!(outcome.reward, 0.0);
    assert!(!outcome.end);
}

#[test]
fn termination_blocks_further_steps_until_reset() {
    let mut env = counting_env(2, 3);
    env.reset(0).unwrap();
    let noop = env.schema().noop();
    env.step(&noop).unwrap();
    env.step(&noop).unwrap();
    assert!(env.step(&noop).unwrap().end);
    assert_eq!(env.state(), EnvState::Terminated);

    for _ in 0..2 {
        let err = env.step(&noop).unwrap_err();
        assert!(matches!(err, WorldError::InvalidState { state: EnvState::Terminated, .. }));
    }

    env.reset(0).unwrap();
    assert_eq!(env.episode(), 2);
    // Model hidden state was reset along with the window.
    assert!(!env.step(&noop).unwrap().end);
}

#[test]
fn invalid_action_keeps_the_episode_alive() {
    let mut env = counting_env(2, 10);
    env.reset(0).unwrap();
    let mut bad = env.schema().noop();
    bad.buttons.push(true);
    assert!(matches!(env.step(&bad), Err(WorldError::InvalidAction(_))));
    let mut pointer = env.schema().noop();
    pointer.pointer = [1.0, 0.0];
    assert!(matches!(env.step(&pointer), Err(WorldError::InvalidAction(_))));
    assert_eq!(env.state(), EnvState::Ready);
    let noop = env.schema().noop();
    assert!(env.step(&noop).is_ok());
}

#[test]
fn inference_failure_closes_the_episode_and_discards_its_recording() {
    let schema = ActionSchema::racing();
    let sink = MemorySink::new();
    let recorder = EpisodeRecorder::new(Box::new(sink.clone()), RecordOptions::default(), true);
    let agent = Agent::new(Box::new(CountingPredictor::new(2).failing_on(2)));
    let mut env = env_with(agent, vec![snapshot(&schema, 2, false)], recorder);

    env.reset(0).unwrap();
    let noop = schema.noop();
    env.step(&noop).unwrap();
    env.step(&noop).unwrap();
    let err = env.step(&noop).unwrap_err();
    assert!(err.is_inference());
    assert_eq!(env.state(), EnvState::Terminated);
    assert!(env.context().is_empty());
    assert_eq!(env.recorder().buffered_steps(), 0);
    assert!(sink.is_empty());

    env.reset(0).unwrap();
    assert!(env.step(&noop).is_ok());
}

#[test]
fn malformed_model_output_is_an_inference_error() {
    let schema = ActionSchema::racing();
    let agent = Agent::new(Box::new(MisshapenPredictor));
    let mut env = env_with(agent, vec![snapshot(&schema, 1, false)], EpisodeRecorder::disabled());
    env.reset(0).unwrap();
    let err = env.step(&schema.noop()).unwrap_err();
    assert!(err.is_inference());
}

#[test]
fn short_spawn_snapshot_is_rejected_without_side_effects() {
    let schema = ActionSchema::racing();
    let agent = Agent::new(Box::new(CountingPredictor::new(4)));
    let mut env = env_with(
        agent,
        vec![snapshot(&schema, 4, false), snapshot(&schema, 2, false)],
        EpisodeRecorder::disabled(),
    );
    env.reset(0).unwrap();
    let err = env.reset(1).unwrap_err();
    assert!(matches!(err, WorldError::Spawn { index: 1, .. }));
    assert_eq!(env.spawn_point(), Some(0));
    assert_eq!(env.state(), EnvState::Ready);
    assert!(matches!(env.reset(7), Err(WorldError::Spawn { index: 7, .. })));
}

#[test]
fn no_spawn_points_is_a_configuration_error() {
    let agent = Agent::new(Box::new(CountingPredictor::new(1)));
    let result = WorldModelEnv::new(
        agent,
        ActionSchema::racing(),
        Box::new(SpawnList::new(Vec::new())),
        EpisodeRecorder::disabled(),
        EnvOptions::default(),
    );
    assert!(matches!(result, Err(WorldError::Configuration(_))));
}

#[test]
fn finished_episode_is_recorded_automatically() {
    let schema = ActionSchema::racing();
    let sink = MemorySink::new();
    let recorder = EpisodeRecorder::new(Box::new(sink.clone()), RecordOptions::default(), true);
    let agent = Agent::new(Box::new(CountingPredictor::new(2)))
        .with_reward_end(Box::new(EndAfter::new(5)));
    let mut env = env_with(agent, vec![snapshot(&schema, 2, false)], recorder);

    env.reset(0).unwrap();
    let forward = schema.action_from_held(["up"]);
    for _ in 0..5 {
        env.step(&forward).unwrap();
    }
    let episodes = sink.episodes();
    assert_eq!(episodes.len(), 1);
    let steps = &episodes[0].steps;
    assert_eq!(steps.len(), 5);
    assert!(steps.last().unwrap().end);
    assert!(steps.iter().all(|s| s.action == forward));
}

#[test]
fn recording_toggled_on_before_the_first_step_records_this_episode() {
    let schema = ActionSchema::racing();
    let sink = MemorySink::new();
    let recorder = EpisodeRecorder::new(Box::new(sink.clone()), RecordOptions::default(), false);
    let agent = Agent::new(Box::new(CountingPredictor::new(1)));
    let mut env = env_with(agent, vec![snapshot(&schema, 1, false)], recorder);

    env.reset(0).unwrap();
    env.set_recording(true).unwrap();
    let noop = schema.noop();
    env.step(&noop).unwrap();
    env.step(&noop).unwrap();
    assert_eq!(env.recorder().buffered_steps(), 2);
    let flushed = env.set_recording(false).unwrap();
    assert_eq!(flushed.map(|p| p.steps), Some(2));
}

#[test]
fn captured_trajectories_are_returned_when_requested() {
    let schema = ActionSchema::racing();
    let agent = Agent::new(Box::new(CountingPredictor::new(1)));
    let mut env = WorldModelEnv::new(
        agent,
        schema.clone(),
        Box::new(SpawnList::new(vec![snapshot(&schema, 1, false)])),
        EpisodeRecorder::disabled(),
        EnvOptions { capture_trajectory: true },
    )
    .unwrap();
    env.reset(0).unwrap();
    let outcome = env.step(&schema.noop()).unwrap();
    let trajectory = outcome.trajectory.unwrap();
    assert_eq!(trajectory.states().last(), Some(&outcome.raw_observation));
}

#[test]
fn spawn_directory_round_trips_snapshots() {
    let schema = ActionSchema::racing();
    let root = scratch_dir("spawns");
    let mut snap = snapshot(&schema, 3, true);
    snap.actions[1] = schema.action_from_held(["left"]);
    snap.write(&root.join("b_second")).unwrap();
    snapshot(&schema, 2, false).write(&root.join("a_first")).unwrap();
    std::fs::create_dir_all(root.join("not_a_spawn")).unwrap();

    let spawns = SpawnDirectory::open(&root).unwrap();
    assert_eq!(spawns.len(), 2);
    assert_eq!(spawns.describe(0), "a_first");
    let loaded = spawns.load(1).unwrap();
    assert_eq!(loaded.observations, snap.observations);
    assert_eq!(loaded.actions, snap.actions);
    assert_eq!(loaded.hires_observations, snap.hires_observations);
    assert!(spawns.load(2).is_err());

    let empty = scratch_dir("no-spawns");
    assert!(SpawnDirectory::open(&empty).is_err());
    let _ = std::fs::remove_dir_all(&root);
    let _ = std::fs::remove_dir_all(&empty);
}

#[test]
fn stepping_with_recording_off_never_buffers() {
    let schema = ActionSchema::racing();
    let sink = MemorySink::new();
    let recorder = EpisodeRecorder::new(Box::new(sink.clone()), RecordOptions::default(), false);
    let agent = Agent::new(Box::new(CountingPredictor::new(2)));
    let mut env = env_with(agent, vec![snapshot(&schema, 2, false)], recorder);

    env.reset(0).unwrap();
    let forward = schema.action_from_held(["up"]);
    for _ in 0..10_000 {
        assert!(!env.step(&forward).unwrap().end);
        assert_eq!(env.recorder().buffered_steps(), 0);
    }
    assert_eq!(env.steps_taken(), 10_000);
    assert_eq!(env.flush_recording().unwrap(), None);
    assert!(sink.is_empty());
}
