use std::sync::Arc;
use std::time::Duration;

use sp_core::{FlowAction, PlayStatus, PlaybackState, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::ReturnAtRoot;
use crate::host::{MemoryScriptLoader, MemoryStateStore, RecordingTextRenderer, StatePersistence};
use crate::script::{Script, ScriptLine};
use crate::test_support::{self, call, goto, jump, narration, ret, set, sleep, stop};

struct Harness {
    player: Arc<ScriptPlayer>,
    renderer: Arc<RecordingTextRenderer>,
    store: Arc<MemoryStateStore>,
}

fn harness(scripts: Vec<Arc<Script>>, config: PlayerConfig) -> Harness {
    let renderer = Arc::new(RecordingTextRenderer::new());
    let store = Arc::new(MemoryStateStore::new());
    let mut options = PlayerOptions::new(Arc::new(MemoryScriptLoader::with_scripts(scripts)));
    options.config = config;
    options.renderer = renderer.clone();
    options.persistence = Some(store.clone());
    Harness {
        player: Arc::new(ScriptPlayer::new(options).expect("player should build")),
        renderer,
        store,
    }
}

fn default_harness(scripts: Vec<Arc<Script>>) -> Harness {
    harness(scripts, PlayerConfig::default())
}

fn drain(receiver: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn flow_error_codes(events: &[PlayerEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::FlowError { error, .. } => Some(error.code()),
            _ => None,
        })
        .collect()
}

async fn wait_for_state(player: &ScriptPlayer, state: PlaybackState) {
    let mut receiver = player.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        receiver.wait_for(|current| *current == state),
    )
    .await
    .expect("state should be reached in time")
    .expect("state sender should stay alive");
}

fn spawn_play(
    player: &Arc<ScriptPlayer>,
    script: Arc<Script>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<sp_core::PlayResult, PlayerError>> {
    let player = Arc::clone(player);
    tokio::spawn(async move { player.play(script, cancel).await })
}

#[tokio::test]
async fn plays_text_to_completion() {
    let main = test_support::script(
        "main",
        vec![
            ScriptLine::text("// intro"),
            ScriptLine::text("It is raining."),
            ScriptLine::dialogue("Ada", "Hello, ${name}."),
            ScriptLine::text(""),
        ],
    );
    let harness = default_harness(vec![main.clone()]);
    harness
        .player
        .set_variable("name", Value::from("Grace"))
        .await
        .expect("name should be stored");

    let result = harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");

    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(result.lines_executed, 4);
    assert_eq!(
        harness.renderer.texts(),
        vec!["It is raining.".to_string(), "Hello, Grace.".to_string()]
    );
    assert_eq!(harness.renderer.rendered()[1].speaker.as_deref(), Some("Ada"));
    assert_eq!(harness.player.state(), PlaybackState::Completed);
    assert_eq!(harness.player.current_line_index(), 4);
}

#[tokio::test]
async fn jump_to_label_resumes_after_the_label_line() {
    let main = test_support::script(
        "main",
        vec![ScriptLine::text("#start"), ScriptLine::text("line A"), jump("start")],
    );
    let harness = default_harness(vec![main.clone()]);
    harness.player.load(main).await.expect("load should pass");

    for _ in 0..3 {
        assert!(harness.player.step_forward().await.expect("step should pass"));
    }

    assert_eq!(harness.player.current_line_index(), 1);
    assert_eq!(harness.renderer.texts(), vec!["line A".to_string()]);
}

#[tokio::test]
async fn call_and_implicit_return_restore_caller_frame() {
    let mut main_lines = vec![set("x", 1i64)];
    main_lines.extend(narration(4));
    main_lines.push(call("sub"));
    main_lines.push(ScriptLine::text("after ${x}"));
    let main = test_support::script("main", main_lines);
    let sub = test_support::script("sub", vec![set("x", 2i64), ScriptLine::text("in sub ${x}")]);
    let harness = default_harness(vec![main.clone(), sub]);
    harness.player.load(main).await.expect("load should pass");

    for _ in 0..6 {
        harness.player.step_forward().await.expect("step should pass");
    }
    assert_eq!(harness.player.script_name().await.as_deref(), Some("sub"));
    assert_eq!(harness.player.call_depth().await, 1);
    assert_eq!(harness.player.current_line_index(), 0);
    assert_eq!(harness.player.variable("x").await, Some(Value::Number(1.0)));

    harness.player.step_forward().await.expect("sub line 0");
    harness.player.step_forward().await.expect("sub line 1");
    assert_eq!(harness.player.variable("x").await, Some(Value::Number(2.0)));

    assert!(harness.player.step_forward().await.expect("implicit return"));
    assert_eq!(harness.player.script_name().await.as_deref(), Some("main"));
    assert_eq!(harness.player.current_line_index(), 6);
    assert_eq!(harness.player.call_depth().await, 0);
    assert_eq!(harness.player.variable("x").await, Some(Value::Number(1.0)));

    harness.player.step_forward().await.expect("after line");
    assert_eq!(
        harness.renderer.texts().last().map(String::as_str),
        Some("after 1")
    );
    assert!(!harness.player.step_forward().await.expect("nothing left"));
}

#[tokio::test]
async fn invalid_jump_target_keeps_position() {
    let mut lines = vec![goto(999)];
    lines.extend(narration(9));
    let main = test_support::script("main", lines);
    let harness = default_harness(vec![main.clone()]);
    harness.player.load(main.clone()).await.expect("load");

    {
        let mut context = harness.player.context.lock().await;
        let error = harness
            .player
            .apply_flow(&mut context, &FlowAction::JumpToLine { line: 999 })
            .await
            .expect_err("jump past the end should fail");
        assert_eq!(error.code(), "FLOW_INVALID_JUMP_TARGET");
        assert_eq!(context.current_line_index(), 0);
    }

    let mut receiver = harness.player.subscribe();
    let result = harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");
    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(harness.renderer.texts().len(), 9);
    assert_eq!(
        flow_error_codes(&drain(&mut receiver)),
        vec!["FLOW_INVALID_JUMP_TARGET"]
    );
}

#[tokio::test]
async fn missing_label_is_reported_and_skipped() {
    let main = test_support::script("main", vec![jump("nowhere"), ScriptLine::text("after")]);
    let harness = default_harness(vec![main.clone()]);
    let mut receiver = harness.player.subscribe();

    let result = harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");

    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(harness.renderer.texts(), vec!["after".to_string()]);
    assert_eq!(flow_error_codes(&drain(&mut receiver)), vec!["FLOW_MISSING_LABEL"]);
}

#[tokio::test]
async fn recursive_calls_stop_at_max_depth() {
    let recurse = test_support::script("loop", vec![call("loop")]);
    let harness = harness(
        vec![recurse.clone()],
        PlayerConfig {
            max_call_stack_depth: 2,
            ..PlayerConfig::default()
        },
    );
    let mut receiver = harness.player.subscribe();

    let result = harness
        .player
        .play(recurse, CancellationToken::new())
        .await
        .expect("play should start");

    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(harness.player.call_depth().await, 0);
    assert_eq!(
        flow_error_codes(&drain(&mut receiver)),
        vec!["CONTEXT_STACK_OVERFLOW"]
    );
}

#[tokio::test]
async fn calling_unknown_script_does_not_move() {
    let main = test_support::script("main", vec![call("ghost"), ScriptLine::text("still main")]);
    let harness = default_harness(vec![main.clone()]);
    let mut receiver = harness.player.subscribe();

    let result = harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");

    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(harness.renderer.texts(), vec!["still main".to_string()]);
    assert_eq!(
        flow_error_codes(&drain(&mut receiver)),
        vec!["LOADER_SCRIPT_NOT_FOUND"]
    );
}

#[tokio::test]
async fn return_at_root_is_configurable() {
    let main = test_support::script("main", vec![ret(), ScriptLine::text("unreachable")]);

    let lenient = default_harness(vec![main.clone()]);
    let result = lenient
        .player
        .play(main.clone(), CancellationToken::new())
        .await
        .expect("play should start");
    assert_eq!(result.status, PlayStatus::Success);
    assert!(lenient.renderer.texts().is_empty());

    let strict = harness(
        vec![main.clone()],
        PlayerConfig {
            return_at_root: ReturnAtRoot::Error,
            ..PlayerConfig::default()
        },
    );
    let result = strict
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");
    assert_eq!(result.status, PlayStatus::Failure);
    assert_eq!(result.error.map(|error| error.code()), Some("VALIDATION"));
    assert_eq!(strict.player.state(), PlaybackState::Failed);
}

#[tokio::test]
async fn stop_action_ends_with_stopped() {
    let main = test_support::script(
        "main",
        vec![ScriptLine::text("a"), stop(), ScriptLine::text("b")],
    );
    let harness = default_harness(vec![main.clone()]);

    let result = harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");

    assert_eq!(result.status, PlayStatus::Stopped);
    assert_eq!(harness.renderer.texts(), vec!["a".to_string()]);
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert_eq!(harness.player.current_line_index(), 2);
}

#[tokio::test]
async fn preprocessing_errors_fail_the_play_when_strict() {
    let main = test_support::script(
        "main",
        vec![ScriptLine::text("#twice"), ScriptLine::text("#twice")],
    );
    let harness = harness(
        vec![main.clone()],
        PlayerConfig {
            continue_on_error: false,
            ..PlayerConfig::default()
        },
    );

    let result = harness
        .player
        .play(main.clone(), CancellationToken::new())
        .await
        .expect("play should start");
    assert_eq!(result.status, PlayStatus::Failure);
    assert_eq!(
        result.error.map(|error| error.code()),
        Some("PREPROCESS_FAILED")
    );
    assert_eq!(harness.player.state(), PlaybackState::Failed);

    let lenient = default_harness(vec![main.clone()]);
    let result = lenient
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");
    assert_eq!(result.status, PlayStatus::Success);
}

#[tokio::test]
async fn call_level_validation_returns_err() {
    let harness = default_harness(Vec::new());
    let error = harness
        .player
        .play_named("missing", CancellationToken::new())
        .await
        .expect_err("unknown script should fail");
    assert_eq!(error.code(), "LOADER_SCRIPT_NOT_FOUND");

    let error = harness
        .player
        .play_from_line(0, CancellationToken::new())
        .await
        .expect_err("nothing loaded");
    assert_eq!(error.code(), "VALIDATION");

    let main = test_support::script("main", narration(3));
    harness.player.load(main).await.expect("load");
    let error = harness
        .player
        .play_from_line(4, CancellationToken::new())
        .await
        .expect_err("past the end");
    assert_eq!(error.code(), "VALIDATION");
    let error = harness
        .player
        .skip_to_line(3)
        .await
        .expect_err("skip past the last line");
    assert_eq!(error.code(), "FLOW_INVALID_JUMP_TARGET");
}

#[tokio::test]
async fn pause_then_resume_restores_playing_at_same_line() {
    let main = test_support::script("main", narration(50));
    let harness = harness(
        vec![main.clone()],
        PlayerConfig {
            line_delay_ms: 20,
            ..PlayerConfig::default()
        },
    );
    let task = spawn_play(&harness.player, main, CancellationToken::new());
    wait_for_state(&harness.player, PlaybackState::Playing).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.player.pause());
    tokio::time::sleep(Duration::from_millis(60)).await;
    let paused_at = harness.player.current_line_index();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(harness.player.current_line_index(), paused_at);
    assert_eq!(harness.player.state(), PlaybackState::Paused);

    assert!(harness.player.resume());
    assert_eq!(harness.player.state(), PlaybackState::Playing);
    assert_eq!(harness.player.current_line_index(), paused_at);
    assert!(!harness.player.resume());

    assert!(harness.player.stop());
    let result = task.await.expect("join").expect("play should start");
    assert_eq!(result.status, PlayStatus::Stopped);
}

#[tokio::test]
async fn breakpoints_pause_before_the_line() {
    let main = test_support::script("main", narration(5));
    let harness = default_harness(vec![main.clone()]);
    harness.player.add_breakpoint(2).await;
    assert!(harness.player.has_breakpoint(2).await);
    let mut receiver = harness.player.subscribe();

    let task = spawn_play(&harness.player, main, CancellationToken::new());
    wait_for_state(&harness.player, PlaybackState::Paused).await;
    assert_eq!(harness.player.current_line_index(), 2);
    assert_eq!(harness.renderer.texts().len(), 2);

    harness.player.resume();
    let result = task.await.expect("join").expect("play should start");
    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(harness.renderer.texts().len(), 5);
    assert!(drain(&mut receiver).contains(&PlayerEvent::BreakpointHit { line: 2 }));
}

#[tokio::test]
async fn cancelling_while_paused_returns_cancelled() {
    let main = test_support::script("main", narration(3));
    let harness = default_harness(vec![main.clone()]);
    harness.player.add_breakpoint(1).await;
    let cancel = CancellationToken::new();

    let task = spawn_play(&harness.player, main, cancel.clone());
    wait_for_state(&harness.player, PlaybackState::Paused).await;
    cancel.cancel();

    let result = task.await.expect("join").expect("play should start");
    assert_eq!(result.status, PlayStatus::Cancelled);
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
}

#[tokio::test]
async fn concurrent_play_is_rejected_by_default() {
    let long = test_support::script("long", vec![sleep(Duration::from_secs(30))]);
    let short = test_support::script("short", narration(2));
    let harness = default_harness(vec![long.clone(), short.clone()]);

    let first = spawn_play(&harness.player, long, CancellationToken::new());
    wait_for_state(&harness.player, PlaybackState::Playing).await;

    let error = harness
        .player
        .play(short, CancellationToken::new())
        .await
        .expect_err("second play should be rejected");
    assert_eq!(error.code(), "PLAYER_BUSY");
    assert_eq!(harness.player.current_line_index(), 0);
    assert!(harness.player.is_playing());
    let error = harness
        .player
        .step_forward()
        .await
        .expect_err("stepping while playing should be rejected");
    assert_eq!(error.code(), "PLAYER_BUSY");

    harness.player.stop();
    let result = first.await.expect("join").expect("play should start");
    assert_eq!(result.status, PlayStatus::Stopped);
}

#[tokio::test]
async fn concurrent_play_can_preempt() {
    let long = test_support::script("long", vec![sleep(Duration::from_secs(30))]);
    let short = test_support::script("short", narration(2));
    let harness = harness(
        vec![long.clone(), short.clone()],
        PlayerConfig {
            concurrent_play: ConcurrentPlayPolicy::Preempt,
            ..PlayerConfig::default()
        },
    );

    let first = spawn_play(&harness.player, long, CancellationToken::new());
    wait_for_state(&harness.player, PlaybackState::Playing).await;

    let second = harness
        .player
        .play(short, CancellationToken::new())
        .await
        .expect("preempting play should start");
    let first = first.await.expect("join").expect("play should start");

    assert_eq!(first.status, PlayStatus::Stopped);
    assert_eq!(second.status, PlayStatus::Success);
    assert_eq!(harness.player.script_name().await.as_deref(), Some("short"));
    assert_eq!(harness.player.current_line_index(), 2);
    assert_eq!(harness.renderer.texts().len(), 2);
}

#[tokio::test]
async fn save_and_load_resume_from_the_same_point() {
    let main = test_support::script(
        "main",
        vec![
            set("gold", 5i64),
            ScriptLine::text("one"),
            ScriptLine::text("gold ${gold}"),
        ],
    );
    let harness = default_harness(vec![main.clone()]);
    harness.player.load(main).await.expect("load");
    harness.player.step_forward().await.expect("step");
    harness.player.step_forward().await.expect("step");
    harness.player.add_breakpoint(7).await;
    harness.player.fast_forward(2.0);

    let key = harness
        .player
        .save_execution_state(Some("slot".to_string()))
        .await
        .expect("save should pass");
    assert_eq!(key, "slot");

    harness.player.reset().await.expect("reset");
    assert!(harness.player.script_name().await.is_none());
    assert_eq!(harness.player.playback_speed(), 1.0);

    let saved = harness
        .player
        .load_execution_state("slot")
        .await
        .expect("load should pass");
    assert_eq!(saved.snapshot.current_line_index, 2);
    assert_eq!(harness.player.current_line_index(), 2);
    assert_eq!(harness.player.variable("gold").await, Some(Value::Number(5.0)));
    assert!(harness.player.has_breakpoint(7).await);
    assert_eq!(harness.player.playback_speed(), 2.0);

    let result = harness
        .player
        .play_from_line(harness.player.current_line_index(), CancellationToken::new())
        .await
        .expect("resume should start");
    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(
        harness.renderer.texts(),
        vec!["one".to_string(), "gold 5".to_string()]
    );
}

#[tokio::test]
async fn save_without_key_generates_one_and_missing_key_fails() {
    let harness = default_harness(Vec::new());
    let key = harness
        .player
        .save_execution_state(None)
        .await
        .expect("save should pass");
    assert_eq!(key.len(), 36);
    assert!(harness.store.get(&key).await.expect("get").is_some());

    let error = harness
        .player
        .load_execution_state("nope")
        .await
        .expect_err("missing key should fail");
    assert_eq!(error.code(), "PERSISTENCE");
}

#[tokio::test]
async fn auto_save_writes_under_configured_key() {
    let main = test_support::script("main", narration(4));
    let harness = harness(
        vec![main.clone()],
        PlayerConfig {
            line_delay_ms: 5,
            auto_save_interval_ms: Some(1),
            ..PlayerConfig::default()
        },
    );

    harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("play should start");

    let saved: Option<SavedExecutionState> =
        crate::host::store_get_json(harness.store.as_ref(), "autosave")
            .await
            .expect("get should pass");
    let saved = saved.expect("auto-save should exist");
    assert_eq!(saved.snapshot.script_name.as_deref(), Some("main"));
}

#[tokio::test]
async fn host_variable_and_breakpoint_operations() {
    let harness = default_harness(Vec::new());
    let mut receiver = harness.player.subscribe();

    harness
        .player
        .set_variable("a", Value::from(true))
        .await
        .expect("a should be stored");
    harness
        .player
        .set_variable("b", Value::from(2i64))
        .await
        .expect("b should be stored");
    assert!(harness.player.has_variable("a").await);
    assert_eq!(
        harness.player.remove_variable("a").await,
        Some(Value::Bool(true))
    );
    assert_eq!(harness.player.remove_variable("a").await, None);
    harness.player.clear_variables().await;
    assert!(harness.player.variables().await.is_empty());

    let events = drain(&mut receiver);
    assert_eq!(
        events.last(),
        Some(&PlayerEvent::VariableChanged {
            name: "b".to_string(),
            value: None
        })
    );

    assert!(harness.player.add_breakpoint(3).await);
    assert!(!harness.player.add_breakpoint(3).await);
    assert!(harness.player.remove_breakpoint(3).await);
    harness.player.add_breakpoint(4).await;
    harness.player.clear_breakpoints().await;
    assert!(harness.player.breakpoints().await.is_empty());
}

#[tokio::test]
async fn step_backward_and_skip_to_label() {
    let main = test_support::script(
        "main",
        vec![
            ScriptLine::text("a"),
            ScriptLine::text("#middle"),
            ScriptLine::text("b"),
        ],
    );
    let harness = default_harness(vec![main.clone()]);
    harness.player.load(main).await.expect("load");

    assert_eq!(harness.player.step_backward().await.expect("clamped"), 0);
    assert_eq!(
        harness.player.skip_to_label("middle").await.expect("label"),
        2
    );
    assert_eq!(harness.player.step_backward().await.expect("back"), 1);
    let error = harness
        .player
        .skip_to_label("nowhere")
        .await
        .expect_err("unknown label");
    assert_eq!(error.code(), "FLOW_MISSING_LABEL");
}

#[tokio::test]
async fn replay_keeps_variables_but_resets_position() {
    let main = test_support::script("main", vec![set("visits", 1i64), ScriptLine::text("hi")]);
    let harness = default_harness(vec![main.clone()]);

    harness
        .player
        .play(main.clone(), CancellationToken::new())
        .await
        .expect("first play");
    harness
        .player
        .set_variable("kept", Value::from("yes"))
        .await
        .expect("kept should be stored");
    let result = harness
        .player
        .play(main, CancellationToken::new())
        .await
        .expect("second play");

    assert_eq!(result.status, PlayStatus::Success);
    assert_eq!(result.lines_executed, 2);
    assert_eq!(result.commands_executed, 1);
    assert_eq!(harness.player.variable("kept").await, Some(Value::from("yes")));
    assert_eq!(harness.renderer.texts().len(), 2);
}

#[tokio::test]
async fn non_finite_variables_are_refused_so_saves_stay_loadable() {
    let main = test_support::script("main", narration(2));
    let harness = default_harness(vec![main.clone()]);
    harness.player.load(main).await.expect("load");

    let error = harness
        .player
        .set_variable("ratio", Value::Number(f64::NAN))
        .await
        .expect_err("nan should be refused");
    assert_eq!(error.code(), "VALIDATION");
    harness
        .player
        .set_variable("ratio", Value::Number(0.25))
        .await
        .expect("finite ratio should be stored");

    harness
        .player
        .save_execution_state(Some("s".to_string()))
        .await
        .expect("save should pass");
    harness.player.reset().await.expect("reset");
    harness
        .player
        .load_execution_state("s")
        .await
        .expect("load should pass");
    assert_eq!(
        harness.player.variable("ratio").await,
        Some(Value::Number(0.25))
    );
}

#[tokio::test]
async fn slow_speeds_inside_the_range_are_kept() {
    let harness = default_harness(Vec::new());
    assert_eq!(harness.player.fast_forward(0.05), 0.05);
    assert_eq!(harness.player.fast_forward(0.0), 0.05);
    assert_eq!(harness.player.playback_speed(), 0.05);
    assert_eq!(harness.player.fast_forward(100.0), 8.0);
}
