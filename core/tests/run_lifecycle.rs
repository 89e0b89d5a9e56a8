//! End-to-end behaviour of a Run against a scripted engine.
mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{child_progress, finish_streamed, progress, test_config, ScriptedEngine, Step};
use pretty_assertions::assert_eq;
use toolrun_core::api::{
    AuthDecision, CallFrame, Client, ClientError, CorrelationError, EngineFrame, EventType,
    FrameKind, PromptAnswer, RunError, RunEvent, RunOptions, RunState, Tool,
};

const PRESIDENT: &str = "who was the president of the united states in 1928?";

async fn client_for(engine: Arc<ScriptedEngine>) -> Client {
    Client::new(engine, test_config()).await.unwrap()
}

#[tokio::test]
async fn finishes_with_streamed_root_output() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            progress("root", "Calvin"),
            child_progress("lookup", "root", "search results"),
            progress("root", "Calvin Coolidge was president in 1928."),
            finish_streamed(),
        ]
    });
    let client = client_for(engine.clone()).await;

    let run = client
        .evaluate(Tool::new(PRESIDENT), RunOptions::new().disable_cache(true))
        .unwrap();
    let text = run.text().await.unwrap();

    assert!(text.contains("Calvin Coolidge"), "got: {text}");
    assert_eq!(run.err(), "");
    assert_eq!(run.state(), RunState::Finished);
    assert_eq!(run.calls().len(), 2);

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].run_id, run.id());
    assert!(requests[0].options.disable_cache);
}

#[tokio::test]
async fn terminal_output_overrides_streamed_text() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            progress("root", "thinking"),
            Step::Finish("final answer".into()),
        ]
    });
    let client = client_for(engine).await;
    let run = client.run("./hello.gpt", RunOptions::new()).unwrap();
    assert_eq!(run.text().await.unwrap(), "final answer");
}

#[tokio::test]
async fn engine_failure_keeps_partial_output() {
    let engine = ScriptedEngine::new(|_| {
        vec![progress("root", "half done"), Step::Fail("tool exploded".into())]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();

    assert_eq!(run.text().await.unwrap(), "half done");
    assert_eq!(run.state(), RunState::Error);
    assert_eq!(run.err(), "tool exploded");
}

#[tokio::test]
async fn stream_end_without_result_is_an_error() {
    let engine = ScriptedEngine::new(|_| vec![progress("root", "partial")]);
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();

    assert_eq!(run.text().await.unwrap(), "partial");
    assert_eq!(run.state(), RunState::Error);
    assert!(!run.err().is_empty());
}

#[tokio::test]
async fn rejected_submission_ends_in_error() {
    let engine = ScriptedEngine::new(|_| vec![finish_streamed()]);
    toolrun_core::api::Engine::close(engine.as_ref()).await.unwrap();
    let client = client_for(engine).await;

    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    assert_eq!(run.text().await.unwrap(), "");
    assert_eq!(run.state(), RunState::Error);
    assert!(run.err().contains("closed"), "got: {}", run.err());
}

#[tokio::test]
async fn confirm_is_raised_before_its_result() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            progress("root", "about to list files"),
            Step::Confirm {
                call: "exec-1",
                input: "ls -la /tmp".into(),
                accepted_output: "total 0".into(),
            },
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client
        .evaluate(Tool::new("list /tmp"), RunOptions::new().confirm(true))
        .unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let s = seen.clone();
    let c = client.clone();
    run.on(EventType::CallConfirm, move |ev| {
        if let RunEvent::CallConfirm(call) = ev {
            s.lock()
                .unwrap()
                .push(format!("confirm:{}", call.input.clone().unwrap_or_default()));
            let c = c.clone();
            let id = call.id.clone();
            tokio::spawn(async move { c.confirm(AuthDecision::accept(id)).await });
        }
    });
    let s = seen.clone();
    run.on(EventType::CallProgress, move |ev| {
        if let RunEvent::CallProgress(call) = ev {
            s.lock().unwrap().push(call.content());
        }
    });

    assert_eq!(run.text().await.unwrap(), "total 0");
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["about to list files", "confirm:ls -la /tmp", "total 0"]
    );
}

#[tokio::test]
async fn denied_confirm_reports_authorization_error() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            Step::Confirm {
                call: "exec-1",
                input: "rm -rf /".into(),
                accepted_output: "gone".into(),
            },
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client
        .evaluate(Tool::new("cleanup"), RunOptions::new().confirm(true))
        .unwrap();
    let mut events = run.subscribe();

    let call = match events.recv().await.unwrap() {
        RunEvent::CallConfirm(call) => call,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(call.input.as_deref(), Some("rm -rf /"));
    client
        .confirm(AuthDecision::deny(&call.id, "not on my machine"))
        .await
        .unwrap();

    let text = run.text().await.unwrap();
    assert!(text.contains("authorization error"), "got: {text}");
    assert!(text.contains("not on my machine"));
}

#[tokio::test]
async fn each_confirmation_accepts_one_decision() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            Step::Confirm {
                call: "exec-1",
                input: "date".into(),
                accepted_output: "Tue".into(),
            },
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    let mut events = run.subscribe();
    let RunEvent::CallConfirm(call) = events.recv().await.unwrap() else {
        panic!("expected a confirmation");
    };

    // Wrong kind leaves the request pending.
    let err = client
        .prompt_response(PromptAnswer::new(&call.id, [("a", "b")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Correlation(CorrelationError::KindMismatch { .. })
    ));

    client.confirm(AuthDecision::accept(&call.id)).await.unwrap();
    let err = client
        .confirm(AuthDecision::accept(&call.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Correlation(CorrelationError::Unknown { .. })
    ));

    assert_eq!(run.text().await.unwrap(), "Tue");
}

#[tokio::test]
async fn decisions_for_ended_runs_are_rejected() {
    let engine = ScriptedEngine::new(|_| {
        vec![Step::Confirm {
            call: "exec-1",
            input: "date".into(),
            accepted_output: "Tue".into(),
        }]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    let mut events = run.subscribe();
    let RunEvent::CallConfirm(call) = events.recv().await.unwrap() else {
        panic!("expected a confirmation");
    };

    run.close();
    assert_eq!(run.text().await, Err(RunError::Aborted));

    let err = client
        .confirm(AuthDecision::accept(&call.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Correlation(CorrelationError::Unknown { .. })
    ));
}

#[tokio::test]
async fn closing_a_run_withdraws_its_pending_confirmation() {
    let engine = ScriptedEngine::stubborn(|_| {
        vec![
            Step::Confirm {
                call: "exec-1",
                input: "rm -rf /".into(),
                accepted_output: "gone".into(),
            },
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client
        .evaluate(Tool::new("cleanup"), RunOptions::new().confirm(true))
        .unwrap();
    let mut events = run.subscribe();
    let RunEvent::CallConfirm(call) = events.recv().await.unwrap() else {
        panic!("expected a confirmation");
    };

    // The engine holds the stream open; the approval must not get through
    // while the run waits out its grace period.
    run.close();
    let err = client
        .confirm(AuthDecision::accept(&call.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Correlation(CorrelationError::Unknown { .. })
    ));

    assert_eq!(run.text().await, Err(RunError::Aborted));
    assert!(!run.calls().values().any(|c| c.content() == "gone"));
}

#[tokio::test]
async fn client_close_withdraws_pending_prompts() {
    let engine = ScriptedEngine::stubborn(|_| {
        vec![Step::Prompt {
            id: "p-1",
            field: "password".into(),
        }]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("login"), RunOptions::new()).unwrap();
    let mut events = run.subscribe();
    let RunEvent::Prompt(prompt) = events.recv().await.unwrap() else {
        panic!("expected a prompt");
    };

    client.close().await;
    assert_eq!(run.state(), RunState::Aborted);
    let err = client
        .prompt_response(PromptAnswer::new(&prompt.id, [("password", "hunter2")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Correlation(CorrelationError::Unknown { .. })
    ));
}

#[tokio::test]
async fn prompt_answer_reaches_the_output() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            Step::Prompt {
                id: "p-1",
                field: "first name".into(),
            },
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client
        .evaluate(Tool::new("greet me"), RunOptions::new().prompt(true))
        .unwrap();
    let mut events = run.subscribe();

    let prompt = match events.recv().await.unwrap() {
        RunEvent::Prompt(p) => p,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(prompt.fields, vec!["first name".to_string()]);
    client
        .prompt_response(PromptAnswer::new(&prompt.id, [("first name", "Clicky")]))
        .await
        .unwrap();

    let text = run.text().await.unwrap();
    assert!(text.contains("Clicky"), "got: {text}");
}

#[tokio::test]
async fn close_aborts_the_run() {
    let engine = ScriptedEngine::new(|_| vec![progress("root", "working"), Step::Hang]);
    let client = client_for(engine.clone()).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    let mut events = run.subscribe();

    assert!(matches!(
        events.recv().await.unwrap(),
        RunEvent::CallProgress(_)
    ));
    run.close();
    run.close();

    assert_eq!(run.text().await, Err(RunError::Aborted));
    assert_eq!(run.state(), RunState::Aborted);
    assert_eq!(run.err(), "");
    run.close();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.cancel_calls(), vec![run.id().to_string()]);
}

#[tokio::test]
async fn close_before_submission_aborts() {
    let engine = ScriptedEngine::new(|_| vec![finish_streamed()]);
    let client = client_for(engine.clone()).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    run.close();

    assert_eq!(run.text().await, Err(RunError::Aborted));
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn unresponsive_engine_is_abandoned_after_grace() {
    let engine = ScriptedEngine::stubborn(|_| {
        vec![
            progress("root", "working"),
            Step::Sleep(50),
            Step::Finish("too late".into()),
            Step::Hang,
        ]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    let mut events = run.subscribe();
    events.recv().await.unwrap();
    run.close();

    let res = tokio::time::timeout(Duration::from_secs(2), run.text())
        .await
        .expect("run should give up on the engine");
    assert_eq!(res, Err(RunError::Aborted));
    assert_eq!(run.state(), RunState::Aborted);
}

#[tokio::test]
async fn foreign_and_unknown_frames_are_dropped() {
    let engine = ScriptedEngine::new(|req| {
        vec![
            Step::Raw(EngineFrame::new(
                "someone-else",
                FrameKind::CallProgress {
                    call: CallFrame {
                        id: "stray".into(),
                        ..CallFrame::default()
                    },
                },
            )),
            Step::Raw(EngineFrame::new(&req.run_id, FrameKind::Unknown)),
            progress("root", "mine"),
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();

    assert_eq!(run.text().await.unwrap(), "mine");
    let calls = run.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls.contains_key("root"));
}

#[tokio::test]
async fn progress_is_cumulative_per_call() {
    let engine = ScriptedEngine::new(|_| {
        vec![
            progress("root", "The"),
            progress("root", "The answer"),
            progress("root", "The answer is 42"),
            finish_streamed(),
        ]
    });
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    let mut events = run.subscribe();
    run.text().await.unwrap();

    let mut last = String::new();
    let mut count = 0;
    while let Ok(RunEvent::CallProgress(call)) = events.try_recv() {
        let content = call.content();
        assert!(content.starts_with(&last), "{content:?} after {last:?}");
        last = content;
        count += 1;
    }
    assert_eq!(count, 3);
    assert_eq!(last, "The answer is 42");
}

#[tokio::test]
async fn panicking_listener_does_not_stop_the_run() {
    let engine = ScriptedEngine::new(|_| vec![progress("root", "ok"), finish_streamed()]);
    let client = client_for(engine).await;
    let run = client.evaluate(Tool::new("x"), RunOptions::new()).unwrap();
    run.on(EventType::CallProgress, |_| panic!("listener bug"));

    assert_eq!(run.text().await.unwrap(), "ok");
    assert_eq!(run.state(), RunState::Finished);
}
