mod common;

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use anyhow::Result;
use chutra::{
    artifact::ArtifactId,
    bus::{EventKind, PanelEvent},
    error::ExecutionError,
    execution::{ChunkKind, OutputChunk, RunStatus, Shim},
    state::{ExecutionStatus, ExecutionStore},
};
use common::{eventually, Harness};
use pretty_assertions::assert_eq;

fn store(id: &str, auto_send: bool) -> Arc<ExecutionStore> {
    Arc::new(ExecutionStore::new(ArtifactId::from(id), auto_send))
}

#[tokio::test]
async fn simple_print_completes_and_sends_to_chat() -> Result<()> {
    let h = Harness::new();
    let store = store("hello", true);

    let run = h.engine.run(&store, "print(\"hello\")").await?;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.contents, vec![OutputChunk::text("hello\n")]);
    let state = store.snapshot();
    assert_eq!(state.status, ExecutionStatus::Executed);
    assert_eq!(state.outputs, vec![run]);
    assert_eq!(
        h.sink.contents(),
        vec!["Code execution results:\n```python\n# Code Execution Results\nhello\n```".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn plotting_code_gets_matplotlib_setup_before_the_body() -> Result<()> {
    let h = Harness::new();
    let store = store("plot", true);
    let source = "import matplotlib.pyplot as plt\nprint(\"plotting\")\nplt.show()";

    let run = h.engine.run(&store, source).await?;

    let executed = h.sandbox().executed.lock().clone();
    assert_eq!(executed.len(), 4);
    assert_eq!(executed[0], Shim::Basic.source());
    assert!(executed[1].contains("def setup_matplotlib_output"));
    assert_eq!(executed[2], "setup_matplotlib_output()");
    assert_eq!(executed[3], source);

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.contents.len(), 2);
    assert_eq!(run.contents[1].kind, ChunkKind::Image);
    assert_eq!(run.contents[1].value, "data:image/png;base64,iVBORw0KGgo=");

    // the image payload never reaches the chat
    let sent = h.sink.contents();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("plotting\n[Image output generated]\n```"));
    assert!(!sent[0].contains("base64"));
    Ok(())
}

#[tokio::test]
async fn plain_code_gets_only_the_basic_shim() -> Result<()> {
    let h = Harness::new();
    let store = store("plain", false);

    h.engine.run(&store, "print(\"x\")").await?;

    assert_eq!(
        h.sandbox().executed.lock().clone(),
        vec![Shim::Basic.source().to_string(), "print(\"x\")".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn runtime_failure_leaves_artifact_idle_with_one_failed_run() -> Result<()> {
    let h = Harness::new();
    let store = store("broken", true);
    let (_ids, mut events) = h.bus.subscribe_channel(&[EventKind::ExecutionComplete]);

    let run = h.engine.run(&store, "print(\"partial\")\nraise Exception(\"boom\")").await?;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.contents, vec![OutputChunk::text("boom")]);
    let state = store.snapshot();
    assert_eq!(state.status, ExecutionStatus::Idle);
    assert_eq!(state.outputs.len(), 1);
    assert!(h.sink.contents().is_empty());

    assert_eq!(
        events.recv().await,
        Some(PanelEvent::ExecutionComplete { artifact_id: ArtifactId::from("broken"), error: Some("boom".into()) })
    );
    Ok(())
}

#[tokio::test]
async fn failed_artifact_can_run_again() -> Result<()> {
    let h = Harness::new();
    let store = store("retry", false);

    h.engine.run(&store, "raise Exception(\"first\")").await?;
    let second = h.engine.run(&store, "print(\"ok\")").await?;

    let state = store.snapshot();
    assert_eq!(state.status, ExecutionStatus::Executed);
    assert_eq!(state.outputs.len(), 2);
    assert_eq!(state.outputs[1], second);
    Ok(())
}

#[tokio::test]
async fn concurrent_run_is_rejected_while_executing() -> Result<()> {
    let h = Harness::new();
    let store = store("busy", false);

    let first = {
        let engine = Arc::clone(&h.engine);
        let store = Arc::clone(&store);
        tokio::spawn(async move { engine.run(&store, "wait()\nprint(\"done\")").await })
    };
    assert!(eventually(|| store.status() == ExecutionStatus::Executing).await);

    let second = h.engine.run(&store, "print(\"again\")").await;
    assert!(matches!(second, Err(ExecutionError::Busy)));
    assert_eq!(store.snapshot().outputs.len(), 1);

    h.sandbox().release();
    let run = first.await??;
    assert_eq!(run.contents, vec![OutputChunk::text("done\n")]);
    assert_eq!(store.snapshot().outputs.len(), 1);
    Ok(())
}

#[tokio::test]
async fn timeout_fails_the_run_and_discards_the_interpreter() -> Result<()> {
    let h = Harness::with_timeout(Some(Duration::from_millis(50)));
    let store = store("slow", true);

    let run = h.engine.run(&store, "hang()").await?;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.contents[0].value.starts_with("Execution timed out"));
    assert_eq!(store.status(), ExecutionStatus::Idle);
    assert_eq!(h.sandbox().shutdowns.load(Ordering::SeqCst), 1);

    // next run starts a fresh interpreter
    h.engine.run(&store, "print(\"back\")").await?;
    assert_eq!(h.factory.initializations.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn interpreter_is_started_once_per_session() -> Result<()> {
    let h = Harness::new();
    let a = store("a", false);
    let b = store("b", false);

    h.engine.run(&a, "print(\"a\")").await?;
    h.engine.run(&b, "print(\"b\")").await?;

    assert_eq!(h.factory.initializations.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn interpreter_start_failure_is_a_failed_run() -> Result<()> {
    let h = Harness::new();
    h.factory.fail.store(true, Ordering::SeqCst);
    let store = store("noinit", true);

    let run = h.engine.run(&store, "print(\"x\")").await?;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.contents[0].value, "Failed to start interpreter: interpreter unavailable");
    assert_eq!(store.status(), ExecutionStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn package_loading_is_shown_on_the_same_run() -> Result<()> {
    let h = Harness::new();
    let store = store("numpy", false);
    let mut updates = store.watch();

    let run = h.engine.run(&store, "import numpy\nprint(\"1\")").await?;

    assert_eq!(h.sandbox().packages_loaded.lock().clone(), vec!["numpy".to_string()]);
    assert!(updates.has_changed()?);
    let state = updates.borrow_and_update().clone();
    assert_eq!(state.outputs.len(), 1);
    assert_eq!(state.outputs[0].id, run.id);
    assert_eq!(state.outputs[0].status, RunStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn package_load_failure_is_reported() -> Result<()> {
    let h = Harness::new();
    h.sandbox().fail_packages.store(true, Ordering::SeqCst);
    let store = store("nopkg", false);

    let run = h.engine.run(&store, "import numpy").await?;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.contents[0].value, "Failed to load packages: numpy is not available");
    Ok(())
}

#[tokio::test]
async fn auto_send_off_keeps_results_local() -> Result<()> {
    let h = Harness::new();
    let store = store("quiet", false);

    h.engine.run(&store, "print(\"x\")").await?;

    assert!(h.sink.contents().is_empty());
    assert_eq!(store.snapshot().outputs.len(), 1);
    Ok(())
}

#[tokio::test]
async fn silent_success_sends_nothing() -> Result<()> {
    let h = Harness::new();
    let store = store("silent", true);

    let run = h.engine.run(&store, "x = 1").await?;

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.contents.is_empty());
    assert!(h.sink.contents().is_empty());
    Ok(())
}

#[tokio::test]
async fn auto_send_includes_every_completed_run() -> Result<()> {
    let h = Harness::new();
    let store = store("twice", true);

    h.engine.run(&store, "print(\"one\")").await?;
    h.engine.run(&store, "print(\"two\")").await?;

    let sent = h.sink.contents();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1],
        "Code execution results:\n```python\n# Code Execution Results\none\n\n----- Run Result -----\ntwo\n```"
    );
    Ok(())
}

#[tokio::test]
async fn artifacts_sharing_an_interpreter_keep_their_own_output() -> Result<()> {
    let h = Harness::new();
    let a = store("a", false);
    let b = store("b", false);
    let a_source = "print(\"a1\")\nwait()\nprint(\"a2\")";

    let first = {
        let engine = Arc::clone(&h.engine);
        let a = Arc::clone(&a);
        tokio::spawn(async move { engine.run(&a, a_source).await })
    };
    assert!(eventually(|| h.sandbox().executed.lock().iter().any(|s| s == a_source)).await);

    let second = {
        let engine = Arc::clone(&h.engine);
        let b = Arc::clone(&b);
        tokio::spawn(async move { engine.run(&b, "print(\"b\")").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(b.status(), ExecutionStatus::Executing);
    assert!(!h.sandbox().executed.lock().iter().any(|s| s == "print(\"b\")"));

    h.sandbox().release();
    let a_run = first.await??;
    let b_run = second.await??;

    assert_eq!(a_run.contents, vec![OutputChunk::text("a1\n"), OutputChunk::text("a2\n")]);
    assert_eq!(b_run.contents, vec![OutputChunk::text("b\n")]);
    Ok(())
}

#[tokio::test]
async fn timeout_in_one_artifact_does_not_break_a_waiting_one() -> Result<()> {
    let h = Harness::with_timeout(Some(Duration::from_millis(80)));
    let slow = store("slow", false);
    let quick = store("quick", false);

    let first = {
        let engine = Arc::clone(&h.engine);
        let slow = Arc::clone(&slow);
        tokio::spawn(async move { engine.run(&slow, "hang()").await })
    };
    assert!(eventually(|| h.sandbox().executed.lock().iter().any(|s| s == "hang()")).await);
    let quick_run = h.engine.run(&quick, "print(\"quick\")").await?;
    let slow_run = first.await??;

    assert_eq!(slow_run.status, RunStatus::Failed);
    assert_eq!(quick_run.status, RunStatus::Completed);
    assert_eq!(quick_run.contents, vec![OutputChunk::text("quick\n")]);
    assert_eq!(h.sandbox().shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.factory.initializations.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn silent_rerun_does_not_resend_earlier_results() -> Result<()> {
    let h = Harness::new();
    let store = store("resend", true);

    h.engine.run(&store, "print(\"once\")").await?;
    h.engine.run(&store, "x = 1").await?;

    assert_eq!(h.sink.contents().len(), 1);
    assert_eq!(store.snapshot().auto_send_message(), None);
    Ok(())
}
