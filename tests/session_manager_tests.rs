//! Integration tests for SessionManager on a fake PTY backend

mod common;

use common::{fake_manager, fake_manager_on, next_note, record, FakePlatform, Note, HOME};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use termhost::session::{CreateOptions, SessionId, TerminalError};

const WINDOW: Duration = Duration::from_millis(30);
const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_create_session_defaults() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);

    let session = manager.create_session(CreateOptions::new()).await?;

    assert_eq!(session.cols, 80);
    assert_eq!(session.rows, 24);
    assert_eq!(session.shell, "/bin/bash");
    assert_eq!(session.args, vec!["--login"]);
    assert_eq!(session.cwd, PathBuf::from(HOME));
    assert_eq!(session.pid, Some(4242));

    let journal = spawner.journal();
    assert_eq!(journal.spawned.len(), 1);
    let request = &journal.spawned[0];
    assert_eq!((request.cols, request.rows), (80, 24));
    assert_eq!(request.program, "/bin/bash");
    assert!(request
        .env
        .contains(&("TERM".to_string(), "xterm-256color".to_string())));

    Ok(())
}

#[tokio::test]
async fn test_create_session_with_size() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);

    let session = manager
        .create_session(CreateOptions::new().with_size(100, 30))
        .await?;

    assert_eq!((session.cols, session.rows), (100, 30));
    let journal = spawner.journal();
    assert_eq!((journal.spawned[0].cols, journal.spawned[0].rows), (100, 30));

    Ok(())
}

#[tokio::test]
async fn test_create_session_normalizes_cwd() -> anyhow::Result<()> {
    let platform = FakePlatform::linux().with_dir("/projects/app");
    let (manager, spawner) = fake_manager_on(platform, WINDOW);

    let session = manager
        .create_session(CreateOptions::new().with_cwd("//projects//app"))
        .await?;
    assert_eq!(session.cwd, PathBuf::from("/projects/app"));

    let missing = manager
        .create_session(CreateOptions::new().with_cwd("/nowhere"))
        .await?;
    assert_eq!(missing.cwd, PathBuf::from(HOME));
    assert_eq!(spawner.journal().spawned[1].cwd, PathBuf::from(HOME));

    Ok(())
}

#[tokio::test]
async fn test_spawn_failure_registers_nothing() {
    let (manager, spawner) = fake_manager(WINDOW);
    spawner.journal().fail_spawn = true;

    let result = manager.create_session(CreateOptions::new()).await;

    match result {
        Err(TerminalError::Spawn { program, reason }) => {
            assert_eq!(program, "/bin/bash");
            assert!(reason.contains("fork failed"));
        }
        other => panic!("Expected spawn error, got {:?}", other),
    }
    assert!(manager.get_all_sessions().await.is_empty());
}

#[tokio::test]
async fn test_write_forwards_verbatim() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let session = manager.create_session(CreateOptions::new()).await?;

    assert!(manager.write(&session.id, "ls\n").await?);

    let journal = spawner.journal();
    assert_eq!(journal.writes, vec![(session.id, b"ls\n".to_vec())]);

    Ok(())
}

#[tokio::test]
async fn test_write_to_unknown_session() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    manager.create_session(CreateOptions::new()).await?;

    assert!(!manager.write(&SessionId::new(), "x").await?);
    assert!(spawner.journal().writes.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_write_transport_failure_surfaces() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let session = manager.create_session(CreateOptions::new()).await?;
    spawner.journal().fail_write = true;

    let result = manager.write(&session.id, "echo\n").await;
    assert!(matches!(result, Err(TerminalError::Write { id, .. }) if id == session.id));

    Ok(())
}

#[tokio::test]
async fn test_resize_updates_dimensions() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let session = manager.create_session(CreateOptions::new()).await?;

    assert!(manager.resize(&session.id, 132, 43).await);

    let updated = manager.get_session(&session.id).await.expect("still live");
    assert_eq!((updated.cols, updated.rows), (132, 43));
    assert_eq!(spawner.journal().resizes, vec![(session.id, 132, 43)]);

    Ok(())
}

#[tokio::test]
async fn test_resize_unknown_session() {
    let (manager, spawner) = fake_manager(WINDOW);

    assert!(!manager.resize(&SessionId::new(), 100, 50).await);
    assert!(spawner.journal().resizes.is_empty());
}

#[tokio::test]
async fn test_failed_resize_keeps_dimensions() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let session = manager.create_session(CreateOptions::new()).await?;
    spawner.journal().fail_resize = true;

    assert!(!manager.resize(&session.id, 200, 60).await);

    let unchanged = manager.get_session(&session.id).await.expect("still live");
    assert_eq!((unchanged.cols, unchanged.rows), (80, 24));

    Ok(())
}

#[tokio::test]
async fn test_rapid_output_is_batched() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(Duration::from_millis(50));
    let mut notes = record(&manager);
    let session = manager.create_session(CreateOptions::new()).await?;
    let events = spawner.events_for(&session.id);

    let chunks: Vec<String> = (0..100).map(|i| format!("line {}\r\n", i)).collect();
    for chunk in &chunks {
        assert!(events.output(chunk.clone().into_bytes()));
    }
    let expected = chunks.concat();

    let mut delivered = String::new();
    let mut notifications = 0;
    while delivered.len() < expected.len() {
        match next_note(&mut notes, WAIT).await {
            Some(Note::Data(id, text)) => {
                assert_eq!(id, session.id);
                delivered.push_str(&text);
                notifications += 1;
            }
            other => panic!("Expected data, got {:?}", other),
        }
    }

    assert_eq!(delivered, expected);
    assert!(
        notifications <= 2,
        "100 chunks in one burst should arrive in at most two batches, got {}",
        notifications
    );
    assert_eq!(manager.get_scrollback(&session.id).await, Some(expected));

    Ok(())
}

#[tokio::test]
async fn test_scrollback_is_current_before_flush() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(Duration::from_secs(30));
    let session = manager.create_session(CreateOptions::new()).await?;
    let events = spawner.events_for(&session.id);

    events.output(b"$ ".to_vec());

    let mut scrollback = None;
    for _ in 0..50 {
        scrollback = manager.get_scrollback(&session.id).await;
        if scrollback.as_deref() == Some("$ ") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(scrollback.as_deref(), Some("$ "));

    Ok(())
}

#[tokio::test]
async fn test_process_exit_notifies_once() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let mut notes = record(&manager);
    let session = manager.create_session(CreateOptions::new()).await?;
    let events = spawner.events_for(&session.id);

    events.exited(3);
    events.exited(3);

    assert_eq!(
        next_note(&mut notes, WAIT).await,
        Some(Note::Exit(session.id, 3))
    );
    assert_eq!(next_note(&mut notes, Duration::from_millis(150)).await, None);
    assert!(manager.get_session(&session.id).await.is_none());
    assert!(manager.get_scrollback(&session.id).await.is_none());
    assert!(!manager.write(&session.id, "x").await?);

    Ok(())
}

#[tokio::test]
async fn test_exit_flushes_pending_output_first() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(Duration::from_secs(30));
    let mut notes = record(&manager);
    let session = manager.create_session(CreateOptions::new()).await?;
    let events = spawner.events_for(&session.id);

    events.output(b"logout\r\n".to_vec());
    events.exited(0);

    assert_eq!(
        next_note(&mut notes, WAIT).await,
        Some(Note::Data(session.id, "logout\r\n".to_string()))
    );
    assert_eq!(
        next_note(&mut notes, WAIT).await,
        Some(Note::Exit(session.id, 0))
    );

    Ok(())
}

#[tokio::test]
async fn test_kill_unknown_session() {
    let (manager, spawner) = fake_manager(WINDOW);

    assert!(!manager.kill_session(&SessionId::new()).await);
    assert!(spawner.journal().kills.is_empty());
}

#[tokio::test]
async fn test_kill_absorbs_termination_failure() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let session = manager.create_session(CreateOptions::new()).await?;
    spawner.journal().fail_kill = true;

    assert!(manager.kill_session(&session.id).await);
    assert_eq!(spawner.journal().kills, vec![session.id]);
    assert!(manager.get_session(&session.id).await.is_none());
    assert!(!manager.kill_session(&session.id).await);

    Ok(())
}

#[tokio::test]
async fn test_killed_session_reports_exit_once() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let mut notes = record(&manager);
    let session = manager.create_session(CreateOptions::new()).await?;
    let events = spawner.events_for(&session.id);

    assert!(manager.kill_session(&session.id).await);
    events.exited(137);
    events.exited(137);

    assert_eq!(
        next_note(&mut notes, WAIT).await,
        Some(Note::Exit(session.id, 137))
    );
    assert_eq!(next_note(&mut notes, Duration::from_millis(150)).await, None);

    Ok(())
}

#[tokio::test]
async fn test_kill_discards_partial_batch() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(Duration::from_millis(80));
    let mut notes = record(&manager);
    let session = manager.create_session(CreateOptions::new()).await?;
    let events = spawner.events_for(&session.id);

    events.output(b"half a line".to_vec());
    assert!(manager.kill_session(&session.id).await);

    assert_eq!(next_note(&mut notes, Duration::from_millis(250)).await, None);

    Ok(())
}

#[tokio::test]
async fn test_cleanup_survives_failing_kills() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    for _ in 0..3 {
        manager.create_session(CreateOptions::new()).await?;
    }
    spawner.journal().fail_kill = true;

    manager.cleanup().await;

    assert!(manager.get_all_sessions().await.is_empty());
    assert_eq!(spawner.journal().kills.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_sessions_listed_in_creation_order() -> anyhow::Result<()> {
    let (manager, _spawner) = fake_manager(WINDOW);

    let mut created = Vec::new();
    for _ in 0..6 {
        created.push(manager.create_session(CreateOptions::new()).await?.id);
    }
    assert!(manager.kill_session(&created[2]).await);
    created.remove(2);

    let listed: Vec<SessionId> = manager
        .get_all_sessions()
        .await
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, created);

    Ok(())
}

#[tokio::test]
async fn test_all_subscribers_see_every_session() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let seen = Arc::new(Mutex::new(Vec::new()));

    for subscriber in 0..2 {
        let seen = Arc::clone(&seen);
        manager.on_data(move |id, text| {
            seen.lock().unwrap().push((subscriber, *id, text.to_string()));
        });
    }
    let mut notes = record(&manager);

    let a = manager.create_session(CreateOptions::new()).await?;
    let b = manager.create_session(CreateOptions::new()).await?;
    spawner.events_for(&a.id).output(b"from a".to_vec());
    spawner.events_for(&b.id).output(b"from b".to_vec());

    next_note(&mut notes, WAIT).await.expect("first batch");
    next_note(&mut notes, WAIT).await.expect("second batch");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    for subscriber in 0..2 {
        assert!(seen.contains(&(subscriber, a.id, "from a".to_string())));
        assert!(seen.contains(&(subscriber, b.id, "from b".to_string())));
    }

    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_targeted() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    let dropped = Arc::new(Mutex::new(0));

    let counter = Arc::clone(&dropped);
    let subscription = manager.on_data(move |_, _| {
        *counter.lock().unwrap() += 1;
    });
    let mut notes = record(&manager);

    subscription.unsubscribe();
    subscription.unsubscribe();

    let session = manager.create_session(CreateOptions::new()).await?;
    spawner.events_for(&session.id).output(b"hello".to_vec());

    assert_eq!(
        next_note(&mut notes, WAIT).await,
        Some(Note::Data(session.id, "hello".to_string()))
    );
    assert_eq!(*dropped.lock().unwrap(), 0);

    Ok(())
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_stop_delivery() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    manager.on_data(|_, _| panic!("subscriber bug"));
    let mut notes = record(&manager);

    let session = manager.create_session(CreateOptions::new()).await?;
    spawner.events_for(&session.id).output(b"still here".to_vec());

    assert_eq!(
        next_note(&mut notes, WAIT).await,
        Some(Note::Data(session.id, "still here".to_string()))
    );
    assert!(manager.get_session(&session.id).await.is_some());

    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_the_manager() -> anyhow::Result<()> {
    let (manager, spawner) = fake_manager(WINDOW);
    manager.create_session(CreateOptions::new()).await?;

    manager.shutdown().await;

    assert_eq!(spawner.journal().kills.len(), 1);
    assert!(matches!(
        manager.create_session(CreateOptions::new()).await,
        Err(TerminalError::Stopped)
    ));
    assert!(!manager.kill_session(&SessionId::new()).await);
    assert!(manager.get_all_sessions().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_platform_queries_use_injected_host() {
    let (manager, _spawner) = fake_manager(WINDOW);

    let shell = manager.detect_shell();
    assert_eq!(shell.program, "/bin/bash");
    assert!(!manager.is_wsl());

    let info = manager.platform_info();
    assert_eq!(info.platform, "linux");
    assert_eq!(info.default_shell, "/bin/bash");
}
