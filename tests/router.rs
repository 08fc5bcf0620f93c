//! Behavioural tests for the message router: worker pool lifecycle,
//! type-keyed multicast dispatch, and the nested tree-walk.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};
use wirebus::{
    Connection,
    Envelope,
    Request,
    RouterError,
    MessageRouter,
};

use common::{
    LoginRequest,
    LoginResponse,
    TestResult,
    channel_events,
    recv_one,
    serializer,
    socket_pair,
};

/// A live connection to hang dispatch items on; the peer half is returned so
/// the socket stays open for the duration of the test.
async fn idle_connection() -> TestResult<(Arc<Connection>, TcpStream)> {
    let (server, client) = socket_pair().await?;
    let (events, _envelopes, _disconnects) = channel_events();
    Ok((Connection::spawn(server, serializer(), events), client))
}

fn login_envelope_in_response(login: &LoginRequest) -> Envelope {
    let mut envelope = Envelope::new();
    envelope.response_mut().set_message(login.clone());
    envelope
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_message_reaches_leaf_handler_exactly_once() -> TestResult {
    let router = MessageRouter::new();
    router.start(3).await?;

    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    router.subscribe::<LoginRequest, _>(move |_connection, login| {
        let _ = fired_tx.send(login.clone());
    });

    let (connection, _client) = idle_connection().await?;
    let login = LoginRequest {
        username: "ada".into(),
        password: "secret".into(),
    };
    router.enqueue(connection, login_envelope_in_response(&login))?;

    let received = recv_one(&mut fired_rx).await?;
    assert_eq!(received, login);
    sleep(Duration::from_millis(50)).await;
    assert!(fired_rx.try_recv().is_err(), "handler fired more than once");

    router.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn wrapper_types_dispatch_alongside_the_leaf() -> TestResult {
    let router = MessageRouter::new();
    router.start(2).await?;

    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let envelope_tx = fired_tx.clone();
    router.subscribe::<Envelope, _>(move |_connection, _envelope| {
        let _ = envelope_tx.send("envelope");
    });
    let request_tx = fired_tx.clone();
    router.subscribe::<Request, _>(move |_connection, _request| {
        let _ = request_tx.send("request");
    });
    router.subscribe::<LoginRequest, _>(move |_connection, _login| {
        let _ = fired_tx.send("login");
    });

    let (connection, _client) = idle_connection().await?;
    let mut envelope = Envelope::new();
    envelope.request_mut().set_message(LoginRequest {
        username: "ada".into(),
        password: "secret".into(),
    });
    router.enqueue(connection, envelope)?;

    // the walk is depth-first: envelope, then its request section, then the leaf
    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(recv_one(&mut fired_rx).await?);
    }
    assert_eq!(order, vec!["envelope", "request", "login"]);

    router.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn multicast_fires_each_registration_once() -> TestResult {
    let router = MessageRouter::new();
    router.start(2).await?;

    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let first_tx = fired_tx.clone();
    let first = router.subscribe::<LoginRequest, _>(move |_connection, _login| {
        let _ = first_tx.send('a');
    });
    router.subscribe::<LoginRequest, _>(move |_connection, _login| {
        let _ = fired_tx.send('b');
    });
    assert_eq!(router.subscriber_count::<LoginRequest>(), Some(2));

    let (connection, _client) = idle_connection().await?;
    let login = LoginRequest {
        username: "ada".into(),
        password: "secret".into(),
    };
    router.enqueue(Arc::clone(&connection), login_envelope_in_response(&login))?;

    let mut seen = vec![recv_one(&mut fired_rx).await?, recv_one(&mut fired_rx).await?];
    seen.sort_unstable();
    assert_eq!(seen, vec!['a', 'b']);

    router.unsubscribe::<LoginRequest>(first);
    assert_eq!(router.subscriber_count::<LoginRequest>(), Some(1));

    router.enqueue(connection, login_envelope_in_response(&login))?;
    assert_eq!(recv_one(&mut fired_rx).await?, 'b');
    sleep(Duration::from_millis(50)).await;
    assert!(fired_rx.try_recv().is_err(), "removed handler still fired");

    router.stop().await;
    Ok(())
}

#[test]
fn unsubscribing_an_unknown_type_leaves_an_empty_registration() {
    let router = MessageRouter::new();
    assert_eq!(router.subscriber_count::<LoginResponse>(), None);

    let id = router.subscribe::<LoginRequest, _>(|_connection, _login: &LoginRequest| {});
    // quirk preserved from the original: the miss inserts an empty set
    router.unsubscribe::<LoginResponse>(id);
    assert_eq!(router.subscriber_count::<LoginResponse>(), Some(0));
    assert_eq!(router.subscriber_count::<LoginRequest>(), Some(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_panic_is_contained() -> TestResult {
    let router = MessageRouter::new();
    router.start(1).await?;

    router.subscribe::<LoginRequest, _>(|_connection, _login| {
        panic!("boom");
    });
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    router.subscribe::<LoginRequest, _>(move |_connection, _login| {
        let _ = fired_tx.send(());
    });

    let (connection, _client) = idle_connection().await?;
    let login = LoginRequest {
        username: "ada".into(),
        password: "secret".into(),
    };
    router.enqueue(Arc::clone(&connection), login_envelope_in_response(&login))?;
    recv_one(&mut fired_rx).await?;

    // the lone worker survived the panic and keeps draining the queue
    router.enqueue(connection, login_envelope_in_response(&login))?;
    recv_one(&mut fired_rx).await?;
    assert_eq!(router.active_workers(), 1);

    router.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn start_clamps_the_worker_count() -> TestResult {
    let router = MessageRouter::new();

    router.start(0).await?;
    assert_eq!(router.active_workers(), 1);
    assert_eq!(router.start(5).await, Err(RouterError::AlreadyRunning));
    router.stop().await;
    assert_eq!(router.active_workers(), 0);
    assert!(!router.is_running());

    router.start(1000).await?;
    assert_eq!(router.active_workers(), 200);
    router.stop().await;
    assert_eq!(router.active_workers(), 0);
    Ok(())
}

#[tokio::test]
async fn enqueue_without_workers_errors() -> TestResult {
    let router = MessageRouter::new();
    let (connection, _client) = idle_connection().await?;
    assert_eq!(
        router.enqueue(connection, Envelope::new()),
        Err(RouterError::NotRunning)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_discards_queued_items() -> TestResult {
    let router = MessageRouter::new();
    router.start(1).await?;

    let dispatched = Arc::new(AtomicUsize::new(0));
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);
    let counter = Arc::clone(&dispatched);
    router.subscribe::<LoginRequest, _>(move |_connection, _login| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = entered_tx.send(());
        // park the only worker until the test releases it
        if let Ok(guard) = release_rx.lock() {
            let _ = guard.recv();
        }
    });

    let (connection, _client) = idle_connection().await?;
    let login = LoginRequest {
        username: "ada".into(),
        password: "secret".into(),
    };
    router.enqueue(Arc::clone(&connection), login_envelope_in_response(&login))?;
    recv_one(&mut entered_rx).await?;

    for _ in 0..50 {
        router.enqueue(Arc::clone(&connection), login_envelope_in_response(&login))?;
    }

    let stopper = Arc::clone(&router);
    let stop_task = tokio::spawn(async move { stopper.stop().await });
    while router.is_running() {
        sleep(Duration::from_millis(5)).await;
    }
    release_tx.send(())?;
    timeout(Duration::from_secs(5), stop_task).await??;

    // the in-flight item ran to completion; the 50 queued items were dropped
    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(
        router.enqueue(connection, login_envelope_in_response(&login)),
        Err(RouterError::NotRunning)
    );
    Ok(())
}
