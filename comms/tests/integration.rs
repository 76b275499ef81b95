use std::{borrow::Cow, time::Duration};

use comms::{
    HandshakeClient, HandshakeErr, HandshakeServer,
    msg::{Command, Msg},
    specs::{GeometryProposal, SessionSpec},
};
use tokio::io;

fn session(cluster_size: usize) -> SessionSpec {
    let geometry = GeometryProposal {
        cluster_size,
        n_dofs: 2,
        n_contacts: 1,
        extra_width: 0,
        jnt_names: vec!["hip".into(), "knee".into()],
        root_acc: false,
    }
    .validate()
    .unwrap();

    SessionSpec {
        geometry,
        namespace: "integration".into(),
        shm_dir: std::env::temp_dir(),
    }
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (rx, two_tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, two_tx);

    tx.send(&Msg::Err(Cow::Borrowed("Hello, world!")))
        .await
        .unwrap();
    tx.send(&Msg::Control(Command::Attached { worker_index: 1 }))
        .await
        .unwrap();

    let mut buf = Vec::new();
    let Msg::Err(detail) = rx.recv_into(&mut buf).await.unwrap() else {
        panic!("unexpected message");
    };
    assert_eq!(detail, "Hello, world!");

    let Msg::Control(Command::Attached { worker_index }) = rx.recv_into(&mut buf).await.unwrap()
    else {
        panic!("unexpected message");
    };
    assert_eq!(worker_index, 1);
}

#[tokio::test]
async fn oversized_frames_are_not_sent() {
    let (one, _two) = io::duplex(64);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let detail = "x".repeat(1 << 20);
    let err = tx.send(&Msg::Err(Cow::Owned(detail))).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offer_reaches_every_slot() {
    let server = HandshakeServer::bind("127.0.0.1:0", Duration::from_secs(5))
        .await
        .unwrap();
    let endpoint = server.local_addr().unwrap().to_string();
    let spec = session(2);

    let workers = (0..2).rev().map(|idx| {
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            let mut hs = HandshakeClient::connect(&endpoint, idx, 10, Duration::from_millis(10))
                .await
                .unwrap();
            let offered = hs.recv_offer().await.unwrap().unwrap();
            hs.confirm().await.unwrap();
            offered
        })
    });
    let workers: Vec<_> = workers.collect();

    server.offer(&spec).await.unwrap();

    for worker in workers {
        assert_eq!(worker.await.unwrap(), spec);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejection_fails_the_offer() {
    let server = HandshakeServer::bind("127.0.0.1:0", Duration::from_secs(5))
        .await
        .unwrap();
    let endpoint = server.local_addr().unwrap().to_string();

    let worker = tokio::spawn(async move {
        let mut hs = HandshakeClient::connect(&endpoint, 0, 10, Duration::from_millis(10))
            .await
            .unwrap();
        hs.recv_offer().await.unwrap().unwrap();
        hs.reject("joint names differ").await.unwrap();
    });

    let err = server.offer(&session(1)).await.unwrap_err();
    assert!(
        matches!(err, HandshakeErr::Rejected { worker_index: 0, ref detail } if detail == "joint names differ")
    );
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_range_claim_is_refused() {
    let server = HandshakeServer::bind("127.0.0.1:0", Duration::from_secs(5))
        .await
        .unwrap();
    let endpoint = server.local_addr().unwrap().to_string();

    let worker = tokio::spawn(async move {
        let mut hs = HandshakeClient::connect(&endpoint, 7, 10, Duration::from_millis(10))
            .await
            .unwrap();
        hs.recv_offer().await
    });

    let err = server.offer(&session(2)).await.unwrap_err();
    assert!(matches!(
        err,
        HandshakeErr::WorkerIndexOutOfRange {
            worker_index: 7,
            cluster_size: 2
        }
    ));
    assert!(matches!(
        worker.await.unwrap(),
        Err(HandshakeErr::Rejected { worker_index: 7, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_claim_disconnects_the_first_worker() {
    let server = HandshakeServer::bind("127.0.0.1:0", Duration::from_secs(5))
        .await
        .unwrap();
    let endpoint = server.local_addr().unwrap().to_string();

    let spec = session(2);
    let offer = server.offer(&spec);

    let worker = tokio::spawn(async move {
        let mut first = HandshakeClient::connect(&endpoint, 0, 10, Duration::from_millis(10))
            .await
            .unwrap();
        let mut second = HandshakeClient::connect(&endpoint, 0, 10, Duration::from_millis(10))
            .await
            .unwrap();
        (first.recv_offer().await, second.recv_offer().await)
    });

    assert!(matches!(
        offer.await.unwrap_err(),
        HandshakeErr::DuplicateWorker(0)
    ));

    let (first, second) = worker.await.unwrap();
    assert!(matches!(first, Ok(None)));
    assert!(matches!(second, Err(HandshakeErr::Rejected { .. })));
}

#[tokio::test]
async fn offer_times_out_without_workers() {
    let server = HandshakeServer::bind("127.0.0.1:0", Duration::from_millis(100))
        .await
        .unwrap();

    let err = server.offer(&session(3)).await.unwrap_err();
    assert!(matches!(
        err,
        HandshakeErr::Timeout {
            connected: 0,
            expected: 3
        }
    ));
}

#[tokio::test]
async fn connect_gives_up_after_retries() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let res = HandshakeClient::connect(&addr.to_string(), 0, 2, Duration::from_millis(5)).await;
    assert!(matches!(
        res,
        Err(HandshakeErr::ConnectionFailed { attempts: 3, .. })
    ));
}
