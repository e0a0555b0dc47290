#![allow(clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rowmesh_codec::{FrameChannel, FrameCodec, MessageChannel, decode_payload, encode_payload};
use rowmesh_coordinator::{CoordinatorConfig, CoordinatorServer};
use rowmesh_core::traits::{FramedTransport, TransportFactory};
use rowmesh_core::{
    ConnectionId, CoordError, Frame, JobDescriptor, Matrix, MessageType, RegisterWorker, Row,
    TaskAssignment, TaskCompletion, WorkerAck,
};
use rowmesh_transport_tcp::{TcpConfig, TcpTransport, TcpTransportFactory};
use tokio::task::JoinHandle;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_listen_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_liveness_timeout(Duration::from_millis(300))
        .with_task_timeout(Duration::from_secs(2))
        .with_sweep_interval(Duration::from_millis(50))
        .with_connect_wait(Duration::from_secs(1))
        .with_job_deadline(Duration::from_secs(2))
}

async fn start(config: CoordinatorConfig) -> (Arc<CoordinatorServer>, SocketAddr) {
    let server = Arc::new(CoordinatorServer::new(config));
    let addr = server.start_listening().await.expect("failed to start coordinator");
    (server, addr)
}

async fn connect(addr: SocketAddr) -> FrameChannel<TcpTransport> {
    let transport = TcpTransportFactory::default()
        .connect(addr)
        .await
        .expect("failed to connect");
    MessageChannel::new(transport, FrameCodec::new())
}

async fn recv(channel: &FrameChannel<TcpTransport>) -> Frame {
    tokio::time::timeout(RECV_TIMEOUT, channel.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("failed to receive frame")
}

struct TestWorker {
    name: String,
    id: ConnectionId,
    channel: FrameChannel<TcpTransport>,
}

async fn register(addr: SocketAddr, name: &str) -> TestWorker {
    let channel = connect(addr).await;
    let frame = encode_payload(MessageType::RegisterWorker, name, &RegisterWorker::new(name))
        .expect("encode register");
    channel.send(&frame).await.expect("send register");

    loop {
        let frame = recv(&channel).await;
        match frame.message_type {
            MessageType::WorkerAck => {
                let ack: WorkerAck = decode_payload(&frame).expect("decode ack");
                return TestWorker {
                    name: name.to_string(),
                    id: ack.connection_id,
                    channel,
                };
            }
            MessageType::Heartbeat => {}
            other => panic!("unexpected {other} before WORKER_ACK"),
        }
    }
}

fn multiply_row(row: &[i64], rhs: &Matrix) -> Row {
    (0..rhs.num_cols())
        .map(|col| row.iter().zip(rhs.rows()).map(|(a, r)| a * r[col]).sum())
        .collect()
}

/// Answers heartbeats and computes assigned rows. Returns (closing the
/// socket) when it receives `drop_on`, or when the connection ends.
fn serve(worker: TestWorker, drop_on: Option<usize>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(frame) = worker.channel.recv().await {
            match frame.message_type {
                MessageType::Heartbeat => {
                    let ack = Frame::empty(MessageType::HeartbeatAck, worker.name.as_str());
                    if worker.channel.send(&ack).await.is_err() {
                        return;
                    }
                }
                MessageType::RpcRequest => {
                    let task: TaskAssignment = decode_payload(&frame).expect("decode task");
                    if drop_on == Some(task.partition) {
                        return;
                    }
                    let completion = TaskCompletion::new(
                        task.task_id,
                        task.partition,
                        multiply_row(&task.row, &task.rhs),
                    );
                    let reply = encode_payload(MessageType::TaskComplete, &worker.name, &completion)
                        .expect("encode completion");
                    if worker.channel.send(&reply).await.is_err() {
                        return;
                    }
                }
                _ => {}
            }
        }
    })
}

/// Keeps the connection open without reading or answering anything.
fn hold_silently(worker: TestWorker) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _worker = worker;
        tokio::time::sleep(Duration::from_secs(30)).await;
    })
}

fn matrix(rows: Vec<Row>) -> Matrix {
    Matrix::new(rows).expect("valid matrix")
}

#[tokio::test]
async fn single_worker_completes_job() {
    let (server, addr) = start(test_config()).await;
    let worker = serve(register(addr, "w1").await, None);

    let job = JobDescriptor::multiply(
        matrix(vec![vec![1, 2], vec![3, 4]]),
        matrix(vec![vec![5, 6], vec![7, 8]]),
    );
    let result = server.submit_job(job, 1).await.expect("job should run");

    assert!(result.is_complete());
    assert_eq!(
        result.into_matrix().expect("complete").into_rows(),
        vec![vec![19, 22], vec![43, 50]]
    );
    assert!(server.dispatcher().snapshot().await.is_empty());

    server.shutdown().await;
    worker.abort();
}

#[tokio::test]
async fn lost_worker_leaves_partial_result() {
    let (server, addr) = start(test_config().with_job_deadline(Duration::from_millis(1500))).await;
    let worker = serve(register(addr, "flaky").await, Some(1));

    let job = JobDescriptor::square(matrix(vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]));
    let submit = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.submit_job(job, 1).await })
    };

    let dispatcher = server.dispatcher();
    let mut requeued = false;
    for _ in 0..100 {
        if let Some(snapshot) = dispatcher.snapshot().await.first()
            && snapshot.done == 1
            && snapshot.pending == 2
            && snapshot.in_flight == 0
        {
            requeued = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(requeued, "lost task should return to pending");
    assert_eq!(server.registry().registered_count(), 0);

    let result = submit
        .await
        .expect("submit task")
        .expect("job should return at deadline");
    assert_eq!(result.rows, vec![Some(vec![30, 36, 42]), None, None]);
    assert_eq!(result.missing_partitions(), vec![1, 2]);

    worker.await.expect("worker task");
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_closing() {
    let (server, addr) = start(test_config()).await;
    let channel = connect(addr).await;

    let mut wrong_magic = Frame::empty(MessageType::RegisterWorker, "intruder");
    wrong_magic.magic = "XXXXXX".to_string();
    channel.send(&wrong_magic).await.expect("send bad magic");
    channel
        .transport()
        .send_frame(&[0xde, 0xad, 0xbe, 0xef])
        .await
        .expect("send garbage");

    channel
        .send(&Frame::empty(MessageType::Heartbeat, "probe"))
        .await
        .expect("send heartbeat");
    let reply = recv(&channel).await;
    assert_eq!(reply.message_type, MessageType::HeartbeatAck);
    assert!(reply.validate().is_ok());

    assert_eq!(server.registry().registered_count(), 0);
    assert_eq!(server.registry().connection_count().await, 1);
    assert!(server.dispatcher().snapshot().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn no_workers_fails_fast() {
    let (server, _addr) =
        start(test_config().with_connect_wait(Duration::from_millis(200))).await;

    let job = JobDescriptor::square(Matrix::identity(2));
    let result = server.submit_job(job, 2).await;

    assert!(matches!(result, Err(CoordError::NoWorkers { .. })));
    assert!(server.dispatcher().snapshot().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn silent_worker_is_evicted_and_its_task_reassigned() {
    let config = test_config().with_job_deadline(Duration::from_secs(3));
    let heartbeat = config.heartbeat_interval;
    let (server, addr) = start(config).await;

    let responsive = register(addr, "responsive").await;
    let responsive_id = responsive.id;
    let responsive = serve(responsive, None);
    let silent = register(addr, "silent").await;
    let silent_id = silent.id;
    assert!(responsive_id < silent_id);
    let silent = hold_silently(silent);

    let input = matrix(vec![vec![1, 0], vec![0, 1], vec![2, 3], vec![4, 5]]);
    let rhs = matrix(vec![vec![1, 1], vec![1, -1]]);
    let result = server
        .submit_job(JobDescriptor::multiply(input, rhs), 2)
        .await
        .expect("job should run");

    assert!(result.is_complete());
    assert_eq!(
        result.rows,
        vec![
            Some(vec![1, 1]),
            Some(vec![1, -1]),
            Some(vec![5, -1]),
            Some(vec![9, -1]),
        ]
    );

    let registry = server.registry();
    assert!(registry.get(silent_id).await.is_none());

    tokio::time::sleep(heartbeat * 3).await;
    let info = registry
        .get(responsive_id)
        .await
        .expect("responsive worker should survive");
    assert!(info.alive && info.registered);
    assert_eq!(info.worker_name.as_deref(), Some("responsive"));

    server.shutdown().await;
    responsive.abort();
    silent.abort();
}

#[tokio::test]
async fn abandoned_submit_retires_its_job() {
    let (server, addr) = start(test_config().with_job_deadline(Duration::from_secs(30))).await;
    let worker = hold_silently(register(addr, "w1").await);

    let submit = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server
                .submit_job(JobDescriptor::square(Matrix::identity(3)), 1)
                .await
        })
    };

    let dispatcher = server.dispatcher();
    let mut created = false;
    for _ in 0..100 {
        if !dispatcher.snapshot().await.is_empty() {
            created = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(created, "job should be created");

    submit.abort();
    let aborted = submit.await.expect_err("submit should be cancelled");
    assert!(aborted.is_cancelled());

    let mut retired = false;
    for _ in 0..100 {
        if dispatcher.snapshot().await.is_empty() {
            retired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(retired, "cancelled job should not outlive its request");

    server.shutdown().await;
    worker.abort();
}

#[tokio::test]
async fn job_too_large_for_message_limit_is_rejected() {
    let config = test_config().with_tcp(TcpConfig::new().with_max_message_size(256));
    let (server, addr) = start(config).await;
    let worker = serve(register(addr, "w1").await, None);

    let oversized = JobDescriptor::square(Matrix::identity(8));
    let result = tokio::time::timeout(RECV_TIMEOUT, server.submit_job(oversized, 1))
        .await
        .expect("rejection should not wait for the deadline");
    assert!(matches!(result, Err(CoordError::InvalidJob(_))));
    assert!(server.dispatcher().snapshot().await.is_empty());

    let small = JobDescriptor::square(Matrix::identity(2));
    let result = server.submit_job(small, 1).await.expect("small job should run");
    assert_eq!(result.rows, vec![Some(vec![1, 0]), Some(vec![0, 1])]);
    assert_eq!(server.registry().registered_count(), 1);

    server.shutdown().await;
    worker.abort();
}

#[tokio::test]
async fn connections_beyond_cap_are_refused() {
    let (server, addr) = start(test_config().with_max_connections(1)).await;

    let first = connect(addr).await;
    first
        .send(&Frame::empty(MessageType::Heartbeat, "first"))
        .await
        .expect("send heartbeat");
    assert_eq!(recv(&first).await.message_type, MessageType::HeartbeatAck);

    let second = connect(addr).await;
    let refused = tokio::time::timeout(RECV_TIMEOUT, second.recv())
        .await
        .expect("refused connection should close promptly");
    assert!(refused.is_err());

    first
        .send(&Frame::empty(MessageType::Heartbeat, "first"))
        .await
        .expect("send heartbeat");
    assert_eq!(recv(&first).await.message_type, MessageType::HeartbeatAck);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_worker_connections() {
    let (server, addr) = start(test_config()).await;
    let worker = register(addr, "w1").await;

    tokio::time::timeout(RECV_TIMEOUT, server.shutdown())
        .await
        .expect("shutdown should finish");

    let closed = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match worker.channel.recv().await {
                Ok(_) => {}
                Err(e) => break e,
            }
        }
    })
    .await
    .expect("connection should close");
    assert!(closed.is_fatal());
    assert_eq!(server.registry().connection_count().await, 0);
}
