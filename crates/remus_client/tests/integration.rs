//! ZMQ-based integration tests for the client shell, using a bare
//! [`zeromq::RouterSocket`] as a stand-in broker — the same "mock sentinel"
//! shape as `casparian_worker/tests/integration.rs`'s `test_zmq_message_exchange`,
//! adapted to Remus's request/response bodies instead of a raw header/body
//! pair.

use remus_client::{Client, ClientConfig, ClientError, RetrieveOutcome};
use remus_protocol::{
    JobMessage, JobRequirements, JobResponse, JobResponseBody, JobResult, JobSubmission,
    MeshIOType, ResultEnvelope, ServiceType, StatusCode, StatusEnvelope,
};
use std::collections::HashMap;
use std::net::TcpListener;
use std::time::Duration;
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

fn free_tcp_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    format!("tcp://127.0.0.1:{}", addr.port())
}

fn sample_requirements() -> JobRequirements {
    JobRequirements::new(MeshIOType::new("raw_edges", "mesh2d"), "tetgen", vec![])
}

/// Receive one client request, stripping the ROUTER identity frame.
async fn recv_request(router: &mut RouterSocket) -> (Vec<u8>, JobMessage) {
    let multipart = tokio::time::timeout(Duration::from_secs(2), router.recv())
        .await
        .expect("timed out waiting for client request")
        .expect("recv from client");
    let mut frames: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
    let identity = frames.remove(0);
    let msg = JobMessage::unpack(&frames).expect("parse job message");
    (identity, msg)
}

async fn reply(router: &mut RouterSocket, identity: Vec<u8>, body: JobResponseBody) {
    let mut frames = JobResponse::new(body).pack().unwrap();
    let first = frames.remove(0);
    let mut multipart = ZmqMessage::from(identity);
    multipart.push_back(first.into());
    for frame in frames {
        multipart.push_back(frame.into());
    }
    router.send(multipart).await.unwrap();
}

#[tokio::test]
async fn can_mesh_roundtrips_capability() {
    let addr = free_tcp_addr();
    let mut router = RouterSocket::new();
    router.bind(&addr).await.unwrap();

    let client_task = tokio::spawn({
        let addr = addr.clone();
        async move {
            let mut client = Client::connect(ClientConfig::new(addr)).await.unwrap();
            client.can_mesh(&sample_requirements()).await.unwrap()
        }
    });

    let (identity, msg) = recv_request(&mut router).await;
    assert_eq!(msg.service_type().unwrap(), ServiceType::CanMesh);
    reply(&mut router, identity, JobResponseBody::Capability { can_mesh: true }).await;

    assert!(client_task.await.unwrap());
}

#[tokio::test]
async fn submit_then_retrieve_result() {
    let addr = free_tcp_addr();
    let mut router = RouterSocket::new();
    router.bind(&addr).await.unwrap();

    let client_task = tokio::spawn({
        let addr = addr.clone();
        async move {
            let mut client = Client::connect(ClientConfig::new(addr)).await.unwrap();
            let reqs = sample_requirements();
            let mut payload = HashMap::new();
            payload.insert(
                remus_protocol::DEFAULT_PAYLOAD_KEY.to_string(),
                remus_protocol::JobContent::text("TEST"),
            );
            let submission = JobSubmission {
                requirements: reqs.clone(),
                payload,
            };
            let job_id = client.submit_job(reqs.clone(), submission).await.unwrap();
            let outcome = client.retrieve_mesh(&reqs, job_id).await.unwrap();
            (job_id, outcome)
        }
    });

    let (identity, msg) = recv_request(&mut router).await;
    assert_eq!(msg.service_type().unwrap(), ServiceType::MakeMesh);
    let submitted: JobSubmission = serde_json::from_slice(&msg.payload_frames[0]).unwrap();
    assert_eq!(submitted.default_content().unwrap().bytes, b"TEST");

    let assigned_id = remus_protocol::JobId::generate();
    reply(&mut router, identity, JobResponseBody::Accepted { job_id: assigned_id }).await;

    let (identity, msg) = recv_request(&mut router).await;
    assert_eq!(msg.service_type().unwrap(), ServiceType::RetrieveMesh);
    reply(
        &mut router,
        identity,
        JobResponseBody::Result(ResultEnvelope {
            job_id: assigned_id,
            result: JobResult::Inline { bytes: b"DONE".to_vec() },
        }),
    )
    .await;

    let (job_id, outcome) = client_task.await.unwrap();
    assert_eq!(job_id, assigned_id);
    match outcome {
        RetrieveOutcome::Ready(JobResult::Inline { bytes }) => assert_eq!(bytes, b"DONE"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn retrieve_mesh_reports_pending_status() {
    let addr = free_tcp_addr();
    let mut router = RouterSocket::new();
    router.bind(&addr).await.unwrap();

    let job_id = remus_protocol::JobId::generate();
    let client_task = tokio::spawn({
        let addr = addr.clone();
        async move {
            let mut client = Client::connect(ClientConfig::new(addr)).await.unwrap();
            client.retrieve_mesh(&sample_requirements(), job_id).await.unwrap()
        }
    });

    let (identity, _msg) = recv_request(&mut router).await;
    reply(
        &mut router,
        identity,
        JobResponseBody::Status(StatusEnvelope::new(job_id, StatusCode::InProgress, 40, "working")),
    )
    .await;

    match client_task.await.unwrap() {
        RetrieveOutcome::Pending(status) => {
            assert_eq!(status.status, StatusCode::InProgress);
            assert_eq!(status.progress, 40);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn request_without_a_reply_times_out() {
    let addr = free_tcp_addr();
    let mut router = RouterSocket::new();
    router.bind(&addr).await.unwrap();

    let mut client = Client::connect(ClientConfig {
        broker_addr: addr,
        request_timeout: Duration::from_millis(150),
    })
    .await
    .unwrap();

    let result = client.can_mesh(&sample_requirements()).await;
    assert!(matches!(result, Err(ClientError::Timeout(_))));

    // Keep the router alive until the client call above finishes so the
    // connection isn't torn down mid-request.
    drop(router);
}
