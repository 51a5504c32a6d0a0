//! Session groups: shard fan-out, identify spacing and recommended shards.

mod test_utils;

use cordial_error::{CordialErrorKind, GatewayErrorKind};
use cordial_gateway::{GatewayEvent, GatewayPayload, Opcode, SessionGroup};
use cordial_rate_limit::{GatewayConfig, RestConfig};
use cordial_rest::RequestRouter;
use serde_json::json;
use std::time::Duration;
use test_utils::{GatewayBotTransport, MockGatewayTransport, MockServer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(600);

fn config() -> GatewayConfig {
    GatewayConfig::default().with_url("wss://gateway.test")
}

async fn collect_servers(servers: &mut UnboundedReceiver<MockServer>, n: usize) -> Vec<MockServer> {
    let mut collected = Vec::new();
    while collected.len() < n {
        let server = timeout(WAIT, servers.recv())
            .await
            .expect("shard never connected")
            .expect("transport dropped");
        collected.push(server);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn test_identifies_are_spaced_across_shards() {
    let (transport, mut servers) = MockGatewayTransport::new();
    let (group, _events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .shard_count(10)
        .config(config())
        .transport(transport)
        .start()
        .await
        .unwrap();
    assert_eq!(group.shards(), (0..10).collect::<Vec<_>>());

    let mut links = collect_servers(&mut servers, 10).await;
    for link in &links {
        link.hello(41_250);
    }

    let mut identifies = Vec::new();
    for link in links.iter_mut() {
        let (identify, at) = link.expect_op(Opcode::Identify).await;
        identifies.push((at, identify.d["shard"][0].as_u64().unwrap()));
    }
    identifies.sort();

    let mut shards: Vec<_> = identifies.iter().map(|(_, shard)| *shard).collect();
    shards.sort();
    assert_eq!(shards, (0..10).collect::<Vec<_>>());
    for pair in identifies.windows(2) {
        assert!(
            pair[1].0 - pair[0].0 >= Duration::from_secs(5),
            "identifies too close: {:?}",
            pair
        );
    }
    assert_eq!(group.identify_limiter().used(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_max_concurrency_allows_parallel_identifies() {
    let (transport, mut servers) = MockGatewayTransport::new();
    let (_group, _events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .shard_count(4)
        .config(config().with_identify_limits(Duration::from_secs(5), 1000, 2))
        .transport(transport)
        .start()
        .await
        .unwrap();

    let mut links = collect_servers(&mut servers, 4).await;
    for link in &links {
        link.hello(41_250);
    }
    let mut times = Vec::new();
    for link in links.iter_mut() {
        let (_, at) = link.expect_op(Opcode::Identify).await;
        times.push(at);
    }
    times.sort();

    assert_eq!(times[0], times[1]);
    assert!(times[2] - times[0] >= Duration::from_secs(5));
    assert_eq!(times[2], times[3]);
}

#[tokio::test(start_paused = true)]
async fn test_shard_subset_identifies_with_total_count() {
    let (transport, mut servers) = MockGatewayTransport::new();
    let (group, _events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .shard_count(4)
        .shards([1, 3])
        .config(config())
        .transport(transport)
        .start()
        .await
        .unwrap();
    assert_eq!(group.shards(), vec![1, 3]);
    assert_eq!(group.shard_count(), 4);

    let mut links = collect_servers(&mut servers, 2).await;
    let mut seen = Vec::new();
    for link in links.iter_mut() {
        link.hello(41_250);
        let (identify, _) = link.expect_op(Opcode::Identify).await;
        seen.push(identify.d["shard"].clone());
    }
    seen.sort_by_key(|shard| shard[0].as_u64());
    assert_eq!(seen, vec![json!([1, 4]), json!([3, 4])]);

    let err = group
        .send(0, GatewayPayload::presence_update(json!({})))
        .unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::UnknownShard(0));
}

#[tokio::test]
async fn test_out_of_range_shard_is_rejected() {
    let (transport, _servers) = MockGatewayTransport::new();
    let err = SessionGroup::builder()
        .token("secret-token")
        .shard_count(2)
        .shards([0, 2])
        .transport(transport)
        .start()
        .await
        .unwrap_err();
    match err.kind() {
        CordialErrorKind::Gateway(e) => {
            assert_eq!(e.kind, GatewayErrorKind::InvalidShard { index: 2, count: 2 })
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let (transport, _servers) = MockGatewayTransport::new();
    let err = SessionGroup::builder()
        .transport(transport)
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), CordialErrorKind::Builder(_)));
}

#[tokio::test(start_paused = true)]
async fn test_recommended_shards_come_from_gateway_bot() {
    let http = GatewayBotTransport::new("wss://bot.test", 3, 1000, 998);
    let router = RequestRouter::new(http, RestConfig::default());
    let (transport, mut servers) = MockGatewayTransport::new();

    let (group, _events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .recommended_shards(router)
        .config(config())
        .transport(transport)
        .start()
        .await
        .unwrap();

    assert_eq!(group.shard_count(), 3);
    assert_eq!(group.identify_limiter().used(), 2);
    let links = collect_servers(&mut servers, 3).await;
    for link in &links {
        assert!(link.url.starts_with("wss://bot.test/"), "{}", link.url);
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_waits_for_reset() {
    let http = GatewayBotTransport::new("wss://bot.test", 1, 2, 0);
    let router = RequestRouter::new(http, RestConfig::default());
    let (transport, mut servers) = MockGatewayTransport::new();

    let (_group, _events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .recommended_shards(router)
        .config(config())
        .transport(transport)
        .start()
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let mut link = collect_servers(&mut servers, 1).await.remove(0);
    link.hello(600_000);
    let (_, at) = link.expect_op(Opcode::Identify).await;
    // reset_after is 60 s in the canned response.
    assert!(at - started >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_events_from_all_shards_share_one_stream() {
    let (transport, mut servers) = MockGatewayTransport::new();
    let (group, mut events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .shard_count(2)
        .config(config())
        .transport(transport)
        .start()
        .await
        .unwrap();

    let mut links = collect_servers(&mut servers, 2).await;
    for (i, link) in links.iter_mut().enumerate() {
        link.handshake(&format!("session-{}", i)).await;
    }

    let mut ready = Vec::new();
    while ready.len() < 2 {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let GatewayEvent::Ready { shard, .. } = event {
            ready.push(shard.index());
        }
    }
    ready.sort();
    assert_eq!(ready, vec![0, 1]);
    assert_eq!(group.shard_for_guild(1 << 22), 1);
}
