use ferve_core::{
    protocol::{OutboundMsg, PomodoroComplete},
    LogSource, PomodoroPhase, SystemStats, UsageStats,
};
use ferve_hub::{
    config::HubConfig,
    server::{serve, AppState},
    services::{downloads::DASHBOARD_SCAN_LIMIT, projects::ProjectRegistry},
    telemetry::{StatsSampler, TelemetryError},
};
use futures_util::{SinkExt, StreamExt};
use std::{
    fs::File,
    net::SocketAddr,
    path::Path,
    time::{Duration, SystemTime},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    addr: SocketAddr,
    state: AppState,
    _dir: tempfile::TempDir,
}

async fn start_hub() -> TestHub {
    let dir = tempfile::tempdir().expect("tempdir");
    let downloads = dir.path().join("downloads");
    std::fs::create_dir(&downloads).expect("mkdir");
    let config = HubConfig {
        addr: "127.0.0.1:0".to_string(),
        projects_file: dir.path().join("config").join("projects.json"),
        downloads_dir: downloads,
        stats_interval: Duration::from_secs(3600),
        command_timeout: Duration::from_secs(5),
        ..HubConfig::default()
    };
    let registry = ProjectRegistry::load_or_init(&config.projects_file).expect("registry");
    let state = AppState::new(&config, registry);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(serve(listener, state.clone(), std::future::pending()));
    TestHub {
        addr,
        state,
        _dir: dir,
    }
}

impl TestHub {
    fn downloads(&self) -> &Path {
        &self.state.config.downloads_dir
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("connect");
        client
    }

    /// Connects and drains the two greetings.
    async fn ready_client(&self) -> Client {
        let mut client = self.connect().await;
        for _ in 0..2 {
            assert!(matches!(recv(&mut client).await, OutboundMsg::Log(_)));
        }
        client
    }
}

async fn send(client: &mut Client, raw: &str) {
    client
        .send(Message::Text(raw.to_string()))
        .await
        .expect("send");
}

async fn recv(client: &mut Client) -> OutboundMsg {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("recv timeout")
            .expect("stream open")
            .expect("frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("outbound frame");
        }
    }
}

fn touch(dir: &Path, name: &str, age: Duration) {
    let file = File::create(dir.join(name)).expect("create");
    file.set_modified(SystemTime::now() - age).expect("set mtime");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn greetings_arrive_first() {
    let hub = start_hub().await;
    let mut client = hub.connect().await;

    let OutboundMsg::Log(first) = recv(&mut client).await else {
        panic!("expected log greeting");
    };
    assert_eq!(first.message, "Connected to Ferve Labs Core");
    assert_eq!(first.source, LogSource::System);

    let OutboundMsg::Log(second) = recv(&mut client).await else {
        panic!("expected version greeting");
    };
    assert!(second.message.starts_with("System ready. ferve-hub "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_or_untyped_frames_are_ignored() {
    let hub = start_hub().await;
    let mut client = hub.ready_client().await;

    send(&mut client, r#"{"type":"warp_drive","speed":9}"#).await;
    send(&mut client, r#"{"text":"no type here"}"#).await;
    send(&mut client, "definitely not json").await;
    send(&mut client, r#"{"type":"add_task","text":"still here"}"#).await;

    let OutboundMsg::TaskAdded(added) = recv(&mut client).await else {
        panic!("expected task_added as the first reply");
    };
    assert_eq!(added.task_id, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tasks_keep_insertion_order() {
    let hub = start_hub().await;
    let mut client = hub.ready_client().await;

    send(&mut client, r#"{"type":"add_task","text":"buy milk"}"#).await;
    recv(&mut client).await;
    send(&mut client, r#"{"type":"add_task","text":"call dad"}"#).await;
    recv(&mut client).await;
    send(&mut client, r#"{"type":"get_tasks"}"#).await;

    let OutboundMsg::TasksList(tasks) = recv(&mut client).await else {
        panic!("expected tasks_list");
    };
    let listed: Vec<_> = tasks.iter().map(|t| (t.id, t.text.as_str())).collect();
    assert_eq!(listed, vec![(1, "buy milk"), (2, "call dad")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pomodoro_completion_reaches_every_client() {
    let hub = start_hub().await;
    let mut requester = hub.ready_client().await;
    let mut bystander = hub.ready_client().await;

    // A reply proves the bystander's read loop, and so its registration, is live.
    send(&mut bystander, r#"{"type":"get_tasks"}"#).await;
    assert!(matches!(recv(&mut bystander).await, OutboundMsg::TasksList(_)));

    send(&mut requester, r#"{"type":"start_pomodoro","duration":0.005}"#).await;
    let OutboundMsg::PomodoroStarted(started) = recv(&mut requester).await else {
        panic!("expected pomodoro_started");
    };
    assert_eq!(started.phase, PomodoroPhase::Work);

    let expected = OutboundMsg::PomodoroComplete(PomodoroComplete {
        phase: PomodoroPhase::Work,
        next: PomodoroPhase::Break,
        count: 1,
    });
    assert_eq!(recv(&mut requester).await, expected);
    assert_eq!(recv(&mut bystander).await, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn downloads_scan_is_newest_first_and_capped() {
    let hub = start_hub().await;
    touch(hub.downloads(), "t1.pdf", Duration::from_secs(300));
    touch(hub.downloads(), "t3.pdf", Duration::from_secs(1));
    touch(hub.downloads(), "t2.pdf", Duration::from_secs(100));
    let mut client = hub.ready_client().await;

    send(&mut client, r#"{"type":"scan_downloads"}"#).await;
    let OutboundMsg::DownloadsScan(files) = recv(&mut client).await else {
        panic!("expected downloads_scan");
    };
    let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["t3.pdf", "t2.pdf", "t1.pdf"]);

    for idx in 0..60u64 {
        touch(
            hub.downloads(),
            &format!("bulk-{idx}.zip"),
            Duration::from_secs(1000 + idx),
        );
    }
    send(&mut client, r#"{"type":"scan_downloads"}"#).await;
    let OutboundMsg::DownloadsScan(files) = recv(&mut client).await else {
        panic!("expected downloads_scan");
    };
    assert_eq!(files.len(), DASHBOARD_SCAN_LIMIT);
    assert_eq!(files[0].name, "t3.pdf");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_leaves_other_clients_untouched() {
    let hub = start_hub().await;
    let mut stays = hub.ready_client().await;
    let mut leaves = hub.ready_client().await;
    send(&mut leaves, r#"{"type":"get_tasks"}"#).await;
    recv(&mut leaves).await;
    leaves.close(None).await.expect("close");
    drop(leaves);

    for _ in 0..50 {
        if hub.state.hub.registry().len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(hub.state.hub.registry().len().await, 1);

    send(&mut stays, r#"{"type":"pomodoro_status"}"#).await;
    assert!(matches!(recv(&mut stays).await, OutboundMsg::PomodoroStatus(_)));
}

struct FixedSampler;

impl StatsSampler for FixedSampler {
    fn sample(&mut self) -> Result<SystemStats, TelemetryError> {
        Ok(SystemStats {
            cpu: 7.5,
            memory: UsageStats::from_bytes(512, 1024),
            disk: UsageStats::from_bytes(1, 4),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn telemetry_is_broadcast_to_connected_clients() {
    let hub = start_hub().await;
    let mut client = hub.ready_client().await;
    let ticker = hub
        .state
        .hub
        .spawn_telemetry(FixedSampler, Duration::from_millis(100));

    let OutboundMsg::SystemStats(stats) = recv(&mut client).await else {
        panic!("expected system_stats");
    };
    assert_eq!(stats.memory.percent, 50.0);
    assert_eq!(stats.disk.percent, 25.0);
    ticker.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_route_answers_ok() {
    let hub = start_hub().await;
    let mut stream = TcpStream::connect(hub.addr).await.expect("connect");
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));
}
